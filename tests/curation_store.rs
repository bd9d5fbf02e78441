use assert_matches::assert_matches;

use kira_expression_curator::curation_store::CurationStore;
use kira_expression_curator::error::{ErrorClass, KiraError};
use kira_expression_curator::matrix::{NormalizedMatrix, SampleRow};

fn matrix(genes: &[&str], rows: &[(&str, Vec<f64>)]) -> NormalizedMatrix {
    NormalizedMatrix {
        genes: genes.iter().map(|gene| gene.to_string()).collect(),
        samples: rows
            .iter()
            .enumerate()
            .map(|(index, (label, values))| SampleRow {
                sample_id: format!("GSM{index}"),
                class_label: label.to_string(),
                values: values.clone(),
            })
            .collect(),
    }
}

fn bits(values: &[f64]) -> Vec<u64> {
    values.iter().map(|value| value.to_bits()).collect()
}

#[test]
fn ingest_then_retrieve_is_bit_exact() {
    let store = CurationStore::open_in_memory().unwrap();
    store.create_schema().unwrap();
    let source = matrix(
        &["A.0", "B.0", "C.0"],
        &[
            ("normal", vec![0.1 + 0.2, f64::NAN, -0.0]),
            ("tumor", vec![f64::MAX, f64::MIN_POSITIVE, 1e-310]),
        ],
    );

    let id = store.ingest("GSE1", "Breast", &source).unwrap();
    assert!(id > 0);

    let table = store.retrieve("GSE1", "Breast").unwrap();
    assert_eq!(table.genes, source.genes);
    assert_eq!(table.sample_types(), vec!["normal", "tumor"]);
    for (row, sample) in table.rows.iter().zip(&source.samples) {
        assert_eq!(bits(&row.values), bits(&sample.values));
    }
    assert_eq!(table.column("C.0").map(|values| values.len()), Some(2));
}

#[test]
fn retrieve_of_unknown_dataset_is_not_found() {
    let store = CurationStore::open_in_memory().unwrap();
    assert_matches!(
        store.retrieve("GSE1", "Breast"),
        Err(KiraError::DatasetNotFound(_))
    );

    store.create_schema().unwrap();
    store
        .ingest("GSE1", "Breast", &matrix(&["A.0"], &[("normal", vec![1.0])]))
        .unwrap();
    assert_matches!(
        store.retrieve("GSE1", "Lung"),
        Err(KiraError::DatasetNotFound(_))
    );
    assert_matches!(
        store.retrieve("GSE2", "Breast"),
        Err(KiraError::DatasetNotFound(_))
    );
}

#[test]
fn dataset_without_samples_is_not_found() {
    let store = CurationStore::open_in_memory().unwrap();
    store.create_schema().unwrap();
    store
        .ingest("GSE1", "Breast", &matrix(&["A.0"], &[]))
        .unwrap();
    assert_matches!(
        store.retrieve("GSE1", "Breast"),
        Err(KiraError::DatasetNotFound(_))
    );
}

#[test]
fn table_lifecycle() {
    let store = CurationStore::open_in_memory().unwrap();
    assert!(!store.table_exists("datasets").unwrap());

    store.create_schema().unwrap();
    assert!(store.table_exists("datasets").unwrap());
    assert!(store.table_exists("expression").unwrap());
    assert!(!store.table_has_rows("expression").unwrap());

    store
        .ingest("GSE1", "Breast", &matrix(&["A.0"], &[("normal", vec![1.0])]))
        .unwrap();
    assert!(store.table_has_rows("expression").unwrap());
    assert!(store.table_has_rows("datasets").unwrap());

    store.drop_table("expression").unwrap();
    assert!(!store.table_exists("expression").unwrap());
    store.drop_table("expression").unwrap();

    assert_matches!(
        store.table_exists("expression; --"),
        Err(KiraError::InvalidTableName(_))
    );
}

#[test]
fn dangling_dataset_reference_is_a_schema_violation() {
    let store = CurationStore::open_in_memory().unwrap();
    store.create_schema().unwrap();
    store
        .ingest("GSE1", "Breast", &matrix(&["A.0"], &[("normal", vec![1.0])]))
        .unwrap();

    let genes = vec!["A.0".to_string()];
    let err = store
        .append_expression(999, "normal", &genes, &[2.0])
        .unwrap_err();
    assert_matches!(err, KiraError::SchemaViolation(_));
    assert_eq!(err.class(), ErrorClass::SchemaViolation);

    let table = store.retrieve("GSE1", "Breast").unwrap();
    assert_eq!(table.rows.len(), 1);
}

#[test]
fn mismatched_gene_lists_are_corrupt() {
    let store = CurationStore::open_in_memory().unwrap();
    store.create_schema().unwrap();
    let id = store
        .ingest("GSE1", "Breast", &matrix(&["A.0"], &[("normal", vec![1.0])]))
        .unwrap();
    store
        .append_expression(id, "tumor", &["B.0".to_string()], &[2.0])
        .unwrap();

    assert_matches!(
        store.retrieve("GSE1", "Breast"),
        Err(KiraError::CorruptPayload(_))
    );
}

#[test]
fn rebuild_rolls_back_only_the_failing_dataset() {
    let store = CurationStore::open_in_memory().unwrap();
    store.create_schema().unwrap();
    store
        .ingest("GSE0", "Old", &matrix(&["A.0"], &[("normal", vec![0.0])]))
        .unwrap();

    let ok = matrix(&["A.0", "B.0"], &[("normal", vec![1.0, 2.0])]);
    // Row length disagrees with the gene list, so encoding fails after the
    // datasets row is already written.
    let broken = matrix(&["A.0", "B.0"], &[("normal", vec![1.0])]);

    let outcomes = store
        .rebuild(|batch| {
            let first = batch.ingest("GSE1", "Breast", &ok).is_ok();
            let second = batch.ingest("GSE2", "Lung", &broken).is_ok();
            let third = batch.ingest("GSE3", "Colon", &ok).is_ok();
            assert_eq!(batch.ingested(), 2);
            Ok(vec![first, second, third])
        })
        .unwrap();

    assert_eq!(outcomes, vec![true, false, true]);
    let stored: Vec<(String, String, i64)> = store
        .datasets()
        .unwrap()
        .into_iter()
        .map(|dataset| (dataset.series, dataset.class_label, dataset.samples))
        .collect();
    assert_eq!(
        stored,
        vec![
            ("GSE1".to_string(), "Breast".to_string(), 1),
            ("GSE3".to_string(), "Colon".to_string(), 1),
        ]
    );
    assert_matches!(
        store.retrieve("GSE0", "Old"),
        Err(KiraError::DatasetNotFound(_))
    );
}

#[test]
fn failed_rebuild_keeps_previous_contents() {
    let store = CurationStore::open_in_memory().unwrap();
    store.create_schema().unwrap();
    store
        .ingest("GSE0", "Old", &matrix(&["A.0"], &[("normal", vec![0.5])]))
        .unwrap();

    let result: Result<(), KiraError> = store.rebuild(|batch| {
        batch.ingest("GSE1", "New", &matrix(&["A.0"], &[("normal", vec![1.0])]))?;
        Err(KiraError::CatalogUnavailable("interrupted".to_string()))
    });
    assert_matches!(result, Err(KiraError::CatalogUnavailable(_)));

    let table = store.retrieve("GSE0", "Old").unwrap();
    assert_eq!(table.rows[0].values, vec![0.5]);
    assert_matches!(
        store.retrieve("GSE1", "New"),
        Err(KiraError::DatasetNotFound(_))
    );
}

#[test]
fn file_store_persists_across_reopen() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("nested").join("expression.db");
    {
        let store = CurationStore::open(&path).unwrap();
        store.create_schema().unwrap();
        store
            .ingest(
                "GSE1",
                "Breast",
                &matrix(&["A.0", "B.0"], &[("normal", vec![1.5, 2.5])]),
            )
            .unwrap();
    }

    let reopened = CurationStore::open(&path).unwrap();
    assert_eq!(reopened.path(), Some(path.as_path()));
    let table = reopened.retrieve("GSE1", "Breast").unwrap();
    assert_eq!(table.rows[0].values, vec![1.5, 2.5]);
    assert_eq!(reopened.datasets().unwrap().len(), 1);
}
