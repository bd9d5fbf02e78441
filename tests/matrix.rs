mod common;

use std::fs;

use assert_matches::assert_matches;

use kira_expression_curator::catalog::CatalogIndex;
use kira_expression_curator::domain::{DatasetKey, GeoAccession};
use kira_expression_curator::downloader::PlatformRegistry;
use kira_expression_curator::error::KiraError;
use kira_expression_curator::matrix::{GeneMapping, MatrixLoader, dedup_suffixed, read_matrix_csv};
use kira_expression_curator::soft::parse_platform;
use kira_expression_curator::store::Store;

use common::{BASE_URL, BREAST_CSV, CATALOG_JSON, GPL570_SOFT, scratch_settings};

fn breast() -> DatasetKey {
    DatasetKey::new("GSE45827", "Breast")
}

fn gpl570_registry() -> PlatformRegistry {
    let acc: GeoAccession = "GPL570".parse().unwrap();
    let registry = PlatformRegistry::new();
    registry.insert(parse_platform(&acc, GPL570_SOFT).unwrap());
    registry
}

fn write_breast(store: &Store, content: &str) {
    let dir = store.series_dir();
    fs::create_dir_all(dir.as_std_path()).unwrap();
    fs::write(dir.join("Breast_GSE45827.csv").as_std_path(), content).unwrap();
}

#[test]
fn probes_are_renamed_suffixed_and_sorted() {
    let temp = tempfile::tempdir().unwrap();
    let store = Store::new(&scratch_settings(temp.path()));
    write_breast(&store, BREAST_CSV);
    let index = CatalogIndex::from_json(CATALOG_JSON, BASE_URL).unwrap();
    let registry = gpl570_registry();

    let loaded = MatrixLoader::new(&index, &store, &registry)
        .load(&breast())
        .unwrap();

    assert_eq!(loaded.mapping, GeneMapping::Mapped { matched: 4, total: 4 });
    let matrix = &loaded.matrix;
    assert_eq!(
        matrix.genes,
        vec!["117_at.0", "M87338.0", "U48705.0", "U48705.1"]
    );
    assert_eq!(matrix.samples.len(), 3);
    assert_eq!(matrix.samples[0].sample_id, "GSM1");
    assert_eq!(matrix.samples[0].class_label, "normal");
    assert_eq!(matrix.samples[0].values, vec![3.0, 2.0, 1.0, 4.0]);
    assert!(matrix.value(1, "117_at.0").unwrap().is_nan());
    assert_eq!(matrix.value(1, "U48705.1"), Some(8.0));
    assert_eq!(matrix.class_labels(), vec!["normal", "breast_adenocarcinoma"]);
}

#[test]
fn missing_platform_keeps_probe_ids() {
    let temp = tempfile::tempdir().unwrap();
    let store = Store::new(&scratch_settings(temp.path()));
    write_breast(&store, BREAST_CSV);
    let index = CatalogIndex::from_json(CATALOG_JSON, BASE_URL).unwrap();
    let registry = PlatformRegistry::new();

    let loaded = MatrixLoader::new(&index, &store, &registry)
        .load(&breast())
        .unwrap();

    assert_matches!(loaded.mapping, GeneMapping::NoGeneMapping { .. });
    assert_eq!(
        loaded.matrix.genes,
        vec!["1007_s_at", "1053_at", "117_at", "121_at"]
    );
    assert_eq!(loaded.matrix.samples[2].values, vec![9.0, 10.0, 11.0, 12.0]);
}

#[test]
fn missing_matrix_file_is_not_found() {
    let temp = tempfile::tempdir().unwrap();
    let store = Store::new(&scratch_settings(temp.path()));
    let index = CatalogIndex::from_json(CATALOG_JSON, BASE_URL).unwrap();
    let registry = gpl570_registry();

    let err = MatrixLoader::new(&index, &store, &registry)
        .load(&breast())
        .unwrap_err();
    assert_matches!(err, KiraError::FileNotFound(_));
}

#[test]
fn key_outside_catalog_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let store = Store::new(&scratch_settings(temp.path()));
    let index = CatalogIndex::from_json(CATALOG_JSON, BASE_URL).unwrap();
    let registry = gpl570_registry();

    let err = MatrixLoader::new(&index, &store, &registry)
        .load(&DatasetKey::new("GSE45827", "Lung"))
        .unwrap_err();
    assert_matches!(err, KiraError::InvalidSelection(_));
}

#[test]
fn malformed_csv_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("bad.csv");

    fs::write(&path, "samples,type,p1\nGSM1,normal,abc\n").unwrap();
    assert_matches!(read_matrix_csv(&path), Err(KiraError::MatrixParse { .. }));

    fs::write(&path, "samples,p1\nGSM1,1.0\n").unwrap();
    assert_matches!(read_matrix_csv(&path), Err(KiraError::MatrixParse { .. }));
}

#[test]
fn repeated_probe_columns_are_kept_and_suffixed() {
    let temp = tempfile::tempdir().unwrap();
    let store = Store::new(&scratch_settings(temp.path()));
    write_breast(
        &store,
        "samples,type,1053_at,1053_at,117_at\n\
         GSM1,normal,1.0,2.0,3.0\n\
         GSM2,breast_adenocarcinoma,4.0,5.0,6.0\n",
    );
    let index = CatalogIndex::from_json(CATALOG_JSON, BASE_URL).unwrap();
    let registry = gpl570_registry();

    let loaded = MatrixLoader::new(&index, &store, &registry)
        .load(&breast())
        .unwrap();

    assert_eq!(loaded.mapping, GeneMapping::Mapped { matched: 3, total: 3 });
    assert_eq!(loaded.matrix.genes, vec!["117_at.0", "M87338.0", "M87338.1"]);
    assert_eq!(loaded.matrix.samples[0].values, vec![3.0, 1.0, 2.0]);
    assert_eq!(loaded.matrix.samples[1].values, vec![6.0, 4.0, 5.0]);
}

#[test]
fn dedup_never_drops_columns() {
    let names: Vec<String> = ["B", "A", "B", "B", "C", "A"]
        .iter()
        .map(|name| name.to_string())
        .collect();
    let suffixed = dedup_suffixed(&names);
    assert_eq!(suffixed, vec!["B.0", "A.0", "B.1", "B.2", "C.0", "A.1"]);
}
