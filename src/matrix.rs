//! Expression matrix loading and probe-to-gene normalization.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::catalog::CatalogIndex;
use crate::domain::DatasetKey;
use crate::downloader::PlatformRegistry;
use crate::error::KiraError;
use crate::soft::{GENE_ID_COLUMN, PROBE_ID_COLUMN};
use crate::store::Store;

pub const SAMPLE_COLUMN: &str = "samples";
pub const CLASS_COLUMN: &str = "type";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleRow {
    pub sample_id: String,
    pub class_label: String,
    pub values: Vec<f64>,
}

/// Samples by genes. `genes` is unique and sorted; each row's `values` runs
/// parallel to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedMatrix {
    pub genes: Vec<String>,
    pub samples: Vec<SampleRow>,
}

impl NormalizedMatrix {
    pub fn gene_index(&self, gene: &str) -> Option<usize> {
        self.genes.binary_search_by(|probe| probe.as_str().cmp(gene)).ok()
    }

    pub fn value(&self, sample: usize, gene: &str) -> Option<f64> {
        let column = self.gene_index(gene)?;
        self.samples.get(sample)?.values.get(column).copied()
    }

    pub fn class_labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = Vec::new();
        for row in &self.samples {
            if !labels.contains(&row.class_label.as_str()) {
                labels.push(&row.class_label);
            }
        }
        labels
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GeneMapping {
    Mapped { matched: usize, total: usize },
    NoGeneMapping { reason: String },
}

#[derive(Debug, Clone)]
pub struct LoadedMatrix {
    pub matrix: NormalizedMatrix,
    pub mapping: GeneMapping,
}

pub struct MatrixLoader<'a> {
    index: &'a CatalogIndex,
    store: &'a Store,
    platforms: &'a PlatformRegistry,
}

impl<'a> MatrixLoader<'a> {
    pub fn new(index: &'a CatalogIndex, store: &'a Store, platforms: &'a PlatformRegistry) -> Self {
        Self {
            index,
            store,
            platforms,
        }
    }

    pub fn matrix_path(&self, key: &DatasetKey) -> Result<PathBuf, KiraError> {
        let entry = self
            .index
            .get(key)
            .ok_or_else(|| KiraError::InvalidSelection(key.to_string()))?;
        Ok(self.store.series_dir().as_std_path().join(entry.file_name()?))
    }

    pub fn load(&self, key: &DatasetKey) -> Result<LoadedMatrix, KiraError> {
        let entry = self
            .index
            .get(key)
            .ok_or_else(|| KiraError::InvalidSelection(key.to_string()))?;
        let path = self.matrix_path(key)?;
        let raw = read_matrix_csv(&path)?;

        let probe_map = match self.platforms.get(&entry.platform) {
            Some(platform) => platform
                .probe_gene_map(PROBE_ID_COLUMN, GENE_ID_COLUMN)
                .ok_or_else(|| {
                    format!(
                        "{} has no {PROBE_ID_COLUMN}/{GENE_ID_COLUMN} columns",
                        entry.platform
                    )
                }),
            None => Err(format!("platform {} was not fetched", entry.platform)),
        };

        let (matrix, mapping) = match probe_map {
            Ok(map) => normalize(raw, &map),
            Err(reason) => (keep_probe_ids(raw), GeneMapping::NoGeneMapping { reason }),
        };
        if let GeneMapping::NoGeneMapping { reason } = &mapping {
            warn!(dataset = %key, reason = %reason, "no gene mapping, keeping probe ids");
        } else {
            debug!(dataset = %key, genes = matrix.genes.len(), samples = matrix.samples.len(), "matrix normalized");
        }
        Ok(LoadedMatrix { matrix, mapping })
    }
}

/// Reads a CuMiDa-style CSV: `samples`, `type`, then one column per probe.
/// Repeated probe headers stay separate columns.
pub fn read_matrix_csv(path: &Path) -> Result<NormalizedMatrix, KiraError> {
    if !path.is_file() {
        return Err(KiraError::FileNotFound(path.to_path_buf()));
    }
    let parse_err = |message: String| KiraError::MatrixParse {
        path: path.to_path_buf(),
        message,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|err| parse_err(err.to_string()))?;
    let headers = reader
        .headers()
        .map_err(|err| parse_err(err.to_string()))?
        .clone();

    let sample_index = headers
        .iter()
        .position(|name| name == SAMPLE_COLUMN)
        .ok_or_else(|| parse_err(format!("missing `{SAMPLE_COLUMN}` column")))?;
    let class_index = headers
        .iter()
        .position(|name| name == CLASS_COLUMN)
        .ok_or_else(|| parse_err(format!("missing `{CLASS_COLUMN}` column")))?;

    let probe_columns: Vec<usize> = (0..headers.len())
        .filter(|index| *index != sample_index && *index != class_index)
        .collect();
    let genes: Vec<String> = probe_columns
        .iter()
        .map(|index| headers[*index].to_string())
        .collect();

    let mut samples = Vec::new();
    for (row_no, record) in reader.records().enumerate() {
        let record = record.map_err(|err| parse_err(err.to_string()))?;
        let values = probe_columns
            .iter()
            .map(|index| parse_value(record.get(*index).unwrap_or("")))
            .collect::<Option<Vec<f64>>>()
            .ok_or_else(|| parse_err(format!("non-numeric value in row {}", row_no + 2)))?;
        samples.push(SampleRow {
            sample_id: record.get(sample_index).unwrap_or("").to_string(),
            class_label: record.get(class_index).unwrap_or("").to_string(),
            values,
        });
    }

    Ok(NormalizedMatrix { genes, samples })
}

fn parse_value(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    if cell.is_empty() || cell.eq_ignore_ascii_case("na") || cell.eq_ignore_ascii_case("nan") {
        return Some(f64::NAN);
    }
    cell.parse().ok()
}

/// Renames probe columns to gene ids, suffixes duplicates and sorts.
pub fn normalize(
    raw: NormalizedMatrix,
    probe_map: &HashMap<String, String>,
) -> (NormalizedMatrix, GeneMapping) {
    let total = raw.genes.len();
    let matched = raw
        .genes
        .iter()
        .filter(|probe| probe_map.contains_key(probe.as_str()))
        .count();
    if matched == 0 {
        let reason = "no probe ids matched the platform table".to_string();
        return (keep_probe_ids(raw), GeneMapping::NoGeneMapping { reason });
    }

    let renamed: Vec<String> = raw
        .genes
        .iter()
        .map(|probe| probe_map.get(probe).cloned().unwrap_or_else(|| probe.clone()))
        .collect();
    let matrix = NormalizedMatrix {
        genes: dedup_suffixed(&renamed),
        samples: raw.samples,
    };
    (sort_columns(matrix), GeneMapping::Mapped { matched, total })
}

/// Appends `.N` to every name, counting repeats in original order:
/// `["A", "A", "B"]` becomes `["A.0", "A.1", "B.0"]`.
pub fn dedup_suffixed(names: &[String]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    names
        .iter()
        .map(|name| {
            let count = counts.entry(name.as_str()).or_insert(0);
            let suffixed = format!("{name}.{count}");
            *count += 1;
            suffixed
        })
        .collect()
}

/// Sorts unmapped probe columns. Probe ids stay as they are unless a header
/// repeats, in which case later copies become `A.1`, `A.2`.
fn keep_probe_ids(raw: NormalizedMatrix) -> NormalizedMatrix {
    let mut seen: HashSet<String> = HashSet::with_capacity(raw.genes.len());
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut genes = Vec::with_capacity(raw.genes.len());
    for probe in &raw.genes {
        let mut name = probe.clone();
        while !seen.insert(name.clone()) {
            let count = counts.entry(probe.clone()).or_insert(0);
            *count += 1;
            name = format!("{probe}.{count}");
        }
        genes.push(name);
    }
    sort_columns(NormalizedMatrix {
        genes,
        samples: raw.samples,
    })
}

/// Reorders columns (and every row's values) by column name.
pub fn sort_columns(matrix: NormalizedMatrix) -> NormalizedMatrix {
    let mut order: Vec<usize> = (0..matrix.genes.len()).collect();
    order.sort_by(|a, b| matrix.genes[*a].cmp(&matrix.genes[*b]));
    let genes = order.iter().map(|index| matrix.genes[*index].clone()).collect();
    let samples = matrix
        .samples
        .into_iter()
        .map(|row| SampleRow {
            values: order
                .iter()
                .map(|index| row.values.get(*index).copied().unwrap_or(f64::NAN))
                .collect(),
            ..row
        })
        .collect();
    NormalizedMatrix { genes, samples }
}
