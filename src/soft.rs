//! Parsing for GEO's SOFT text format.
//!
//! A SOFT document is a sequence of entities. Each entity starts with a
//! `^KIND = ACCESSION` line and carries `!Kind_attribute = value` lines,
//! `#COLUMN = description` lines and an optional tab-separated data table
//! framed by `!kind_table_begin` / `!kind_table_end`.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

use crate::domain::{AccessionKind, GeoAccession};
use crate::error::KiraError;

pub const PROBE_ID_COLUMN: &str = "ID";
pub const GENE_ID_COLUMN: &str = "GB_ACC";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SoftTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SoftTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn column<'a>(&'a self, name: &str) -> Option<impl Iterator<Item = &'a str> + 'a> {
        let index = self.column_index(name)?;
        Some(
            self.rows
                .iter()
                .map(move |row| row.get(index).map(String::as_str).unwrap_or("")),
        )
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescription {
    pub name: String,
    pub description: String,
}

pub type Metadata = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformRecord {
    pub accession: String,
    pub metadata: Metadata,
    pub columns: Vec<ColumnDescription>,
    pub table: SoftTable,
}

impl PlatformRecord {
    pub fn manufacturer(&self) -> Option<&str> {
        first_value(&self.metadata, "manufacturer")
    }

    pub fn title(&self) -> Option<&str> {
        first_value(&self.metadata, "title")
    }

    /// Probe id to gene id lookup. Probes with an empty gene id map to
    /// themselves. `None` when either column is missing from the table.
    pub fn probe_gene_map(
        &self,
        probe_column: &str,
        gene_column: &str,
    ) -> Option<HashMap<String, String>> {
        let probe_index = self.table.column_index(probe_column)?;
        let gene_index = self.table.column_index(gene_column)?;
        let mut map = HashMap::with_capacity(self.table.len());
        for row in &self.table.rows {
            let Some(probe) = row.get(probe_index).map(|value| value.trim()) else {
                continue;
            };
            if probe.is_empty() {
                continue;
            }
            let gene = row
                .get(gene_index)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .unwrap_or(probe);
            map.insert(probe.to_string(), gene.to_string());
        }
        Some(map)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub accession: String,
    pub metadata: Metadata,
    pub columns: Vec<ColumnDescription>,
    pub table: SoftTable,
}

impl SampleRecord {
    pub fn title(&self) -> Option<&str> {
        first_value(&self.metadata, "title")
    }

    /// `ID_REF`/`VALUE` pairs; unparsable values become `None`.
    pub fn expression_values(&self) -> Vec<(String, Option<f64>)> {
        let (Some(ids), Some(values)) = (self.table.column("ID_REF"), self.table.column("VALUE"))
        else {
            return Vec::new();
        };
        ids.zip(values)
            .map(|(id, value)| (id.to_string(), value.trim().parse::<f64>().ok()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub accession: String,
    pub metadata: Metadata,
    pub samples: Vec<SampleRecord>,
    pub platforms: Vec<PlatformRecord>,
}

impl SeriesRecord {
    pub fn title(&self) -> Option<&str> {
        first_value(&self.metadata, "title")
    }

    pub fn sample(&self, accession: &str) -> Option<&SampleRecord> {
        self.samples
            .iter()
            .find(|sample| sample.accession == accession)
    }
}

/// A parsed GEO record as handed out by the fetcher and stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GeoRecord {
    Platform(PlatformRecord),
    Series(SeriesRecord),
}

impl GeoRecord {
    pub fn accession(&self) -> &str {
        match self {
            GeoRecord::Platform(platform) => &platform.accession,
            GeoRecord::Series(series) => &series.accession,
        }
    }

    pub fn kind(&self) -> AccessionKind {
        match self {
            GeoRecord::Platform(_) => AccessionKind::Platform,
            GeoRecord::Series(_) => AccessionKind::Series,
        }
    }

    pub fn as_platform(&self) -> Option<&PlatformRecord> {
        match self {
            GeoRecord::Platform(platform) => Some(platform),
            GeoRecord::Series(_) => None,
        }
    }

    pub fn into_platform(self) -> Option<PlatformRecord> {
        match self {
            GeoRecord::Platform(platform) => Some(platform),
            GeoRecord::Series(_) => None,
        }
    }
}

#[derive(Debug, Default)]
struct Entity {
    kind: String,
    accession: String,
    metadata: Metadata,
    columns: Vec<ColumnDescription>,
    table: SoftTable,
}

/// Parses a raw record file: plain text for platforms, gzip for series.
pub fn parse_file(accession: &GeoAccession, path: &Path) -> Result<GeoRecord, KiraError> {
    let text = match accession.kind() {
        AccessionKind::Platform => std::fs::read_to_string(path)
            .map_err(|err| KiraError::Filesystem(format!("read {}: {err}", path.display())))?,
        AccessionKind::Series => read_gz_to_string(path)?,
    };
    parse_record(accession, &text)
}

pub fn parse_record(accession: &GeoAccession, text: &str) -> Result<GeoRecord, KiraError> {
    match accession.kind() {
        AccessionKind::Platform => parse_platform(accession, text).map(GeoRecord::Platform),
        AccessionKind::Series => parse_series(accession, text).map(GeoRecord::Series),
    }
}

pub fn parse_platform(accession: &GeoAccession, text: &str) -> Result<PlatformRecord, KiraError> {
    let entities = parse_entities(accession, text)?;
    let entity = entities
        .into_iter()
        .find(|entity| entity.kind == "PLATFORM" && entity.accession == accession.as_str())
        .ok_or_else(|| missing_entity(accession, text))?;
    Ok(PlatformRecord {
        accession: entity.accession,
        metadata: entity.metadata,
        columns: entity.columns,
        table: entity.table,
    })
}

pub fn parse_series(accession: &GeoAccession, text: &str) -> Result<SeriesRecord, KiraError> {
    let mut series = None;
    let mut samples = Vec::new();
    let mut platforms = Vec::new();
    for entity in parse_entities(accession, text)? {
        match entity.kind.as_str() {
            "SERIES" if entity.accession == accession.as_str() => series = Some(entity),
            "SAMPLE" => samples.push(SampleRecord {
                accession: entity.accession,
                metadata: entity.metadata,
                columns: entity.columns,
                table: entity.table,
            }),
            "PLATFORM" => platforms.push(PlatformRecord {
                accession: entity.accession,
                metadata: entity.metadata,
                columns: entity.columns,
                table: entity.table,
            }),
            _ => {}
        }
    }
    let series = series.ok_or_else(|| missing_entity(accession, text))?;
    Ok(SeriesRecord {
        accession: series.accession,
        metadata: series.metadata,
        samples,
        platforms,
    })
}

pub fn read_gz_to_string(path: &Path) -> Result<String, KiraError> {
    let file = File::open(path)
        .map_err(|err| KiraError::Filesystem(format!("open {}: {err}", path.display())))?;
    let mut decoder = GzDecoder::new(file);
    let mut text = String::new();
    decoder
        .read_to_string(&mut text)
        .map_err(|err| KiraError::Filesystem(format!("decompress {}: {err}", path.display())))?;
    Ok(text)
}

/// True when a GEO response body says the accession does not exist.
pub fn is_missing_accession_page(text: &str) -> bool {
    text.contains("Could not find a public or private accession")
        || text.contains("could not find a public or private accession")
}

fn missing_entity(accession: &GeoAccession, text: &str) -> KiraError {
    if is_missing_accession_page(text) {
        return KiraError::AccessionNotFound(accession.to_string());
    }
    KiraError::SoftParse {
        accession: accession.to_string(),
        message: format!("no ^{} entity for accession", entity_label(accession.kind())),
    }
}

fn entity_label(kind: AccessionKind) -> &'static str {
    match kind {
        AccessionKind::Platform => "PLATFORM",
        AccessionKind::Series => "SERIES",
    }
}

fn parse_entities(accession: &GeoAccession, text: &str) -> Result<Vec<Entity>, KiraError> {
    let mut entities = Vec::new();
    let mut current: Option<Entity> = None;
    let mut in_table = false;
    let mut header_pending = false;

    for (line_no, raw) in text.lines().enumerate() {
        let line = raw.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }

        if in_table {
            let lower = line.to_ascii_lowercase();
            if lower.starts_with('!') && lower.ends_with("_table_end") {
                in_table = false;
                continue;
            }
            let Some(entity) = current.as_mut() else {
                continue;
            };
            let cells = line.split('\t').map(|cell| cell.trim().to_string());
            if header_pending {
                entity.table.columns = cells.collect();
                header_pending = false;
            } else {
                entity.table.rows.push(cells.collect());
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix('^') {
            let (kind, value) = split_assignment(rest).ok_or_else(|| KiraError::SoftParse {
                accession: accession.to_string(),
                message: format!("malformed entity line {}", line_no + 1),
            })?;
            if let Some(done) = current.take() {
                entities.push(done);
            }
            current = Some(Entity {
                kind: kind.to_ascii_uppercase(),
                accession: value.to_string(),
                ..Entity::default()
            });
        } else if let Some(rest) = line.strip_prefix('!') {
            if rest.to_ascii_lowercase().ends_with("_table_begin") {
                in_table = true;
                header_pending = true;
                continue;
            }
            let Some(entity) = current.as_mut() else {
                continue;
            };
            if let Some((key, value)) = split_assignment(rest) {
                let key = key.split_once('_').map(|(_, key)| key).unwrap_or(key);
                entity
                    .metadata
                    .entry(key.to_string())
                    .or_default()
                    .push(value.to_string());
            }
        } else if let Some(rest) = line.strip_prefix('#') {
            let Some(entity) = current.as_mut() else {
                continue;
            };
            if let Some((name, description)) = split_assignment(rest) {
                entity.columns.push(ColumnDescription {
                    name: name.to_string(),
                    description: description.to_string(),
                });
            }
        }
    }

    if in_table {
        return Err(KiraError::SoftParse {
            accession: accession.to_string(),
            message: "unterminated data table".to_string(),
        });
    }
    if let Some(done) = current.take() {
        entities.push(done);
    }
    Ok(entities)
}

fn split_assignment(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, value.trim()))
}

fn first_value<'a>(metadata: &'a Metadata, key: &str) -> Option<&'a str> {
    metadata
        .get(key)
        .and_then(|values| values.first())
        .map(String::as_str)
}
