//! SQLite persistence for curated expression matrices.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde::Serialize;
use tracing::{debug, info};

use crate::codec;
use crate::error::KiraError;
use crate::matrix::NormalizedMatrix;

pub const DATASETS_TABLE: &str = "datasets";
pub const EXPRESSION_TABLE: &str = "expression";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS `datasets` (
    `ID` INTEGER PRIMARY KEY AUTOINCREMENT,
    `GSE` TEXT NOT NULL,
    `CANCER` TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS `expression` (
    `ID` INTEGER PRIMARY KEY AUTOINCREMENT,
    `DATASET_ID` INTEGER NOT NULL REFERENCES `datasets`(`ID`),
    `SAMPLE_TYPE` TEXT NOT NULL,
    `EXPRESSION` BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS `idx_expression_dataset` ON `expression`(`DATASET_ID`);
CREATE INDEX IF NOT EXISTS `idx_datasets_lookup` ON `datasets`(`GSE`, `CANCER`);
"#;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpressionRow {
    pub sample_type: String,
    pub values: Vec<f64>,
}

/// A reconstructed dataset: one row per sample, indexed by sample type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpressionTable {
    pub genes: Vec<String>,
    pub rows: Vec<ExpressionRow>,
}

impl ExpressionTable {
    pub fn sample_types(&self) -> Vec<&str> {
        self.rows.iter().map(|row| row.sample_type.as_str()).collect()
    }

    pub fn column(&self, gene: &str) -> Option<Vec<f64>> {
        let index = self.genes.iter().position(|name| name == gene)?;
        Some(self.rows.iter().map(|row| row.values[index]).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredDataset {
    pub id: i64,
    pub series: String,
    pub class_label: String,
    pub samples: i64,
}

pub struct CurationStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl CurationStore {
    pub fn open(path: &Path) -> Result<Self, KiraError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        Self::with_connection(conn, Some(path.to_path_buf()))
    }

    pub fn open_in_memory() -> Result<Self, KiraError> {
        Self::with_connection(Connection::open_in_memory()?, None)
    }

    fn with_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self, KiraError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, KiraError> {
        self.conn
            .lock()
            .map_err(|_| KiraError::Database("connection lock poisoned".to_string()))
    }

    pub fn create_schema(&self) -> Result<(), KiraError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute_batch(SCHEMA)?;
        tx.commit()?;
        Ok(())
    }

    pub fn table_exists(&self, name: &str) -> Result<bool, KiraError> {
        let conn = self.lock()?;
        table_exists(&conn, name)
    }

    /// True when the table exists and holds at least one row.
    pub fn table_has_rows(&self, name: &str) -> Result<bool, KiraError> {
        validate_table_name(name)?;
        let conn = self.lock()?;
        if !table_exists(&conn, name)? {
            return Ok(false);
        }
        let row: Option<i64> = conn
            .query_row(&format!("SELECT 1 FROM `{name}` LIMIT 1"), [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(row.is_some())
    }

    pub fn drop_table(&self, name: &str) -> Result<(), KiraError> {
        validate_table_name(name)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute_batch(&format!("DROP TABLE IF EXISTS `{name}`;"))?;
        tx.commit()?;
        Ok(())
    }

    /// Inserts one dataset and all of its samples in a single transaction.
    /// Returns the new `datasets.ID`.
    pub fn ingest(
        &self,
        series: &str,
        class_label: &str,
        matrix: &NormalizedMatrix,
    ) -> Result<i64, KiraError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let id = ingest_in(&tx, series, class_label, matrix)?;
        tx.commit()?;
        Ok(id)
    }

    /// Appends one sample row to an existing dataset.
    pub fn append_expression(
        &self,
        dataset_id: i64,
        sample_type: &str,
        genes: &[String],
        values: &[f64],
    ) -> Result<i64, KiraError> {
        let payload = codec::encode(genes, values)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO `expression` (`DATASET_ID`, `SAMPLE_TYPE`, `EXPRESSION`) VALUES (?1, ?2, ?3)",
            params![dataset_id, sample_type, payload],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    pub fn retrieve(&self, series: &str, class_label: &str) -> Result<ExpressionTable, KiraError> {
        let conn = self.lock()?;
        if !table_exists(&conn, DATASETS_TABLE)? || !table_exists(&conn, EXPRESSION_TABLE)? {
            return Err(KiraError::DatasetNotFound(format!("{series}:{class_label}")));
        }
        let mut stmt = conn.prepare(
            "SELECT E.`SAMPLE_TYPE`, E.`EXPRESSION`
             FROM `expression` AS E
             JOIN `datasets` AS D ON E.`DATASET_ID` = D.`ID`
             WHERE D.`GSE` = ?1 AND D.`CANCER` = ?2
             ORDER BY E.`ID`",
        )?;
        let raw = stmt
            .query_map(params![series, class_label], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        if raw.is_empty() {
            return Err(KiraError::DatasetNotFound(format!("{series}:{class_label}")));
        }

        let mut genes: Option<Vec<String>> = None;
        let mut rows = Vec::with_capacity(raw.len());
        for (sample_type, blob) in raw {
            let payload = codec::decode(&blob)?;
            match &genes {
                Some(expected) if *expected != payload.genes => {
                    return Err(KiraError::CorruptPayload(format!(
                        "gene columns differ between rows of {series}:{class_label}"
                    )));
                }
                Some(_) => {}
                None => genes = Some(payload.genes),
            }
            rows.push(ExpressionRow {
                sample_type,
                values: payload.values,
            });
        }
        Ok(ExpressionTable {
            genes: genes.unwrap_or_default(),
            rows,
        })
    }

    pub fn datasets(&self) -> Result<Vec<StoredDataset>, KiraError> {
        let conn = self.lock()?;
        if !table_exists(&conn, DATASETS_TABLE)? || !table_exists(&conn, EXPRESSION_TABLE)? {
            return Ok(Vec::new());
        }
        let mut stmt = conn.prepare(
            "SELECT D.`ID`, D.`GSE`, D.`CANCER`, COUNT(E.`ID`)
             FROM `datasets` AS D
             LEFT JOIN `expression` AS E ON E.`DATASET_ID` = D.`ID`
             GROUP BY D.`ID`
             ORDER BY D.`ID`",
        )?;
        let datasets = stmt
            .query_map([], |row| {
                Ok(StoredDataset {
                    id: row.get(0)?,
                    series: row.get(1)?,
                    class_label: row.get(2)?,
                    samples: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(datasets)
    }

    /// Drops and recreates both tables, then hands a batch to `build`. The
    /// whole rebuild commits atomically when `build` returns `Ok`; otherwise
    /// the previous contents stay in place.
    pub fn rebuild<T, F>(&self, build: F) -> Result<T, KiraError>
    where
        F: FnOnce(&mut RebuildBatch<'_>) -> Result<T, KiraError>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute_batch("DROP TABLE IF EXISTS `expression`; DROP TABLE IF EXISTS `datasets`;")?;
        tx.execute_batch(SCHEMA)?;
        let mut batch = RebuildBatch { tx, ingested: 0 };
        let output = build(&mut batch)?;
        let ingested = batch.ingested;
        batch.tx.commit()?;
        info!(datasets = ingested, "expression store rebuilt");
        Ok(output)
    }
}

/// Open rebuild transaction. Each dataset goes through its own savepoint so
/// a failure discards only that dataset.
pub struct RebuildBatch<'conn> {
    tx: Transaction<'conn>,
    ingested: usize,
}

impl RebuildBatch<'_> {
    pub fn ingest(
        &mut self,
        series: &str,
        class_label: &str,
        matrix: &NormalizedMatrix,
    ) -> Result<i64, KiraError> {
        let savepoint = self.tx.savepoint()?;
        let id = ingest_in(&savepoint, series, class_label, matrix)?;
        savepoint.commit()?;
        self.ingested += 1;
        Ok(id)
    }

    pub fn ingested(&self) -> usize {
        self.ingested
    }
}

fn ingest_in(
    conn: &Connection,
    series: &str,
    class_label: &str,
    matrix: &NormalizedMatrix,
) -> Result<i64, KiraError> {
    conn.execute(
        "INSERT INTO `datasets` (`GSE`, `CANCER`) VALUES (?1, ?2)",
        params![series, class_label],
    )?;
    let dataset_id = conn.last_insert_rowid();

    let mut stmt = conn.prepare_cached(
        "INSERT INTO `expression` (`DATASET_ID`, `SAMPLE_TYPE`, `EXPRESSION`) VALUES (?1, ?2, ?3)",
    )?;
    for sample in &matrix.samples {
        let payload = codec::encode(&matrix.genes, &sample.values)?;
        stmt.execute(params![dataset_id, sample.class_label, payload])?;
    }
    debug!(
        series,
        class_label,
        dataset_id,
        samples = matrix.samples.len(),
        "dataset ingested"
    );
    Ok(dataset_id)
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool, KiraError> {
    validate_table_name(name)?;
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn validate_table_name(name: &str) -> Result<(), KiraError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .next()
            .is_some_and(|ch| ch.is_ascii_alphabetic() || ch == '_')
        && name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
    if !valid {
        return Err(KiraError::InvalidTableName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn table_names_are_validated() {
        let store = CurationStore::open_in_memory().unwrap();
        assert_matches!(
            store.drop_table("datasets; DROP TABLE x"),
            Err(KiraError::InvalidTableName(_))
        );
        assert!(!store.table_exists("datasets").unwrap());
        store.create_schema().unwrap();
        assert!(store.table_exists("datasets").unwrap());
        assert!(!store.table_has_rows("datasets").unwrap());
    }
}
