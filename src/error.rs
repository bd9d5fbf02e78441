use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Clone, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid GEO accession (expected GPLxxxx or GSExxxx): {0}")]
    InvalidAccession(String),

    #[error("invalid dataset key (expected GSExxxx:Type): {0}")]
    InvalidDatasetKey(String),

    #[error("dataset is not part of the catalog index: {0}")]
    InvalidSelection(String),

    #[error("invalid table name: {0}")]
    InvalidTableName(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("GEO accession not found: {0}")]
    AccessionNotFound(String),

    #[error("GEO request failed: {0}")]
    GeoHttp(String),

    #[error("GEO returned status {status}: {message}")]
    GeoStatus { status: u16, message: String },

    #[error("failed to parse SOFT record {accession}: {message}")]
    SoftParse { accession: String, message: String },

    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("download failed for {url}: {message}")]
    Download { url: String, message: String },

    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("expression matrix not found: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to parse expression matrix {path}: {message}")]
    MatrixParse { path: PathBuf, message: String },

    #[error("database error: {0}")]
    Database(String),

    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("corrupt expression payload: {0}")]
    CorruptPayload(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to start download workers: {0}")]
    WorkerPool(String),
}

/// Failure classes callers use to decide whether to skip, retry or abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    InvalidInput,
    NotFound,
    TransientIo,
    SchemaViolation,
    Other,
}

impl KiraError {
    pub fn class(&self) -> ErrorClass {
        match self {
            KiraError::InvalidAccession(_)
            | KiraError::InvalidDatasetKey(_)
            | KiraError::InvalidSelection(_)
            | KiraError::InvalidTableName(_)
            | KiraError::ConfigRead(_)
            | KiraError::ConfigParse(_) => ErrorClass::InvalidInput,
            KiraError::AccessionNotFound(_)
            | KiraError::DatasetNotFound(_)
            | KiraError::FileNotFound(_) => ErrorClass::NotFound,
            KiraError::GeoHttp(_)
            | KiraError::Download { .. }
            | KiraError::CatalogUnavailable(_)
            | KiraError::Filesystem(_) => ErrorClass::TransientIo,
            KiraError::GeoStatus { status, .. } if *status == 404 => ErrorClass::NotFound,
            KiraError::GeoStatus { .. } => ErrorClass::TransientIo,
            KiraError::SchemaViolation(_) | KiraError::CorruptPayload(_) => {
                ErrorClass::SchemaViolation
            }
            KiraError::SoftParse { .. }
            | KiraError::MatrixParse { .. }
            | KiraError::Database(_)
            | KiraError::WorkerPool(_) => ErrorClass::Other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.class() == ErrorClass::NotFound
    }
}

impl From<rusqlite::Error> for KiraError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::ConstraintViolation) => {
                KiraError::SchemaViolation(err.to_string())
            }
            _ => KiraError::Database(err.to_string()),
        }
    }
}
