use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::GeoAccession;
use crate::error::KiraError;
use crate::soft::GeoRecord;
use crate::store::Store;

/// Envelope written to `{accession}.cache`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedRecord {
    pub accession: String,
    pub cached_at: String,
    pub record: GeoRecord,
}

#[derive(Serialize)]
struct CachedRecordRef<'a> {
    accession: &'a str,
    cached_at: String,
    record: &'a GeoRecord,
}

/// Accession-keyed record cache. Entries never expire: GEO records are
/// immutable once published.
#[derive(Debug, Clone)]
pub struct ResourceCache {
    root: Utf8PathBuf,
}

impl ResourceCache {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn path_for(&self, accession: &GeoAccession) -> Utf8PathBuf {
        self.root.join(accession.cache_file_name())
    }

    pub fn contains(&self, accession: &GeoAccession) -> bool {
        self.path_for(accession).as_std_path().is_file()
    }

    /// Returns the cached record, or `None` when absent or unreadable.
    /// Unreadable entries are logged so the caller can re-fetch.
    pub fn get(&self, accession: &GeoAccession) -> Option<GeoRecord> {
        let path = self.path_for(accession);
        let bytes = match fs::read(path.as_std_path()) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(accession = %accession, path = %path, error = %err, "failed to read cached record");
                return None;
            }
        };
        let cached: CachedRecord = match bincode::deserialize(&bytes) {
            Ok(cached) => cached,
            Err(err) => {
                warn!(accession = %accession, path = %path, error = %err, "failed to decode cached record");
                return None;
            }
        };
        if cached.accession != accession.as_str() || cached.record.accession() != accession.as_str()
        {
            warn!(
                accession = %accession,
                found = %cached.accession,
                "cached record belongs to another accession"
            );
            return None;
        }
        debug!(accession = %accession, cached_at = %cached.cached_at, "cache hit");
        Some(cached.record)
    }

    pub fn put(&self, accession: &GeoAccession, record: &GeoRecord) -> Result<(), KiraError> {
        let cached = CachedRecordRef {
            accession: accession.as_str(),
            cached_at: chrono::Utc::now().to_rfc3339(),
            record,
        };
        let bytes =
            bincode::serialize(&cached).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Store::write_bytes_atomic(&self.path_for(accession), &bytes)
    }

    pub fn remove(&self, accession: &GeoAccession) -> Result<(), KiraError> {
        let path = self.path_for(accession);
        match fs::remove_file(path.as_std_path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(KiraError::Filesystem(err.to_string())),
        }
    }
}
