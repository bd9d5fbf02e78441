use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::cache::ResourceCache;
use crate::domain::GeoAccession;
use crate::error::KiraError;
use crate::geo::GeoClient;
use crate::soft::{self, GeoRecord};
use crate::store::{Store, is_nonempty_file};

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    pub silent: bool,
    pub make_dir: bool,
    pub use_cache: bool,
}

/// Where a fetched record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    Cache,
    LocalFile,
    Network,
}

#[derive(Debug, Clone)]
pub struct Fetched {
    pub record: GeoRecord,
    pub source: FetchSource,
    pub raw_path: Option<PathBuf>,
}

macro_rules! report {
    ($silent:expr, $($arg:tt)+) => {
        if $silent {
            debug!($($arg)+);
        } else {
            info!($($arg)+);
        }
    };
}

/// Resolves GEO accessions to parsed records: cache, then a raw file already
/// on disk, then the network.
pub struct RecordFetcher<G: GeoClient> {
    client: G,
    cache: ResourceCache,
    store: Store,
}

impl<G: GeoClient> RecordFetcher<G> {
    pub fn new(client: G, cache: ResourceCache, store: Store) -> Self {
        Self {
            client,
            cache,
            store,
        }
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    pub fn fetch(
        &self,
        accession: &str,
        directory: Option<&Path>,
        options: FetchOptions,
    ) -> Result<GeoRecord, KiraError> {
        self.fetch_detailed(accession, directory, options)
            .map(|fetched| fetched.record)
    }

    pub fn fetch_detailed(
        &self,
        accession: &str,
        directory: Option<&Path>,
        options: FetchOptions,
    ) -> Result<Fetched, KiraError> {
        let accession: GeoAccession = accession.parse()?;
        let directory = self.resolve_directory(directory, options.make_dir)?;

        if options.use_cache
            && let Some(record) = self.cache.get(&accession)
        {
            report!(options.silent, accession = %accession, "loading cached record");
            return Ok(Fetched {
                record,
                source: FetchSource::Cache,
                raw_path: None,
            });
        }

        let raw_path = directory.join(accession.raw_file_name());
        let mut fetched = None;
        if is_nonempty_file(&raw_path) {
            report!(options.silent, accession = %accession, path = %raw_path.display(), "parsing local record");
            match soft::parse_file(&accession, &raw_path) {
                Ok(record) => fetched = Some((record, FetchSource::LocalFile)),
                Err(err) => {
                    warn!(accession = %accession, error = %err, "local record unreadable, downloading again");
                }
            }
        }

        let (record, source) = match fetched {
            Some(found) => found,
            None => {
                report!(options.silent, accession = %accession, "downloading record");
                self.client.download_record(&accession, &raw_path)?;
                let record = soft::parse_file(&accession, &raw_path)?;
                (record, FetchSource::Network)
            }
        };

        if options.use_cache
            && let Err(err) = self.cache.put(&accession, &record)
        {
            warn!(accession = %accession, error = %err, "failed to cache record");
        }

        Ok(Fetched {
            record,
            source,
            raw_path: Some(raw_path),
        })
    }

    fn resolve_directory(
        &self,
        directory: Option<&Path>,
        make_dir: bool,
    ) -> Result<PathBuf, KiraError> {
        let Some(directory) = directory else {
            self.store.ensure_temp_root()?;
            return Ok(self.store.temp_root().as_std_path().to_path_buf());
        };
        if !directory.is_dir() {
            if !make_dir {
                return Err(KiraError::Filesystem(format!(
                    "directory does not exist: {}",
                    directory.display()
                )));
            }
            fs::create_dir_all(directory)
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        Ok(directory.to_path_buf())
    }
}
