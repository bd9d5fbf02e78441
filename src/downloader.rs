use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::{CatalogClient, CatalogIndex};
use crate::domain::DatasetKey;
use crate::error::KiraError;
use crate::fetcher::{FetchOptions, RecordFetcher};
use crate::geo::GeoClient;
use crate::soft::PlatformRecord;
use crate::store::{Store, is_nonempty_file};

type PlatformSlot = Arc<Mutex<Option<Result<Arc<PlatformRecord>, KiraError>>>>;

/// Platform records fetched during a run, keyed by accession. Concurrent
/// requests for one accession wait on the same slot, so each accession is
/// fetched at most once per registry.
#[derive(Default)]
pub struct PlatformRegistry {
    slots: Mutex<HashMap<String, PlatformSlot>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_fetch<F>(&self, accession: &str, fetch: F) -> Result<Arc<PlatformRecord>, KiraError>
    where
        F: FnOnce() -> Result<PlatformRecord, KiraError>,
    {
        let slot = {
            let mut slots = self
                .slots
                .lock()
                .map_err(|_| KiraError::Filesystem("platform registry poisoned".to_string()))?;
            Arc::clone(slots.entry(accession.to_string()).or_default())
        };
        let mut guard = slot
            .lock()
            .map_err(|_| KiraError::Filesystem("platform slot poisoned".to_string()))?;
        if let Some(result) = guard.as_ref() {
            return result.clone();
        }
        let result = fetch().map(Arc::new);
        *guard = Some(result.clone());
        result
    }

    /// A successfully fetched platform, if any.
    pub fn get(&self, accession: &str) -> Option<Arc<PlatformRecord>> {
        let slot = self.slots.lock().ok()?.get(accession).cloned()?;
        let guard = slot.lock().ok()?;
        guard.as_ref().and_then(|result| result.as_ref().ok().cloned())
    }

    pub fn insert(&self, record: PlatformRecord) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.insert(
                record.accession.clone(),
                Arc::new(Mutex::new(Some(Ok(Arc::new(record))))),
            );
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadAction {
    Downloaded,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatrixDownload {
    pub key: DatasetKey,
    pub path: PathBuf,
    pub action: DownloadAction,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlatformDownload {
    pub accession: String,
    pub ok: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct DownloadReport {
    pub matrices: Vec<MatrixDownload>,
    pub platforms: Vec<PlatformDownload>,
}

impl DownloadReport {
    pub fn failed_keys(&self) -> Vec<DatasetKey> {
        self.matrices
            .iter()
            .filter(|item| item.action == DownloadAction::Failed)
            .map(|item| item.key.clone())
            .collect()
    }
}

/// Downloads matrix CSVs for catalog selections plus their platform records.
pub struct DatasetDownloader<'a, G: GeoClient, C: CatalogClient> {
    index: &'a CatalogIndex,
    fetcher: &'a RecordFetcher<G>,
    client: &'a C,
    store: &'a Store,
    platforms: PlatformRegistry,
    pool: rayon::ThreadPool,
}

struct Job {
    key: DatasetKey,
    url: String,
    path: PathBuf,
}

impl<'a, G: GeoClient, C: CatalogClient> DatasetDownloader<'a, G, C> {
    pub fn new(
        index: &'a CatalogIndex,
        fetcher: &'a RecordFetcher<G>,
        client: &'a C,
        store: &'a Store,
        workers: usize,
    ) -> Result<Self, KiraError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|index| format!("kira-download-{index}"))
            .build()
            .map_err(|err| KiraError::WorkerPool(err.to_string()))?;
        Ok(Self {
            index,
            fetcher,
            client,
            store,
            platforms: PlatformRegistry::new(),
            pool,
        })
    }

    pub fn platforms(&self) -> &PlatformRegistry {
        &self.platforms
    }

    pub fn into_platforms(self) -> PlatformRegistry {
        self.platforms
    }

    pub fn download(&self, selection: &[DatasetKey]) -> Result<DownloadReport, KiraError> {
        let mut jobs = Vec::with_capacity(selection.len());
        let mut platforms = BTreeSet::new();
        let mut seen = HashSet::with_capacity(selection.len());
        for key in selection.iter().filter(|key| seen.insert(*key)) {
            let entry = self
                .index
                .get(key)
                .ok_or_else(|| KiraError::DatasetNotFound(key.to_string()))?;
            jobs.push(Job {
                key: key.clone(),
                url: entry.url.clone(),
                path: self.store.series_dir().as_std_path().join(entry.file_name()?),
            });
            platforms.insert(entry.platform.clone());
        }

        self.store.ensure_data_dirs()?;

        let (matrices, platforms): (Vec<MatrixDownload>, Vec<PlatformDownload>) =
            self.pool.install(|| {
                let matrices = jobs
                    .into_par_iter()
                    .map(|job| self.download_matrix(job))
                    .collect();
                let platforms = platforms
                    .into_par_iter()
                    .map(|accession| self.download_platform(accession))
                    .collect();
                (matrices, platforms)
            });

        info!(
            matrices = matrices.len(),
            platforms = platforms.len(),
            "download finished"
        );
        Ok(DownloadReport {
            matrices,
            platforms,
        })
    }

    fn download_matrix(&self, job: Job) -> MatrixDownload {
        if is_nonempty_file(&job.path) {
            return MatrixDownload {
                key: job.key,
                path: job.path,
                action: DownloadAction::Skipped,
                error: None,
            };
        }
        match self.client.download(&job.url, &job.path) {
            Ok(()) => MatrixDownload {
                key: job.key,
                path: job.path,
                action: DownloadAction::Downloaded,
                error: None,
            },
            Err(err) => {
                warn!(dataset = %job.key, error = %err, "matrix download failed");
                MatrixDownload {
                    key: job.key,
                    path: job.path,
                    action: DownloadAction::Failed,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    fn download_platform(&self, accession: String) -> PlatformDownload {
        let directory = self.store.platform_dir();
        let result = self.platforms.get_or_fetch(&accession, || {
            let options = FetchOptions {
                silent: true,
                make_dir: true,
                use_cache: true,
            };
            let record = self
                .fetcher
                .fetch(&accession, Some(directory.as_std_path()), options)?;
            record.into_platform().ok_or_else(|| {
                KiraError::InvalidAccession(format!("{accession} is not a platform accession"))
            })
        });
        match result {
            Ok(_) => PlatformDownload {
                accession,
                ok: true,
                error: None,
            },
            Err(err) => {
                warn!(accession = %accession, error = %err, "platform fetch failed");
                PlatformDownload {
                    accession,
                    ok: false,
                    error: Some(err.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn platform(accession: &str) -> PlatformRecord {
        PlatformRecord {
            accession: accession.to_string(),
            metadata: Default::default(),
            columns: Vec::new(),
            table: Default::default(),
        }
    }

    #[test]
    fn registry_fetches_each_accession_once_across_threads() {
        let registry = PlatformRegistry::new();
        let calls = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    registry
                        .get_or_fetch("GPL570", || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(10));
                            Ok(platform("GPL570"))
                        })
                        .unwrap();
                });
            }
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.get("GPL570").is_some());
    }

    #[test]
    fn registry_remembers_failures() {
        let registry = PlatformRegistry::new();
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            let result = registry.get_or_fetch("GPL1", || {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(KiraError::AccessionNotFound("GPL1".to_string()))
            });
            assert!(result.is_err());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.get("GPL1").is_none());
    }
}
