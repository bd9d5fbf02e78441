use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::cache::ResourceCache;
use crate::catalog::{CatalogClient, CatalogIndex};
use crate::config::Settings;
use crate::curation_store::{
    CurationStore, DATASETS_TABLE, EXPRESSION_TABLE, ExpressionTable, StoredDataset,
};
use crate::domain::DatasetKey;
use crate::downloader::{DatasetDownloader, DownloadAction, DownloadReport};
use crate::error::KiraError;
use crate::fetcher::{FetchOptions, RecordFetcher};
use crate::geo::GeoClient;
use crate::matrix::{GeneMapping, MatrixLoader};
use crate::soft::GeoRecord;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn phase(sink: &dyn ProgressSink, message: String) {
    sink.event(ProgressEvent {
        message,
        elapsed: None,
    });
}

/// Drops repeated keys, keeping the first occurrence of each.
fn unique_keys(keys: Vec<DatasetKey>) -> Vec<DatasetKey> {
    let mut seen = HashSet::with_capacity(keys.len());
    keys.into_iter()
        .filter(|key| seen.insert(key.clone()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CurationOutcome {
    Ingested,
    /// Ingested with probe ids as columns.
    IngestedWithoutMapping,
    DownloadFailed,
    LoadFailed,
    IngestFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurationItem {
    pub key: DatasetKey,
    pub outcome: CurationOutcome,
    pub dataset_id: Option<i64>,
    pub samples: usize,
    pub genes: usize,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurationReport {
    pub database: String,
    pub items: Vec<CurationItem>,
    pub elapsed_ms: u128,
}

impl CurationReport {
    pub fn ingested(&self) -> usize {
        self.items
            .iter()
            .filter(|item| {
                matches!(
                    item.outcome,
                    CurationOutcome::Ingested | CurationOutcome::IngestedWithoutMapping
                )
            })
            .count()
    }

    pub fn failed(&self) -> Vec<&CurationItem> {
        self.items
            .iter()
            .filter(|item| {
                !matches!(
                    item.outcome,
                    CurationOutcome::Ingested | CurationOutcome::IngestedWithoutMapping
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub database: String,
    pub curated: bool,
    pub report: Option<CurationReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogResult {
    pub entries: Vec<crate::catalog::CatalogEntry>,
    pub selected: Vec<DatasetKey>,
}

/// Wires the pipeline together: catalog, downloads, normalization and the
/// expression store.
pub struct App<G: GeoClient, C: CatalogClient> {
    settings: Settings,
    store: Store,
    fetcher: RecordFetcher<G>,
    catalog: C,
}

impl<G: GeoClient, C: CatalogClient> App<G, C> {
    pub fn new(settings: Settings, geo: G, catalog: C) -> Self {
        let store = Store::new(&settings);
        let cache = ResourceCache::new(store.cache_root().to_owned());
        let fetcher = RecordFetcher::new(geo, cache, store.clone());
        Self {
            settings,
            store,
            fetcher,
            catalog,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn catalog(&self) -> Result<CatalogIndex, KiraError> {
        CatalogIndex::build(
            &self.catalog,
            &self.settings,
            self.store.data_root().as_std_path(),
        )
    }

    pub fn catalog_listing(&self, sink: &dyn ProgressSink) -> Result<CatalogResult, KiraError> {
        phase(sink, "phase=Resolve; downloading catalog".to_string());
        let index = self.catalog()?;
        Ok(CatalogResult {
            selected: index.select(&self.settings.selection),
            entries: index.entries().to_vec(),
        })
    }

    pub fn fetch_record(
        &self,
        accession: &str,
        directory: Option<&Path>,
        options: FetchOptions,
    ) -> Result<GeoRecord, KiraError> {
        self.fetcher.fetch(accession, directory, options)
    }

    pub fn download(
        &self,
        keys: &[DatasetKey],
        sink: &dyn ProgressSink,
    ) -> Result<DownloadReport, KiraError> {
        phase(sink, "phase=Resolve; downloading catalog".to_string());
        let index = self.catalog()?;
        phase(sink, format!("phase=Download; {} datasets", keys.len()));
        let downloader = DatasetDownloader::new(
            &index,
            &self.fetcher,
            &self.catalog,
            &self.store,
            self.settings.workers,
        )?;
        downloader.download(keys)
    }

    /// Downloads, normalizes and stores every selected dataset, replacing
    /// the previous contents of the expression store. `None` selects by the
    /// configured filter.
    pub fn curate(
        &self,
        selection: Option<Vec<DatasetKey>>,
        sink: &dyn ProgressSink,
    ) -> Result<CurationReport, KiraError> {
        let start = Instant::now();
        phase(sink, "phase=Resolve; downloading catalog".to_string());
        let index = self.catalog()?;
        let selection = match selection {
            Some(keys) => unique_keys(keys),
            None => index.select(&self.settings.selection),
        };
        info!(datasets = selection.len(), "curation started");

        phase(sink, format!("phase=Download; {} datasets", selection.len()));
        let downloader = DatasetDownloader::new(
            &index,
            &self.fetcher,
            &self.catalog,
            &self.store,
            self.settings.workers,
        )?;
        let downloads = downloader.download(&selection)?;
        let platforms = downloader.into_platforms();

        let database = self.store.database_path();
        let curation = CurationStore::open(database.as_std_path())?;
        let loader = MatrixLoader::new(&index, &self.store, &platforms);

        phase(sink, "phase=Store; rebuilding expression store".to_string());
        let items = curation.rebuild(|batch| {
            let mut items = Vec::with_capacity(selection.len());
            for key in &selection {
                if let Some(failed) = downloads
                    .matrices
                    .iter()
                    .find(|item| &item.key == key && item.action == DownloadAction::Failed)
                {
                    items.push(CurationItem {
                        key: key.clone(),
                        outcome: CurationOutcome::DownloadFailed,
                        dataset_id: None,
                        samples: 0,
                        genes: 0,
                        detail: failed.error.clone(),
                    });
                    continue;
                }

                let loaded = match loader.load(key) {
                    Ok(loaded) => loaded,
                    Err(err) => {
                        warn!(dataset = %key, error = %err, "skipping dataset");
                        items.push(CurationItem {
                            key: key.clone(),
                            outcome: CurationOutcome::LoadFailed,
                            dataset_id: None,
                            samples: 0,
                            genes: 0,
                            detail: Some(err.to_string()),
                        });
                        continue;
                    }
                };

                let (outcome, detail) = match &loaded.mapping {
                    GeneMapping::Mapped { .. } => (CurationOutcome::Ingested, None),
                    GeneMapping::NoGeneMapping { reason } => {
                        (CurationOutcome::IngestedWithoutMapping, Some(reason.clone()))
                    }
                };
                let matrix = &loaded.matrix;
                match batch.ingest(&key.series, &key.category, matrix) {
                    Ok(id) => {
                        phase(sink, format!("phase=Store; stored {key}"));
                        items.push(CurationItem {
                            key: key.clone(),
                            outcome,
                            dataset_id: Some(id),
                            samples: matrix.samples.len(),
                            genes: matrix.genes.len(),
                            detail,
                        });
                    }
                    Err(err) => {
                        warn!(dataset = %key, error = %err, "dataset ingest rolled back");
                        items.push(CurationItem {
                            key: key.clone(),
                            outcome: CurationOutcome::IngestFailed,
                            dataset_id: None,
                            samples: 0,
                            genes: 0,
                            detail: Some(err.to_string()),
                        });
                    }
                }
            }
            Ok(items)
        })?;

        let report = CurationReport {
            database: database.to_string(),
            items,
            elapsed_ms: start.elapsed().as_millis(),
        };
        info!(
            ingested = report.ingested(),
            failed = report.failed().len(),
            "curation finished"
        );
        sink.event(ProgressEvent {
            message: format!("phase=Done; {} datasets stored", report.ingested()),
            elapsed: Some(start.elapsed()),
        });
        Ok(report)
    }

    /// Curates only when the database is missing or either table is empty.
    pub fn ensure_curated(&self, sink: &dyn ProgressSink) -> Result<CheckResult, KiraError> {
        let database = self.store.database_path();
        if database.as_std_path().is_file() {
            let curation = CurationStore::open(database.as_std_path())?;
            if curation.table_has_rows(EXPRESSION_TABLE)? && curation.table_has_rows(DATASETS_TABLE)?
            {
                phase(sink, "phase=Verify; expression store is populated".to_string());
                return Ok(CheckResult {
                    database: database.to_string(),
                    curated: false,
                    report: None,
                });
            }
        }
        info!(database = %database, "expression store missing or empty, curating");
        let report = self.curate(None, sink)?;
        Ok(CheckResult {
            database: database.to_string(),
            curated: true,
            report: Some(report),
        })
    }

    pub fn retrieve(&self, series: &str, class_label: &str) -> Result<ExpressionTable, KiraError> {
        let database = self.store.database_path();
        if !database.as_std_path().is_file() {
            return Err(KiraError::DatasetNotFound(format!("{series}:{class_label}")));
        }
        CurationStore::open(database.as_std_path())?.retrieve(series, class_label)
    }

    pub fn stored_datasets(&self) -> Result<Vec<StoredDataset>, KiraError> {
        let database = self.store.database_path();
        if !database.as_std_path().is_file() {
            return Ok(Vec::new());
        }
        CurationStore::open(database.as_std_path())?.datasets()
    }
}
