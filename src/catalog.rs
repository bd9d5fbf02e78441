use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{SelectionFilter, Settings};
use crate::domain::DatasetKey;
use crate::error::KiraError;
use crate::store::Store;

pub trait CatalogClient: Send + Sync {
    /// Copies `source` to `destination`. `source` is either an http(s)/ftp
    /// URL or a local path.
    fn download(&self, source: &str, destination: &Path) -> Result<(), KiraError>;
}

impl<T: CatalogClient + ?Sized> CatalogClient for &T {
    fn download(&self, source: &str, destination: &Path) -> Result<(), KiraError> {
        (**self).download(source, destination)
    }
}

#[derive(Clone)]
pub struct CatalogHttpClient {
    client: Client,
}

impl CatalogHttpClient {
    pub fn new(settings: &Settings) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-ec/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::Filesystem(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|err| KiraError::Download {
                url: settings.catalog_url.clone(),
                message: err.to_string(),
            })?;
        Ok(Self { client })
    }
}

impl CatalogClient for CatalogHttpClient {
    fn download(&self, source: &str, destination: &Path) -> Result<(), KiraError> {
        if !is_remote(source) {
            return Store::copy_file_atomic(Path::new(source), destination);
        }
        let download_err = |message: String| KiraError::Download {
            url: source.to_string(),
            message,
        };
        let mut response = self
            .client
            .get(source)
            .send()
            .map_err(|err| download_err(err.to_string()))?;
        if response.status().as_u16() == 404 {
            return Err(KiraError::DatasetNotFound(source.to_string()));
        }
        if !response.status().is_success() {
            return Err(download_err(format!("status {}", response.status().as_u16())));
        }
        let parent = destination
            .parent()
            .ok_or_else(|| KiraError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix("kira-ec-download")
            .tempfile_in(parent)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, temp.as_file_mut())
            .map_err(|err| download_err(err.to_string()))?;
        temp.persist(destination)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

pub fn is_remote(source: &str) -> bool {
    let lower = source.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("ftp://")
}

/// Last path segment of a URL, ignoring any query string.
pub fn file_name_from_url(url: &str) -> Option<&str> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub series: String,
    pub category: String,
    pub platform: String,
    pub manufacturer: String,
    pub classes: u32,
    pub samples: u32,
    pub genes: u32,
    pub url: String,
}

impl CatalogEntry {
    pub fn key(&self) -> DatasetKey {
        DatasetKey::new(self.series.clone(), self.category.clone())
    }

    pub fn file_name(&self) -> Result<&str, KiraError> {
        file_name_from_url(&self.url).ok_or_else(|| KiraError::Download {
            url: self.url.clone(),
            message: "URL has no file name".to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IdValue {
    Number(u64),
    Text(String),
}

impl IdValue {
    fn render(&self) -> String {
        match self {
            IdValue::Number(value) => value.to_string(),
            IdValue::Text(value) => value.trim().to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CountValue {
    Number(u32),
    Text(String),
}

impl CountValue {
    fn value(&self) -> Option<u32> {
        match self {
            CountValue::Number(value) => Some(*value),
            CountValue::Text(value) => value.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDownloads {
    csv: String,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    gse: IdValue,
    platform: IdValue,
    #[serde(default)]
    manufacturer: Option<String>,
    #[serde(rename = "type")]
    category: String,
    classes: CountValue,
    samples: CountValue,
    genes: CountValue,
    downloads: RawDownloads,
}

/// The curated dataset catalog, rebuilt from scratch on every refresh.
#[derive(Debug, Clone)]
pub struct CatalogIndex {
    entries: Vec<CatalogEntry>,
    downloads: BTreeMap<DatasetKey, String>,
}

impl CatalogIndex {
    pub fn build<C: CatalogClient>(
        client: &C,
        settings: &Settings,
        target_dir: &Path,
    ) -> Result<Self, KiraError> {
        fs::create_dir_all(target_dir).map_err(|err| {
            KiraError::CatalogUnavailable(format!("create {}: {err}", target_dir.display()))
        })?;
        let path = target_dir.join("datasets.json");
        client
            .download(&settings.catalog_url, &path)
            .map_err(|err| KiraError::CatalogUnavailable(err.to_string()))?;
        let content = fs::read_to_string(&path)
            .map_err(|err| KiraError::CatalogUnavailable(err.to_string()))?;
        let index = Self::from_json(&content, &settings.catalog_base_url)?;
        info!(entries = index.len(), "catalog index built");
        Ok(index)
    }

    pub fn from_json(content: &str, base_url: &str) -> Result<Self, KiraError> {
        let raw: Vec<RawEntry> = serde_json::from_str(content)
            .map_err(|err| KiraError::CatalogUnavailable(format!("invalid catalog JSON: {err}")))?;
        let entries = raw
            .into_iter()
            .map(|entry| {
                let series = format!("GSE{}", entry.gse.render());
                let count = |value: &CountValue, field: &str| {
                    value.value().ok_or_else(|| {
                        KiraError::CatalogUnavailable(format!(
                            "non-numeric {field} for {series}"
                        ))
                    })
                };
                Ok(CatalogEntry {
                    platform: format!("GPL{}", entry.platform.render()),
                    manufacturer: entry.manufacturer.unwrap_or_default(),
                    category: entry.category.trim().to_string(),
                    classes: count(&entry.classes, "classes")?,
                    samples: count(&entry.samples, "samples")?,
                    genes: count(&entry.genes, "genes")?,
                    url: format!("{}{}", base_url.trim_end_matches('/'), entry.downloads.csv),
                    series,
                })
            })
            .collect::<Result<Vec<_>, KiraError>>()?;
        Self::from_entries(entries)
    }

    pub fn from_entries(mut entries: Vec<CatalogEntry>) -> Result<Self, KiraError> {
        entries.sort_by(|a, b| {
            a.platform
                .cmp(&b.platform)
                .then_with(|| a.category.cmp(&b.category))
        });
        let mut downloads = BTreeMap::new();
        for entry in &entries {
            if downloads.insert(entry.key(), entry.url.clone()).is_some() {
                return Err(KiraError::CatalogUnavailable(format!(
                    "duplicate catalog entry {}",
                    entry.key()
                )));
            }
        }
        Ok(Self { entries, downloads })
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &DatasetKey) -> bool {
        self.downloads.contains_key(key)
    }

    pub fn get(&self, key: &DatasetKey) -> Option<&CatalogEntry> {
        if !self.contains(key) {
            return None;
        }
        self.entries
            .iter()
            .find(|entry| entry.series == key.series && entry.category == key.category)
    }

    pub fn url(&self, key: &DatasetKey) -> Option<&str> {
        self.downloads.get(key).map(String::as_str)
    }

    pub fn downloads(&self) -> &BTreeMap<DatasetKey, String> {
        &self.downloads
    }

    pub fn select(&self, filter: &SelectionFilter) -> Vec<DatasetKey> {
        self.entries
            .iter()
            .filter(|entry| {
                filter
                    .platform
                    .as_deref()
                    .is_none_or(|platform| entry.platform == platform)
            })
            .filter(|entry| filter.classes.is_none_or(|classes| entry.classes == classes))
            .map(CatalogEntry::key)
            .collect()
    }
}
