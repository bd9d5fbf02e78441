use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

pub const DEFAULT_CONFIG_FILE: &str = "kira-ec.json";
pub const DEFAULT_CATALOG_URL: &str = "https://gist.githubusercontent.com/Kabilan108/3d11266abdd3c237d359dd7c11a40871/raw/ff2af81ae70afaba99233400f9d79e30eb40942e/cumida.json";
pub const DEFAULT_CATALOG_BASE_URL: &str = "https://sbcb.inf.ufrgs.br";
pub const DEFAULT_DATABASE_FILE: &str = "expression.db";

/// On-disk config document. Every field is optional.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub temp_dir: Option<String>,
    #[serde(default)]
    pub database_file: Option<String>,
    #[serde(default)]
    pub catalog_url: Option<String>,
    #[serde(default)]
    pub catalog_base_url: Option<String>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub selection: Option<SelectionFilter>,
}

/// Which catalog entries a default curation run picks up.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SelectionFilter {
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub classes: Option<u32>,
}

impl Default for SelectionFilter {
    fn default() -> Self {
        Self {
            platform: Some("GPL570".to_string()),
            classes: Some(2),
        }
    }
}

/// Resolved settings handed to every component constructor.
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: Utf8PathBuf,
    pub cache_dir: Utf8PathBuf,
    pub temp_dir: Utf8PathBuf,
    pub database_file: String,
    pub catalog_url: String,
    pub catalog_base_url: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub workers: usize,
    pub selection: SelectionFilter,
}

impl Settings {
    /// Settings rooted under a single directory, used by tests and scratch runs.
    pub fn with_root(root: Utf8PathBuf) -> Self {
        Self {
            data_dir: root.join("data"),
            cache_dir: root.join("cache"),
            temp_dir: root.join("tmp"),
            database_file: DEFAULT_DATABASE_FILE.to_string(),
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            catalog_base_url: DEFAULT_CATALOG_BASE_URL.to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 300,
            workers: 4,
            selection: SelectionFilter::default(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<Settings, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let mut config: Config = if path.is_none() && !config_path.exists() {
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content).map_err(|err| KiraError::ConfigParse(err.to_string()))?
        };

        if let Ok(dir) = std::env::var("KIRA_EC_DATA_DIR")
            && !dir.trim().is_empty()
        {
            config.data_dir = Some(dir.trim().to_string());
        }
        if let Ok(dir) = std::env::var("KIRA_EC_CACHE_DIR")
            && !dir.trim().is_empty()
        {
            config.cache_dir = Some(dir.trim().to_string());
        }

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<Settings, KiraError> {
        let home = BaseDirs::new()
            .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.home_dir().to_path_buf()).ok());

        let data_dir = match config.data_dir {
            Some(dir) => Utf8PathBuf::from(dir),
            None => home
                .as_ref()
                .map(|home| home.join(".kira-ec"))
                .ok_or_else(|| {
                    KiraError::Filesystem("unable to resolve data directory".to_string())
                })?,
        };
        let cache_dir = match config.cache_dir {
            Some(dir) => Utf8PathBuf::from(dir),
            None => home
                .as_ref()
                .map(|home| home.join(".cache").join("kira-expression-curator"))
                .ok_or_else(|| {
                    KiraError::Filesystem("unable to resolve cache directory".to_string())
                })?,
        };
        let temp_dir = match config.temp_dir {
            Some(dir) => Utf8PathBuf::from(dir),
            None => Utf8PathBuf::from_path_buf(std::env::temp_dir().join("kira-ec"))
                .map_err(|_| KiraError::Filesystem("invalid temp path".to_string()))?,
        };

        let workers = config.workers.unwrap_or(4);
        if workers == 0 {
            return Err(KiraError::ConfigParse(
                "workers must be at least 1".to_string(),
            ));
        }

        Ok(Settings {
            data_dir,
            cache_dir,
            temp_dir,
            database_file: config
                .database_file
                .unwrap_or_else(|| DEFAULT_DATABASE_FILE.to_string()),
            catalog_url: config
                .catalog_url
                .unwrap_or_else(|| DEFAULT_CATALOG_URL.to_string()),
            catalog_base_url: config
                .catalog_base_url
                .unwrap_or_else(|| DEFAULT_CATALOG_BASE_URL.to_string()),
            connect_timeout_secs: config.connect_timeout_secs.unwrap_or(10),
            request_timeout_secs: config.request_timeout_secs.unwrap_or(300),
            workers,
            selection: config.selection.unwrap_or_default(),
        })
    }
}
