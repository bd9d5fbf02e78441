use std::fs;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::config::Settings;
use crate::domain::GeoAccession;
use crate::error::KiraError;

/// Directory layout for downloads, cached records and the expression database.
#[derive(Debug, Clone)]
pub struct Store {
    data_root: Utf8PathBuf,
    cache_root: Utf8PathBuf,
    temp_root: Utf8PathBuf,
    database_file: String,
}

impl Store {
    pub fn new(settings: &Settings) -> Self {
        Self {
            data_root: settings.data_dir.clone(),
            cache_root: settings.cache_dir.clone(),
            temp_root: settings.temp_dir.clone(),
            database_file: settings.database_file.clone(),
        }
    }

    pub fn data_root(&self) -> &Utf8Path {
        &self.data_root
    }

    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    pub fn temp_root(&self) -> &Utf8Path {
        &self.temp_root
    }

    pub fn series_dir(&self) -> Utf8PathBuf {
        self.data_root.join("GSE")
    }

    pub fn platform_dir(&self) -> Utf8PathBuf {
        self.data_root.join("GPL")
    }

    pub fn catalog_path(&self) -> Utf8PathBuf {
        self.data_root.join("datasets.json")
    }

    pub fn database_path(&self) -> Utf8PathBuf {
        self.data_root.join(&self.database_file)
    }

    pub fn cache_record_path(&self, accession: &GeoAccession) -> Utf8PathBuf {
        self.cache_root.join(accession.cache_file_name())
    }

    pub fn ensure_data_dirs(&self) -> Result<(), KiraError> {
        for dir in [
            self.data_root.clone(),
            self.series_dir(),
            self.platform_dir(),
        ] {
            ensure_dir(&dir)?;
        }
        Ok(())
    }

    pub fn ensure_cache_root(&self) -> Result<(), KiraError> {
        ensure_dir(&self.cache_root)
    }

    pub fn ensure_temp_root(&self) -> Result<(), KiraError> {
        ensure_dir(&self.temp_root)
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), KiraError> {
        let parent = path
            .parent()
            .ok_or_else(|| KiraError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let temp = Builder::new()
            .prefix("kira-ec-write")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        fs::write(temp.path(), content).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn copy_file_atomic(source: &Path, dest: &Path) -> Result<(), KiraError> {
        let parent = dest
            .parent()
            .ok_or_else(|| KiraError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let temp = Builder::new()
            .prefix("kira-ec-file")
            .tempfile_in(parent)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        fs::copy(source, temp.path()).map_err(|err| {
            KiraError::Filesystem(format!("copy {}: {err}", source.display()))
        })?;
        temp.persist(dest)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

pub fn is_nonempty_file(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

fn ensure_dir(dir: &Utf8Path) -> Result<(), KiraError> {
    fs::create_dir_all(dir.as_std_path())
        .map_err(|err| KiraError::Filesystem(format!("create {dir}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let settings = Settings::with_root(Utf8PathBuf::from("/srv/kira"));
        let store = Store::new(&settings);
        let acc: GeoAccession = "GPL570".parse().unwrap();

        assert!(store.series_dir().ends_with("data/GSE"));
        assert!(store.platform_dir().ends_with("data/GPL"));
        assert!(store.database_path().ends_with("data/expression.db"));
        assert!(store.cache_record_path(&acc).ends_with("cache/GPL570.cache"));
    }

    #[test]
    fn atomic_write_replaces_content() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("nested").join("a.bin")).unwrap();
        Store::write_bytes_atomic(&path, b"first").unwrap();
        Store::write_bytes_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read(path.as_std_path()).unwrap(), b"second");
        assert!(is_nonempty_file(path.as_std_path()));
    }
}
