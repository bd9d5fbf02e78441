#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use camino::Utf8PathBuf;
use flate2::Compression;
use flate2::write::GzEncoder;

use kira_expression_curator::catalog::CatalogClient;
use kira_expression_curator::config::Settings;
use kira_expression_curator::domain::GeoAccession;
use kira_expression_curator::error::KiraError;
use kira_expression_curator::geo::GeoClient;

pub const BASE_URL: &str = "https://mock.test";
pub const CATALOG_URL: &str = "https://mock.test/cumida.json";
pub const BREAST_URL: &str = "https://mock.test/cumida/Breast_GSE45827.csv";
pub const PROSTATE_URL: &str = "https://mock.test/cumida/Prostate_GSE26910.csv";
pub const LIVER_URL: &str = "https://mock.test/cumida/Liver_GSE10000.csv";

pub const CATALOG_JSON: &str = r#"[
  {"gse": 26910, "platform": 570, "manufacturer": "Affymetrix", "type": "Prostate",
   "classes": 2, "samples": 3, "genes": 4,
   "downloads": {"csv": "/cumida/Prostate_GSE26910.csv"}},
  {"gse": 10000, "platform": 96, "manufacturer": "Affymetrix", "type": "Liver",
   "classes": 3, "samples": 12, "genes": 4,
   "downloads": {"csv": "/cumida/Liver_GSE10000.csv"}},
  {"gse": "45827", "platform": "570", "manufacturer": "Affymetrix", "type": "Breast",
   "classes": "2", "samples": "3", "genes": "4",
   "downloads": {"csv": "/cumida/Breast_GSE45827.csv"}}
]"#;

pub const GPL570_SOFT: &str = "^PLATFORM = GPL570\n\
!Platform_title = [HG-U133_Plus_2] Affymetrix Human Genome U133 Plus 2.0 Array\n\
!Platform_manufacturer = Affymetrix\n\
#ID = Affymetrix Probe Set ID\n\
#GB_ACC = GenBank Accession Number\n\
!platform_table_begin\n\
ID\tGB_ACC\tSPOT_ID\n\
1007_s_at\tU48705\t\n\
1053_at\tM87338\t\n\
117_at\t\t\n\
121_at\tU48705\t\n\
!platform_table_end\n";

pub const GSE1000_SOFT: &str = "^SERIES = GSE1000\n\
!Series_title = Toy series\n\
!Series_platform_id = GPL570\n\
^PLATFORM = GPL570\n\
!Platform_title = toy platform\n\
^SAMPLE = GSM1\n\
!Sample_title = tumor 1\n\
!sample_table_begin\n\
ID_REF\tVALUE\n\
1007_s_at\t5.5\n\
1053_at\tnull\n\
!sample_table_end\n\
^SAMPLE = GSM2\n\
!Sample_title = normal 1\n\
!sample_table_begin\n\
ID_REF\tVALUE\n\
1007_s_at\t4.25\n\
1053_at\t1\n\
!sample_table_end\n";

pub const BREAST_CSV: &str = "samples,type,1007_s_at,1053_at,117_at,121_at\n\
GSM1,normal,1.0,2.0,3.0,4.0\n\
GSM2,breast_adenocarcinoma,5.5,6.25,NA,8.0\n\
GSM3,breast_adenocarcinoma,9.0,10.0,11.0,12.0\n";

pub const PROSTATE_CSV: &str = "samples,type,1007_s_at,1053_at,117_at,121_at\n\
GSM10,prostate_cancer,0.5,0.25,0.125,0.0625\n\
GSM11,normal,7.0,7.5,8.0,8.5\n\
GSM12,prostate_cancer,1e-3,2e-3,3e-3,4e-3\n";

pub const LIVER_CSV: &str = "samples,type,200000_s_at,200001_at\n\
GSM20,HCC,3.5,4.5\n\
GSM21,normal,1.5,2.5\n";

pub fn scratch_settings(root: &Path) -> Settings {
    let root = Utf8PathBuf::from_path_buf(root.to_path_buf()).expect("utf-8 temp path");
    let mut settings = Settings::with_root(root);
    settings.catalog_url = CATALOG_URL.to_string();
    settings.catalog_base_url = BASE_URL.to_string();
    settings
}

pub fn gzip(text: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

/// Serves raw GEO records from memory and counts downloads per accession.
#[derive(Default)]
pub struct MockGeo {
    records: HashMap<String, Vec<u8>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl MockGeo {
    pub fn with_platform(mut self, accession: &str, soft: &str) -> Self {
        self.records
            .insert(accession.to_string(), soft.as_bytes().to_vec());
        self
    }

    pub fn with_series(mut self, accession: &str, soft: &str) -> Self {
        self.records.insert(accession.to_string(), gzip(soft));
        self
    }

    pub fn calls(&self, accession: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(accession)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

impl GeoClient for MockGeo {
    fn download_record(
        &self,
        accession: &GeoAccession,
        destination: &Path,
    ) -> Result<(), KiraError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(accession.to_string())
            .or_insert(0) += 1;
        let body = self
            .records
            .get(accession.as_str())
            .ok_or_else(|| KiraError::AccessionNotFound(accession.to_string()))?;
        fs::write(destination, body).map_err(|err| KiraError::Filesystem(err.to_string()))
    }
}

/// Serves catalog and matrix downloads from memory.
#[derive(Default)]
pub struct MockCatalog {
    files: HashMap<String, Vec<u8>>,
    calls: Mutex<Vec<String>>,
}

impl MockCatalog {
    pub fn standard() -> Self {
        Self::default()
            .with_file(CATALOG_URL, CATALOG_JSON)
            .with_file(BREAST_URL, BREAST_CSV)
            .with_file(PROSTATE_URL, PROSTATE_CSV)
    }

    pub fn with_file(mut self, source: &str, content: &str) -> Self {
        self.files
            .insert(source.to_string(), content.as_bytes().to_vec());
        self
    }

    pub fn without_file(mut self, source: &str) -> Self {
        self.files.remove(source);
        self
    }

    pub fn calls(&self, source: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|seen| seen.as_str() == source)
            .count()
    }
}

impl CatalogClient for MockCatalog {
    fn download(&self, source: &str, destination: &Path) -> Result<(), KiraError> {
        self.calls.lock().unwrap().push(source.to_string());
        let body = self
            .files
            .get(source)
            .ok_or_else(|| KiraError::DatasetNotFound(source.to_string()))?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        fs::write(destination, body).map_err(|err| KiraError::Filesystem(err.to_string()))
    }
}
