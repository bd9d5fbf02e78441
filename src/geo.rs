use std::fs::File;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::config::Settings;
use crate::domain::{AccessionKind, GeoAccession};
use crate::error::KiraError;
use crate::soft::is_missing_accession_page;

pub trait GeoClient: Send + Sync {
    /// Downloads the raw record for `accession` to `destination`
    /// (`{acc}.txt` for platforms, `{acc}_family.soft.gz` for series).
    fn download_record(&self, accession: &GeoAccession, destination: &Path)
    -> Result<(), KiraError>;
}

impl<T: GeoClient + ?Sized> GeoClient for &T {
    fn download_record(
        &self,
        accession: &GeoAccession,
        destination: &Path,
    ) -> Result<(), KiraError> {
        (**self).download_record(accession, destination)
    }
}

#[derive(Clone)]
pub struct GeoHttpClient {
    client: Client,
}

impl GeoHttpClient {
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
            .map_err(|err| KiraError::GeoHttp(err.to_string()))?;
        Ok(Self { client })
    }

    pub fn record_url(accession: &GeoAccession) -> String {
        match accession.kind() {
            AccessionKind::Platform => format!(
                "https://www.ncbi.nlm.nih.gov/geo/query/acc.cgi?targ=self&acc={}&form=text&view=full",
                accession.as_str()
            ),
            AccessionKind::Series => {
                let prefix = geo_series_prefix(accession);
                format!(
                    "https://ftp.ncbi.nlm.nih.gov/geo/series/{prefix}/{acc}/soft/{acc}_family.soft.gz",
                    acc = accession.as_str()
                )
            }
        }
    }

    fn write_response_to_file(
        &self,
        accession: &GeoAccession,
        mut response: reqwest::blocking::Response,
        destination: &Path,
    ) -> Result<(), KiraError> {
        if response.status().as_u16() == 404 {
            return Err(KiraError::AccessionNotFound(accession.to_string()));
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "GEO request failed".to_string());
            return Err(KiraError::GeoStatus { status, message });
        }

        let parent = destination
            .parent()
            .ok_or_else(|| KiraError::Filesystem("invalid destination path".to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix("kira-ec-geo")
            .tempfile_in(parent)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, temp.as_file_mut())
            .map_err(|err| KiraError::GeoHttp(err.to_string()))?;

        // acc.cgi answers unknown platforms with 200 and an explanatory page.
        if accession.kind() == AccessionKind::Platform {
            let head = read_head(temp.path())?;
            if is_missing_accession_page(&head) {
                return Err(KiraError::AccessionNotFound(accession.to_string()));
            }
        }

        temp.persist(destination)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

impl GeoClient for GeoHttpClient {
    fn download_record(
        &self,
        accession: &GeoAccession,
        destination: &Path,
    ) -> Result<(), KiraError> {
        let url = Self::record_url(accession);
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| KiraError::GeoHttp(err.to_string()))?;
        self.write_response_to_file(accession, response, destination)
    }
}

pub fn geo_series_prefix(accession: &GeoAccession) -> String {
    let digits = accession.as_str().trim_start_matches("GSE");
    if digits.len() <= 3 {
        return "GSEnnn".to_string();
    }
    let head = &digits[..digits.len() - 3];
    format!("GSE{}nnn", head)
}

fn read_head(path: &Path) -> Result<String, KiraError> {
    use std::io::Read;

    let file = File::open(path).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    let mut buffer = Vec::with_capacity(4096);
    file.take(4096)
        .read_to_end(&mut buffer)
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
