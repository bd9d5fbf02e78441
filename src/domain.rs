use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

static ACCESSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(GPL|GSE)[0-9]+$").expect("valid accession regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessionKind {
    Platform,
    Series,
}

impl fmt::Display for AccessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessionKind::Platform => write!(f, "platform"),
            AccessionKind::Series => write!(f, "series"),
        }
    }
}

/// A GEO platform (`GPLxxxx`) or series (`GSExxxx`) accession.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GeoAccession(String);

impl GeoAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> AccessionKind {
        if self.0.starts_with("GPL") {
            AccessionKind::Platform
        } else {
            AccessionKind::Series
        }
    }

    /// File name GEO records are stored under once downloaded.
    pub fn raw_file_name(&self) -> String {
        match self.kind() {
            AccessionKind::Platform => format!("{}.txt", self.0),
            AccessionKind::Series => format!("{}_family.soft.gz", self.0),
        }
    }

    pub fn cache_file_name(&self) -> String {
        format!("{}.cache", self.0)
    }
}

impl fmt::Display for GeoAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GeoAccession {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        if !ACCESSION_RE.is_match(&normalized) {
            return Err(KiraError::InvalidAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// Composite catalog key: a series accession plus its cancer type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatasetKey {
    pub series: String,
    pub category: String,
}

impl DatasetKey {
    pub fn new(series: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            series: series.into(),
            category: category.into(),
        }
    }
}

impl fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.series, self.category)
    }
}

impl FromStr for DatasetKey {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let (series, category) = trimmed
            .split_once(':')
            .ok_or_else(|| KiraError::InvalidDatasetKey(value.to_string()))?;
        let series = series.trim().to_uppercase();
        let category = category.trim();
        if !series.starts_with("GSE") || category.is_empty() {
            return Err(KiraError::InvalidDatasetKey(value.to_string()));
        }
        Ok(Self::new(series, category))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_accession_normalizes_case() {
        let acc: GeoAccession = " gpl570 ".parse().unwrap();
        assert_eq!(acc.as_str(), "GPL570");
        assert_eq!(acc.kind(), AccessionKind::Platform);
    }

    #[test]
    fn parse_accession_rejects_other_prefixes() {
        let err = "GSM12345".parse::<GeoAccession>().unwrap_err();
        assert_matches!(err, KiraError::InvalidAccession(_));
    }

    #[test]
    fn dataset_key_roundtrips_display() {
        let key: DatasetKey = "gse45827:Breast".parse().unwrap();
        assert_eq!(key.to_string(), "GSE45827:Breast");
    }
}
