use std::io::{self, Write};

use serde::Serialize;

use crate::app::{CatalogResult, CheckResult, CurationReport, ProgressEvent, ProgressSink};
use crate::curation_store::{ExpressionTable, StoredDataset};
use crate::downloader::DownloadReport;
use crate::soft::GeoRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Json,
}

/// Machine-readable output; progress events are dropped.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print_catalog(result: &CatalogResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_record(record: &GeoRecord) -> io::Result<()> {
        Self::print_json(record)
    }

    pub fn print_download(report: &DownloadReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_curation(report: &CurationReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_check(result: &CheckResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_table(table: &ExpressionTable) -> io::Result<()> {
        Self::print_json(table)
    }

    pub fn print_datasets(datasets: &[StoredDataset]) -> io::Result<()> {
        Self::print_json(&datasets)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Writes progress lines to stderr.
pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn event(&self, event: ProgressEvent) {
        let mut stderr = io::stderr();
        let _ = match event.elapsed {
            Some(elapsed) => writeln!(
                stderr,
                "{} ({:.1}s)",
                event.message,
                elapsed.as_secs_f64()
            ),
            None => writeln!(stderr, "{}", event.message),
        };
    }
}

/// Collects events in memory.
#[derive(Default)]
pub struct RecordingProgress {
    events: std::sync::Mutex<Vec<String>>,
}

impl RecordingProgress {
    pub fn messages(&self) -> Vec<String> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl ProgressSink for RecordingProgress {
    fn event(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.message);
        }
    }
}
