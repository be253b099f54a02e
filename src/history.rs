use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::export::{records, ExportFormat, ExportRecord};
use crate::session::now_rfc3339;
use crate::types::ScanSummary;

pub const DEFAULT_HISTORY_FILE: &str = "scan_history.json";

/// One finished scan as kept in the history file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub timestamp: String,
    pub target: String,
    pub ports: String,
    pub open_ports: usize,
    /// Seconds.
    pub duration: f64,
    pub results: Vec<ExportRecord>,
}

impl From<&ScanSummary> for HistoryEntry {
    fn from(s: &ScanSummary) -> Self {
        Self {
            timestamp: now_rfc3339(),
            target: s.target.clone(),
            ports: s
                .ports
                .clone()
                .unwrap_or_else(|| format!("{} ports", s.requested_port_count)),
            open_ports: s.open_count(),
            duration: s.elapsed_ms as f64 / 1000.0,
            results: records(s),
        }
    }
}

/// Scan history backed by a JSON file.
#[derive(Debug, Clone)]
pub struct ScanHistory {
    path: PathBuf,
    entries: Vec<HistoryEntry>,
}

impl ScanHistory {
    /// Load history from `path`. A missing file is an empty history; an
    /// unreadable one is logged and also treated as empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match read_entries(&path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable scan history");
                Vec::new()
            }
        };
        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Append a finished scan and persist.
    pub fn record(&mut self, summary: &ScanSummary) -> Result<()> {
        self.entries.push(HistoryEntry::from(summary));
        self.save()
    }

    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.save()
    }

    pub fn save(&self) -> Result<()> {
        let file = File::create(&self.path)
            .with_context(|| format!("failed to write history file: {}", self.path.display()))?;
        let mut out = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut out, &self.entries)?;
        out.flush()?;
        Ok(())
    }

    /// Export as full JSON for `.json` paths, or as a CSV overview otherwise.
    pub fn export(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("failed to create export file: {}", path.display()))?;
        match ExportFormat::from_path(path) {
            ExportFormat::Json => {
                let mut out = BufWriter::new(file);
                serde_json::to_writer_pretty(&mut out, &self.entries)?;
                out.flush()?;
                Ok(())
            }
            ExportFormat::Csv | ExportFormat::Text => self.write_csv(file),
        }
    }

    pub fn write_csv<W: Write>(&self, w: W) -> Result<()> {
        let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(w);
        wtr.write_record(["Timestamp", "Target", "Ports", "Open Ports", "Duration"])?;
        for e in &self.entries {
            wtr.write_record([
                e.timestamp.clone(),
                e.target.clone(),
                e.ports.clone(),
                e.open_ports.to_string(),
                e.duration.to_string(),
            ])?;
        }
        wtr.flush()?;
        Ok(())
    }
}

fn read_entries(path: &Path) -> Result<Vec<HistoryEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read history file: {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let entries = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse history file: {}", path.display()))?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn summary(target: &str) -> ScanSummary {
        ScanSummary {
            target: target.into(),
            ports: Some("1-1000".into()),
            requested_port_count: 1000,
            completed: 1000,
            open_ports: Vec::new(),
            started_at: "2024-01-01T00:00:00Z".into(),
            elapsed_ms: 2500,
            cancelled: false,
        }
    }

    #[test]
    fn record_persists_and_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        let mut h = ScanHistory::load(&path);
        assert!(h.entries().is_empty());
        h.record(&summary("10.0.0.1")).unwrap();
        h.record(&summary("10.0.0.2")).unwrap();

        let reloaded = ScanHistory::load(&path);
        assert_eq!(reloaded.entries().len(), 2);
        assert_eq!(reloaded.entries()[1].target, "10.0.0.2");
        assert_eq!(reloaded.entries()[0].ports, "1-1000");
        assert!((reloaded.entries()[0].duration - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn corrupt_file_is_treated_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(ScanHistory::load(&path).entries().is_empty());
    }

    #[test]
    fn clear_empties_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        let mut h = ScanHistory::load(&path);
        h.record(&summary("10.0.0.1")).unwrap();
        h.clear().unwrap();
        assert!(ScanHistory::load(&path).entries().is_empty());
    }

    #[test]
    fn csv_overview_has_header() {
        let dir = tempdir().unwrap();
        let mut h = ScanHistory::load(dir.path().join("history.json"));
        h.record(&summary("10.0.0.1")).unwrap();
        let mut buf = Vec::new();
        h.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("Timestamp,Target,Ports,Open Ports,Duration"));
        assert!(lines.next().unwrap().contains(",10.0.0.1,1-1000,0,2.5"));
    }

    #[test]
    fn export_is_json_only_for_json_paths() {
        let dir = tempdir().unwrap();
        let mut h = ScanHistory::load(dir.path().join("history.json"));
        h.record(&summary("10.0.0.1")).unwrap();

        let json_path = dir.path().join("out.JSON");
        h.export(&json_path).unwrap();
        let back: Vec<HistoryEntry> =
            serde_json::from_str(&fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(back, h.entries());

        for name in ["out.csv", "out.txt", "out"] {
            let path = dir.path().join(name);
            h.export(&path).unwrap();
            let text = fs::read_to_string(&path).unwrap();
            assert!(text.starts_with("Timestamp,Target,Ports,Open Ports,Duration"), "{name}");
        }
    }
}
