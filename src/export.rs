use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::types::{ProbeResult, ScanSummary};

/// Flat record written for each open port.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ExportRecord {
    pub port: u16,
    pub state: String,
    pub service: String,
    pub banner: String,
}

impl From<&ProbeResult> for ExportRecord {
    fn from(r: &ProbeResult) -> Self {
        Self {
            port: r.port,
            state: r.state_label().to_string(),
            service: r.service.clone().unwrap_or_else(|| crate::services::UNKNOWN_SERVICE.to_string()),
            banner: r.banner_display().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Text,
}

impl ExportFormat {
    /// `.json` and `.csv` by extension, plain text otherwise.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("json") => ExportFormat::Json,
            Some("csv") => ExportFormat::Csv,
            _ => ExportFormat::Text,
        }
    }
}

pub fn records(summary: &ScanSummary) -> Vec<ExportRecord> {
    summary.open_ports.iter().map(ExportRecord::from).collect()
}

pub fn write_json<W: Write>(w: W, summary: &ScanSummary) -> Result<()> {
    serde_json::to_writer_pretty(w, &records(summary))?;
    Ok(())
}

pub fn write_csv<W: Write>(w: W, summary: &ScanSummary) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(w);
    wtr.write_record(["Port", "State", "Service", "Banner"])?;
    for rec in records(summary) {
        wtr.write_record([
            rec.port.to_string(),
            rec.state,
            rec.service,
            rec.banner,
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_text<W: Write>(mut w: W, summary: &ScanSummary) -> Result<()> {
    for r in &summary.open_ports {
        let service = r.service.as_deref().unwrap_or(crate::services::UNKNOWN_SERVICE);
        writeln!(w, "Port {}/tcp open - {}", r.port, service)?;
        if let Some(text) = r.banner.as_ref().and_then(|b| b.text()) {
            writeln!(w, "Banner: {text}")?;
        }
        writeln!(w)?;
    }
    Ok(())
}

/// Write the open ports of `summary` to `path`, picking the format from its extension.
pub fn write_summary(path: &Path, summary: &ScanSummary) -> Result<ExportFormat> {
    let format = ExportFormat::from_path(path);
    let file = File::create(path)
        .with_context(|| format!("failed to create export file: {}", path.display()))?;
    let mut out = BufWriter::new(file);
    match format {
        ExportFormat::Json => write_json(&mut out, summary)?,
        ExportFormat::Csv => write_csv(&mut out, summary)?,
        ExportFormat::Text => write_text(&mut out, summary)?,
    }
    out.flush()
        .with_context(|| format!("failed to write export file: {}", path.display()))?;
    Ok(format)
}
