use anyhow::Context;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ScanError;

/// An ordered, duplicate-free list of TCP ports in `1..=65535`.
///
/// Only constructible through the parsers in this module, `FromIterator`
/// (which deduplicates) or `TryFrom<Vec<u16>>` (which rejects zero and
/// repeats), so the invariants hold for every value in circulation.
/// Deserialization goes through `TryFrom`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(into = "Vec<u16>", try_from = "Vec<u16>")]
pub struct PortSpec(Vec<u16>);

impl PortSpec {
    pub fn as_slice(&self) -> &[u16] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter().copied()
    }

}

impl From<PortSpec> for Vec<u16> {
    fn from(spec: PortSpec) -> Self {
        spec.0
    }
}

impl TryFrom<Vec<u16>> for PortSpec {
    type Error = ScanError;

    fn try_from(ports: Vec<u16>) -> Result<Self, Self::Error> {
        let mut b = Builder::default();
        for p in ports {
            if p == 0 {
                return Err(ScanError::InvalidPortSpec("port out of range: 0".into()));
            }
            if !b.seen.insert(p) {
                return Err(ScanError::InvalidPortSpec(format!("duplicate port {p}")));
            }
            b.out.push(p);
        }
        Ok(b.finish())
    }
}

impl FromIterator<u16> for PortSpec {
    /// Zero is dropped since it is never a scannable port.
    fn from_iter<I: IntoIterator<Item = u16>>(iter: I) -> Self {
        let mut b = Builder::default();
        for p in iter.into_iter().filter(|p| *p != 0) {
            b.push(p);
        }
        b.finish()
    }
}

impl<'a> IntoIterator for &'a PortSpec {
    type Item = &'a u16;
    type IntoIter = std::slice::Iter<'a, u16>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[derive(Default)]
struct Builder {
    out: Vec<u16>,
    seen: HashSet<u16>,
}

impl Builder {
    fn push(&mut self, p: u16) {
        if self.seen.insert(p) {
            self.out.push(p);
        }
    }

    fn push_token(&mut self, token: &str) -> Result<(), ScanError> {
        if let Some((a, b)) = token.split_once('-') {
            let start = parse_port_str(a.trim())?;
            let end = parse_port_str(b.trim())?;
            if start > end {
                return Err(ScanError::InvalidPortSpec(format!(
                    "invalid range {start}-{end} (start > end)"
                )));
            }
            for p in start..=end {
                self.push(p);
            }
        } else {
            let p = parse_port_str(token)?;
            self.push(p);
        }
        Ok(())
    }

    fn finish(self) -> PortSpec {
        PortSpec(self.out)
    }
}

/// Parse a comma-separated port specification such as `80,443,1000-1002`.
///
/// Each token is a single port or an inclusive `start-end` range. Whitespace
/// around tokens is ignored; empty tokens are not. Duplicates keep their first
/// position. Any bad token fails the whole parse.
pub fn parse_ports(spec: &str) -> Result<PortSpec, ScanError> {
    let mut b = Builder::default();
    for token in spec.split(',') {
        let token = token.trim();
        if token.is_empty() {
            return Err(ScanError::InvalidPortSpec(format!(
                "empty token in \"{spec}\""
            )));
        }
        b.push_token(token)?;
    }
    Ok(b.finish())
}

/// Parse a ports file content: one port or range per line.
///
/// - everything after `#` is ignored
/// - whitespace and blank lines are ignored
pub fn parse_ports_lines(s: &str) -> Result<PortSpec, ScanError> {
    let mut b = Builder::default();
    for (idx, raw_line) in s.lines().enumerate() {
        let line = raw_line.split('#').next().map(str::trim).unwrap_or("");
        if line.is_empty() {
            continue;
        }
        b.push_token(line).map_err(|e| match e {
            ScanError::InvalidPortSpec(msg) => {
                ScanError::InvalidPortSpec(format!("line {}: {msg}", idx + 1))
            }
            other => other,
        })?;
    }
    Ok(b.finish())
}

/// Load a ports list from a file path. Errors if the file cannot be read or parsed.
pub fn load_ports_from_path(path: impl AsRef<Path>) -> anyhow::Result<PortSpec> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read ports file: {}", path.as_ref().display()))?;
    Ok(parse_ports_lines(&content)?)
}

/// Named port presets offered to interactive callers.
pub const PRESETS: &[(&str, &str)] = &[
    (
        "common",
        "22,23,25,53,80,110,135,139,143,443,993,995,1723,3306,3389,5432,5900,8080",
    ),
    ("web", "80,443,8080,8443,8000,8008,8081,9080,9443"),
    ("database", "1433,1521,3306,5432,6379,27017,9200"),
    ("all", "1-65535"),
];

pub fn preset(name: &str) -> Option<&'static str> {
    PRESETS
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, spec)| *spec)
}

/// Ports checked by service detection.
pub const SERVICE_DETECTION_PORTS: &[u16] = &[
    21, 22, 23, 25, 53, 80, 110, 135, 139, 143, 443, 993, 995, 1723, 3306, 3389, 5432, 5900, 8080,
];

pub fn service_detection_ports() -> PortSpec {
    SERVICE_DETECTION_PORTS.iter().copied().collect()
}

fn parse_port_str(s: &str) -> Result<u16, ScanError> {
    let val: u32 = s
        .parse::<u32>()
        .map_err(|e| ScanError::InvalidPortSpec(format!("\"{s}\": {e}")))?;
    if val == 0 || val > 65535 {
        return Err(ScanError::InvalidPortSpec(format!(
            "port out of range: {val}"
        )));
    }
    Ok(val as u16)
}
