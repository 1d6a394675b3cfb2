//! Diagnostics decoding and the published-diagnostics store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rtag_types::{Diagnostic, DiagnosticSeverity, DiagnosticsSnapshot, Position, Range};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid diagnostics JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// One decoded stream unit: per-file diagnostics in report order.
pub type FileDiagnostics = Vec<(PathBuf, Vec<Diagnostic>)>;

#[derive(Deserialize)]
struct Unit {
    #[serde(rename = "checkStyle", default)]
    check_style: Option<serde_json::Map<String, serde_json::Value>>,
}

/// The daemon has emitted numbers both as JSON numbers and as strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum Number {
    Int(i64),
    Text(String),
}

impl Number {
    fn value(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Deserialize)]
struct RawDiagnostic {
    line: Number,
    column: Number,
    #[serde(default)]
    length: Option<Number>,
    message: String,
    #[serde(rename = "type", default)]
    kind: String,
}

impl RawDiagnostic {
    fn into_diagnostic(self) -> Option<Diagnostic> {
        let start = Position::from_daemon(self.line.value()?, self.column.value()?).ok()?;
        let length = match &self.length {
            Some(len) => Some(len.value()?),
            None => None,
        };
        let range = Range::spanning(start, length).ok()?;
        Some(Diagnostic::new(
            DiagnosticSeverity::from_daemon_tag(&self.kind),
            self.message,
            range,
        ))
    }
}

/// Decode one `{"checkStyle": {...}}` unit.
///
/// Units without `checkStyle` decode to nothing. Entries with unusable
/// positions are skipped individually.
pub fn decode_unit(bytes: &[u8]) -> Result<FileDiagnostics, DecodeError> {
    let unit: Unit = serde_json::from_slice(bytes)?;
    let Some(files) = unit.check_style else {
        return Ok(Vec::new());
    };

    let mut decoded = Vec::with_capacity(files.len());
    for (file, entries) in files {
        let entries = match entries {
            serde_json::Value::Array(entries) => entries,
            other => {
                tracing::debug!(file = %file, "Ignoring non-array diagnostics: {other}");
                continue;
            }
        };
        let items = entries
            .into_iter()
            .filter_map(|entry| serde_json::from_value::<RawDiagnostic>(entry).ok())
            .filter_map(RawDiagnostic::into_diagnostic)
            .collect();
        decoded.push((PathBuf::from(file), items));
    }
    Ok(decoded)
}

/// Published diagnostics, one wholesale-replaced record per file.
#[derive(Debug, Default)]
pub(crate) struct DiagnosticsStore {
    data: HashMap<PathBuf, Vec<Diagnostic>>,
}

impl DiagnosticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace `path`'s record. Empty input removes it.
    pub fn replace(&mut self, path: PathBuf, items: Vec<Diagnostic>) {
        if items.is_empty() {
            self.data.remove(&path);
        } else {
            self.data.insert(path, items);
        }
    }

    pub fn remove(&mut self, path: &Path) -> bool {
        self.data.remove(path).is_some()
    }

    /// Drop every record. Returns whether anything was published.
    pub fn clear(&mut self) -> bool {
        let had_any = !self.data.is_empty();
        self.data.clear();
        had_any
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let mut files: FileDiagnostics = self
            .data
            .iter()
            .map(|(path, items)| (path.clone(), items.clone()))
            .collect();

        // Files with errors first, then by path.
        files.sort_by(|a, b| {
            let a_errors = a.1.iter().any(|d| d.severity().is_error());
            let b_errors = b.1.iter().any(|d| d.severity().is_error());
            b_errors.cmp(&a_errors).then_with(|| a.0.cmp(&b.0))
        });
        DiagnosticsSnapshot::new(files)
    }
}
