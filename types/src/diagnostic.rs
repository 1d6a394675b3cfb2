//! Diagnostics as published to the editor.
//!
//! The daemon reports 1-based `(line, column[, length])` triples; these types
//! hold the 0-based form the editor expects. Construction from daemon values
//! goes through [`Position::from_daemon`] so an out-of-range report is
//! rejected at the boundary instead of wrapping.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Information,
}

impl DiagnosticSeverity {
    /// Map the daemon's `type` tag.
    ///
    /// `error` and `fixit` are errors, `warning` is a warning, and every other
    /// tag (including `note` and unknown values) is informational.
    #[must_use]
    pub fn from_daemon_tag(tag: &str) -> Self {
        match tag {
            "error" | "fixit" => Self::Error,
            "warning" => Self::Warning,
            _ => Self::Information,
        }
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PositionError {
    #[error("line {0} is not a 1-based line number")]
    Line(i64),
    #[error("column {0} is not a 1-based column number")]
    Column(i64),
    #[error("length {0} is negative")]
    Length(i64),
}

/// Zero-based position in a text document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    #[must_use]
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }

    /// Convert a 1-based daemon location.
    pub fn from_daemon(line: i64, column: i64) -> Result<Self, PositionError> {
        let zero_based = |value: i64| value.checked_sub(1).and_then(|v| u32::try_from(v).ok());
        let line_index = zero_based(line).ok_or(PositionError::Line(line))?;
        let character = zero_based(column).ok_or(PositionError::Column(column))?;
        Ok(Self {
            line: line_index,
            character,
        })
    }

    /// Same line, `delta` characters further right.
    #[must_use]
    pub fn translate(self, delta: u32) -> Self {
        Self {
            line: self.line,
            character: self.character.saturating_add(delta),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    #[must_use]
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Empty range at `position`.
    #[must_use]
    pub const fn at(position: Position) -> Self {
        Self {
            start: position,
            end: position,
        }
    }

    /// Range starting at `start` spanning an optional daemon-reported length.
    pub fn spanning(start: Position, length: Option<i64>) -> Result<Self, PositionError> {
        match length {
            None | Some(0) => Ok(Self::at(start)),
            Some(len) => {
                let delta = u32::try_from(len).map_err(|_| PositionError::Length(len))?;
                Ok(Self::new(start, start.translate(delta)))
            }
        }
    }
}

/// A single diagnostic for one file.
///
/// Fields are private; external consumers read via accessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    severity: DiagnosticSeverity,
    message: String,
    range: Range,
}

impl Diagnostic {
    #[must_use]
    pub fn new(severity: DiagnosticSeverity, message: String, range: Range) -> Self {
        Self {
            severity,
            message,
            range,
        }
    }

    #[must_use]
    pub fn severity(&self) -> DiagnosticSeverity {
        self.severity
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn range(&self) -> Range {
        self.range
    }
}

/// Immutable snapshot of all published diagnostics.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsSnapshot {
    /// Per-file diagnostics, sorted with error-containing files first.
    files: Vec<(PathBuf, Vec<Diagnostic>)>,
}

impl DiagnosticsSnapshot {
    #[must_use]
    pub fn new(files: Vec<(PathBuf, Vec<Diagnostic>)>) -> Self {
        Self { files }
    }

    #[must_use]
    pub fn files(&self) -> &[(PathBuf, Vec<Diagnostic>)] {
        &self.files
    }

    /// Diagnostics published for `path`, if any.
    #[must_use]
    pub fn for_file(&self, path: &Path) -> Option<&[Diagnostic]> {
        self.files
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, items)| items.as_slice())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_diag(severity: DiagnosticSeverity, msg: &str) -> Diagnostic {
        Diagnostic::new(
            severity,
            msg.to_string(),
            Range::at(Position::new(10, 5)),
        )
    }

    #[test]
    fn test_severity_from_daemon_tag() {
        assert_eq!(
            DiagnosticSeverity::from_daemon_tag("error"),
            DiagnosticSeverity::Error
        );
        assert_eq!(
            DiagnosticSeverity::from_daemon_tag("fixit"),
            DiagnosticSeverity::Error
        );
        assert_eq!(
            DiagnosticSeverity::from_daemon_tag("warning"),
            DiagnosticSeverity::Warning
        );
        assert_eq!(
            DiagnosticSeverity::from_daemon_tag("note"),
            DiagnosticSeverity::Information
        );
        assert_eq!(
            DiagnosticSeverity::from_daemon_tag(""),
            DiagnosticSeverity::Information
        );
    }

    #[test]
    fn test_position_from_daemon_is_zero_based() {
        assert_eq!(Position::from_daemon(5, 3).unwrap(), Position::new(4, 2));
        assert_eq!(Position::from_daemon(1, 1).unwrap(), Position::new(0, 0));
    }

    #[test]
    fn test_position_from_daemon_rejects_zero() {
        assert_eq!(Position::from_daemon(0, 1), Err(PositionError::Line(0)));
        assert_eq!(Position::from_daemon(1, 0), Err(PositionError::Column(0)));
    }

    #[test]
    fn test_range_spanning_length() {
        let start = Position::new(2, 4);
        assert_eq!(Range::spanning(start, None).unwrap(), Range::at(start));
        assert_eq!(Range::spanning(start, Some(0)).unwrap(), Range::at(start));
        let range = Range::spanning(start, Some(6)).unwrap();
        assert_eq!(range.end, Position::new(2, 10));
        assert!(Range::spanning(start, Some(-1)).is_err());
    }

    #[test]
    fn test_snapshot_lookup_by_file() {
        let snap = DiagnosticsSnapshot::new(vec![(
            PathBuf::from("a.cpp"),
            vec![
                make_diag(DiagnosticSeverity::Error, "e1"),
                make_diag(DiagnosticSeverity::Warning, "w1"),
                make_diag(DiagnosticSeverity::Warning, "w2"),
                make_diag(DiagnosticSeverity::Information, "i1"),
            ],
        )]);
        assert_eq!(snap.for_file(Path::new("a.cpp")).map(<[_]>::len), Some(4));
        assert!(snap.for_file(Path::new("b.cpp")).is_none());
    }

    #[test]
    fn test_snapshot_default_is_empty() {
        let snap = DiagnosticsSnapshot::default();
        assert!(snap.is_empty());
        assert!(snap.files().is_empty());
    }
}
