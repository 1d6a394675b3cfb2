//! Events emitted by the coordinator toward the editor.

use std::path::PathBuf;

use serde::Serialize;

use crate::Diagnostic;

/// Notification level for user-visible messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Info,
    Error,
}

/// An event emitted by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    /// Message for the editor's notification area.
    Message { level: MessageLevel, text: String },
    /// Diagnostics for `path` replace whatever was published before.
    Diagnostics {
        path: PathBuf,
        items: Vec<Diagnostic>,
    },
    /// Diagnostics for `path` are withdrawn.
    DiagnosticsRemoved { path: PathBuf },
    /// Every published diagnostic is withdrawn.
    DiagnosticsCleared,
    /// Whether the "reindex active project" command should be offered.
    MultiProjectAvailable { available: bool },
    /// A project finished loading and is now registered.
    ProjectRegistered { path: PathBuf },
    /// A project was unregistered.
    ProjectRemoved { path: PathBuf },
    /// A configuration change only takes effect after the session restarts.
    ReloadRequired,
}

impl CoordinatorEvent {
    #[must_use]
    pub fn info(text: impl Into<String>) -> Self {
        Self::Message {
            level: MessageLevel::Info,
            text: text.into(),
        }
    }

    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self::Message {
            level: MessageLevel::Error,
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DiagnosticSeverity, Position, Range};

    #[test]
    fn test_message_serializes_with_type_tag() {
        let json = serde_json::to_value(CoordinatorEvent::error("boom")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "message", "level": "error", "text": "boom"})
        );
    }

    #[test]
    fn test_diagnostics_serializes_items() {
        let event = CoordinatorEvent::Diagnostics {
            path: PathBuf::from("/repo/a.cpp"),
            items: vec![Diagnostic::new(
                DiagnosticSeverity::Warning,
                "unused variable".to_string(),
                Range::at(Position::new(4, 2)),
            )],
        };
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json["type"], "diagnostics");
        assert_eq!(json["path"], "/repo/a.cpp");
        assert_eq!(json["items"][0]["severity"], "warning");
        assert_eq!(json["items"][0]["range"]["start"]["line"], 4);
    }
}
