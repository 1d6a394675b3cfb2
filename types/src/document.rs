use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Snapshot of an editor buffer whose content differs from disk.
///
/// Passed to the daemon alongside reindex commands so it indexes what the
/// user sees rather than what was last saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsavedFile {
    pub path: PathBuf,
    pub content: String,
}

impl UnsavedFile {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    /// The `--unsaved-file` argument value: `<path>:<byte length>`.
    #[must_use]
    pub fn daemon_argument(&self) -> String {
        format!("{}:{}", self.path.display(), self.content.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_argument_counts_bytes() {
        let file = UnsavedFile::new("/repo/a.cpp", "int é;");
        assert_eq!(file.daemon_argument(), "/repo/a.cpp:7");
    }
}
