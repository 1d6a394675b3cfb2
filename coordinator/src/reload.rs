//! Projects whose daemon-side state must be rebuilt from scratch.
//!
//! A configuration change can invalidate a project the daemon already holds.
//! The set is written to disk on every change so the purge still happens if
//! the session ends before the project is reopened.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rtag_utils::{atomic_write, recover_bak_file};

/// File name under the state directory.
pub const RELOAD_FILE_NAME: &str = "reload.json";

#[derive(Debug)]
pub struct ReloadSet {
    paths: BTreeSet<PathBuf>,
    file: Option<PathBuf>,
}

impl ReloadSet {
    /// A set that is never persisted.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            paths: BTreeSet::new(),
            file: None,
        }
    }

    /// Load the set stored in `state_dir`. A missing or unreadable file
    /// yields an empty set.
    #[must_use]
    pub fn load(state_dir: &Path) -> Self {
        let file = state_dir.join(RELOAD_FILE_NAME);
        recover_bak_file(&file);
        let paths = match fs::read(&file) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!(path = %file.display(), "Ignoring corrupt reload set: {e}");
                BTreeSet::new()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => {
                tracing::warn!(path = %file.display(), "Failed to read reload set: {e}");
                BTreeSet::new()
            }
        };
        Self {
            paths,
            file: Some(file),
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.paths.iter()
    }

    /// Add `paths`, persisting if anything changed.
    pub fn extend(&mut self, paths: impl IntoIterator<Item = PathBuf>) {
        let before = self.paths.len();
        self.paths.extend(paths);
        if self.paths.len() != before {
            self.persist();
        }
    }

    /// Remove `paths`, persisting if anything changed.
    pub fn remove_all<'a>(&mut self, paths: impl IntoIterator<Item = &'a PathBuf>) {
        let mut changed = false;
        for path in paths {
            changed |= self.paths.remove(path);
        }
        if changed {
            self.persist();
        }
    }

    fn persist(&self) {
        let Some(file) = &self.file else {
            return;
        };
        let result = serde_json::to_vec_pretty(&self.paths)
            .map_err(io::Error::other)
            .and_then(|bytes| atomic_write(file, &bytes));
        if let Err(e) = result {
            tracing::warn!(path = %file.display(), "Failed to persist reload set: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = ReloadSet::load(dir.path());
        assert!(set.is_empty());

        set.extend([PathBuf::from("/repo"), PathBuf::from("/other")]);
        let reloaded = ReloadSet::load(dir.path());
        assert!(reloaded.contains(Path::new("/repo")));
        assert!(reloaded.contains(Path::new("/other")));

        set.remove_all(&[PathBuf::from("/repo")]);
        let reloaded = ReloadSet::load(dir.path());
        assert!(!reloaded.contains(Path::new("/repo")));
        assert_eq!(reloaded.paths().count(), 1);
    }

    #[test]
    fn test_corrupt_file_yields_empty_set() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(RELOAD_FILE_NAME), b"not json").unwrap();
        assert!(ReloadSet::load(dir.path()).is_empty());
    }

    #[test]
    fn test_in_memory_set_writes_nothing() {
        let mut set = ReloadSet::in_memory();
        set.extend([PathBuf::from("/repo")]);
        assert!(set.contains(Path::new("/repo")));
    }
}
