//! Open editor documents as seen by the coordinator.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rtag_types::UnsavedFile;

#[derive(Debug)]
struct Document {
    text: String,
    dirty: bool,
}

#[derive(Debug, Default)]
pub(crate) struct DocumentSet {
    docs: HashMap<PathBuf, Document>,
}

impl DocumentSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, path: PathBuf, text: String) {
        self.docs.insert(path, Document { text, dirty: false });
    }

    /// Record an edit. Returns `false` when the text is unchanged, which the
    /// editor reports for metadata-only changes.
    pub fn change(&mut self, path: PathBuf, text: String) -> bool {
        match self.docs.get_mut(&path) {
            Some(doc) if doc.text == text => false,
            Some(doc) => {
                doc.text = text;
                doc.dirty = true;
                true
            }
            None => {
                self.docs.insert(path, Document { text, dirty: true });
                true
            }
        }
    }

    pub fn saved(&mut self, path: &Path) {
        if let Some(doc) = self.docs.get_mut(path) {
            doc.dirty = false;
        }
    }

    pub fn close(&mut self, path: &Path) -> bool {
        self.docs.remove(path).is_some()
    }

    pub fn is_open(&self, path: &Path) -> bool {
        self.docs.contains_key(path)
    }

    pub fn is_dirty(&self, path: &Path) -> bool {
        self.docs.get(path).is_some_and(|doc| doc.dirty)
    }

    /// Open documents accepted by `filter`, sorted by path.
    pub fn open_paths(&self, mut filter: impl FnMut(&Path) -> bool) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .docs
            .keys()
            .filter(|path| filter(path))
            .cloned()
            .collect();
        paths.sort();
        paths
    }

    /// Snapshots of dirty documents accepted by `filter`, sorted by path.
    pub fn unsaved(&self, mut filter: impl FnMut(&Path) -> bool) -> Vec<UnsavedFile> {
        let mut files: Vec<UnsavedFile> = self
            .docs
            .iter()
            .filter(|(path, doc)| doc.dirty && filter(path))
            .map(|(path, doc)| UnsavedFile::new(path.clone(), doc.text.clone()))
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirty_tracking() {
        let mut docs = DocumentSet::new();
        let path = PathBuf::from("/repo/a.cpp");
        docs.open(path.clone(), "int a;".to_string());
        assert!(docs.is_open(&path));
        assert!(!docs.is_dirty(&path));

        assert!(!docs.change(path.clone(), "int a;".to_string()));
        assert!(!docs.is_dirty(&path));

        assert!(docs.change(path.clone(), "int b;".to_string()));
        assert!(docs.is_dirty(&path));

        docs.saved(&path);
        assert!(!docs.is_dirty(&path));

        assert!(docs.close(&path));
        assert!(!docs.is_open(&path));
    }

    #[test]
    fn test_unsaved_filters_and_sorts() {
        let mut docs = DocumentSet::new();
        docs.change(PathBuf::from("/repo/b.cpp"), "b".to_string());
        docs.change(PathBuf::from("/repo/a.cpp"), "a".to_string());
        docs.change(PathBuf::from("/other/c.cpp"), "c".to_string());
        docs.open(PathBuf::from("/repo/clean.cpp"), "clean".to_string());

        let unsaved = docs.unsaved(|p| p.starts_with("/repo"));
        let paths: Vec<&Path> = unsaved.iter().map(|f| f.path.as_path()).collect();
        assert_eq!(paths, [Path::new("/repo/a.cpp"), Path::new("/repo/b.cpp")]);
        assert_eq!(unsaved[0].content, "a");

        let open = docs.open_paths(|p| p.starts_with("/repo"));
        assert_eq!(open.len(), 3);
        assert_eq!(open[0], PathBuf::from("/repo/a.cpp"));
    }
}
