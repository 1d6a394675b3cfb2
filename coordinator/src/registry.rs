//! Registered project roots and file-to-project resolution.

use std::path::{Path, PathBuf};

/// Whether `file` lies strictly below `root`, compared by path component.
pub(crate) fn is_below(file: &Path, root: &Path) -> bool {
    file != root && file.starts_with(root)
}

/// Deepest of `roots` containing `file`.
///
/// Equal depths cannot occur for distinct roots under component comparison,
/// but duplicates can; the last one in iteration order wins.
pub(crate) fn deepest_root<'a>(
    roots: impl IntoIterator<Item = &'a Path>,
    file: &Path,
) -> Option<&'a Path> {
    let mut best: Option<&Path> = None;
    for root in roots.into_iter().filter(|root| is_below(file, root)) {
        let deeper = best.is_none_or(|b| root.components().count() >= b.components().count());
        if deeper {
            best = Some(root);
        }
    }
    best
}

/// Registered project roots in registration order.
#[derive(Debug, Default)]
pub(crate) struct ProjectRegistry {
    paths: Vec<PathBuf>,
}

impl ProjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `path`. Returns `false` if it was already registered.
    pub fn add(&mut self, path: PathBuf) -> bool {
        if self.contains(&path) {
            return false;
        }
        self.paths.push(path);
        true
    }

    /// Unregister `path`. Returns `false` if it was not registered.
    pub fn remove(&mut self, path: &Path) -> bool {
        let before = self.paths.len();
        self.paths.retain(|p| p != path);
        self.paths.len() != before
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    /// "Reindex active project" only makes sense with several projects.
    pub fn multi_project(&self) -> bool {
        self.paths.len() > 1
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn owning_project(&self, file: &Path) -> Option<&Path> {
        deepest_root(self.paths.iter().map(PathBuf::as_path), file)
    }

    /// With `project`, whether `file` belongs to exactly that project;
    /// without, whether it belongs to any.
    pub fn is_in_project(&self, file: &Path, project: Option<&Path>) -> bool {
        match (self.owning_project(file), project) {
            (Some(owner), Some(project)) => owner == project,
            (owner, None) => owner.is_some(),
            (None, Some(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(paths: &[&str]) -> ProjectRegistry {
        let mut registry = ProjectRegistry::new();
        for path in paths {
            registry.add(PathBuf::from(path));
        }
        registry
    }

    #[test]
    fn test_longest_prefix_wins() {
        let registry = registry(&["/repo", "/repo/sub", "/other"]);
        assert_eq!(
            registry.owning_project(Path::new("/repo/sub/a.cpp")),
            Some(Path::new("/repo/sub"))
        );
        assert_eq!(
            registry.owning_project(Path::new("/repo/a.cpp")),
            Some(Path::new("/repo"))
        );
        assert_eq!(registry.owning_project(Path::new("/elsewhere/a.cpp")), None);
    }

    #[test]
    fn test_registration_order_does_not_matter() {
        let registry = registry(&["/repo/sub", "/repo"]);
        assert_eq!(
            registry.owning_project(Path::new("/repo/sub/deep/a.cpp")),
            Some(Path::new("/repo/sub"))
        );
    }

    #[test]
    fn test_prefix_is_component_wise() {
        let registry = registry(&["/repo"]);
        assert_eq!(registry.owning_project(Path::new("/repo2/a.cpp")), None);
        assert_eq!(registry.owning_project(Path::new("/repo")), None);
    }

    #[test]
    fn test_is_in_project() {
        let registry = registry(&["/repo", "/repo/sub"]);
        let file = Path::new("/repo/sub/a.cpp");
        assert!(registry.is_in_project(file, None));
        assert!(registry.is_in_project(file, Some(Path::new("/repo/sub"))));
        assert!(!registry.is_in_project(file, Some(Path::new("/repo"))));
        assert!(!registry.is_in_project(Path::new("/x/a.cpp"), None));
    }

    #[test]
    fn test_add_remove_and_multi_project() {
        let mut registry = ProjectRegistry::new();
        assert!(registry.add(PathBuf::from("/a")));
        assert!(!registry.add(PathBuf::from("/a")));
        assert!(!registry.multi_project());
        assert!(registry.add(PathBuf::from("/b")));
        assert!(registry.multi_project());
        assert!(registry.remove(Path::new("/a")));
        assert!(!registry.remove(Path::new("/a")));
        assert!(!registry.multi_project());
        assert_eq!(registry.paths(), [PathBuf::from("/b")]);
    }

    #[test]
    fn test_deepest_root_ties_prefer_last() {
        let first = PathBuf::from("/repo");
        let second = PathBuf::from("/repo");
        let roots = [first.as_path(), second.as_path()];
        let found = deepest_root(roots, Path::new("/repo/a.cpp")).unwrap();
        assert!(std::ptr::eq(found, second.as_path()));
    }
}
