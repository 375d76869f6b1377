use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Add-only set of the local paths one run has claimed as its output.
/// Shared by every worker of the run; merged into the manifest only when
/// the run completes without cancellation.
#[derive(Default)]
pub struct FileTracker {
    paths: RwLock<HashSet<PathBuf>>,
}

impl FileTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &Path) {
        self.paths.write().insert(path.to_path_buf());
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.read().contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.read().is_empty()
    }

    /// The claimed paths as strings, for the manifest merge.
    pub fn snapshot(&self) -> Vec<String> {
        self.paths
            .read()
            .iter()
            .map(|path| path.to_string_lossy().into_owned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_contains() {
        let tracker = FileTracker::new();
        assert!(tracker.is_empty());

        tracker.insert(Path::new("/out/a.strm"));
        tracker.insert(Path::new("/out/a.strm"));
        tracker.insert(Path::new("/out/b.strm"));

        assert_eq!(tracker.len(), 2);
        assert!(tracker.contains(Path::new("/out/a.strm")));
        assert!(!tracker.contains(Path::new("/out/c.strm")));
    }

    #[test]
    fn test_snapshot() {
        let tracker = FileTracker::new();
        tracker.insert(Path::new("/out/a.strm"));
        let mut snapshot = tracker.snapshot();
        snapshot.sort();
        assert_eq!(snapshot, vec!["/out/a.strm".to_string()]);
    }
}
