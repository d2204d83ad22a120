//! Per-session record of which absolute paths have been read, consulted by
//! `edit_file` as a read-before-edit precondition. Never cleared
//! automatically within a session — see §9's open question: whether this is
//! intended (files read once stay "safe to edit") or a latent bug is
//! unclear upstream. We preserve the observed behavior either way.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct ReadTracker {
    read_paths: Mutex<HashSet<PathBuf>>,
}

impl ReadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_read(&self, path: &Path) {
        self.read_paths
            .lock()
            .expect("read tracker mutex poisoned")
            .insert(path.to_path_buf());
    }

    pub fn has_been_read(&self, path: &Path) -> bool {
        self.read_paths
            .lock()
            .expect("read tracker mutex poisoned")
            .contains(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unread_path_rejected() {
        let tracker = ReadTracker::new();
        assert!(!tracker.has_been_read(Path::new("/tmp/a.txt")));
    }

    #[test]
    fn marked_path_is_remembered() {
        let tracker = ReadTracker::new();
        let p = PathBuf::from("/tmp/a.txt");
        tracker.mark_read(&p);
        assert!(tracker.has_been_read(&p));
    }

    #[test]
    fn never_cleared_across_queries() {
        let tracker = ReadTracker::new();
        let p = PathBuf::from("/tmp/a.txt");
        tracker.mark_read(&p);
        // simulate a second user query in the same session — no reset API exists
        assert!(tracker.has_been_read(&p));
    }
}
