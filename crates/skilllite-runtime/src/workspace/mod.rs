//! The safety-bounded workspace toolkit: file read/edit/write with
//! read-before-edit enforcement, glob/grep search, directory listing, and a
//! persistent shell session — each gated by the same pre-flight check
//! pipeline (§4.4).

pub mod bash;
pub mod edit_file;
pub mod glob_tool;
pub mod grep_tool;
pub mod list_directory;
pub mod read_file;
pub mod tools;
pub mod write_file;

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("path must be absolute: {0}")]
    NotAbsolute(String),
    #[error("path does not exist: {0}")]
    NotFound(String),
    #[error("path escapes workspace root: {0}")]
    OutsideWorkspace(String),
    #[error("path is not a regular file: {0}")]
    NotAFile(String),
}

/// The absolute directory under which all workspace-tool file paths must
/// live; enforced by relative-path computation, not string prefix, so a
/// sibling directory with the root as a string prefix (`/ws-evil` vs.
/// `/ws`) is correctly rejected.
#[derive(Clone)]
pub struct WorkspaceRoot {
    root: PathBuf,
}

impl WorkspaceRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Run the pre-flight pipeline: reject relative paths, resolve
    /// (following symlinks), reject paths that escape the root via
    /// relative-path containment, and optionally require existence.
    pub fn resolve(&self, raw_path: &str, require_exists: bool) -> Result<PathBuf, PreflightError> {
        let input = Path::new(raw_path);
        if !input.is_absolute() {
            return Err(PreflightError::NotAbsolute(raw_path.to_string()));
        }

        let resolved = if require_exists {
            input
                .canonicalize()
                .map_err(|_| PreflightError::NotFound(raw_path.to_string()))?
        } else {
            // For not-yet-existing targets (write_file creating a new file),
            // canonicalize the deepest existing ancestor and rejoin the rest.
            canonicalize_best_effort(input)
        };

        let root = self
            .root
            .canonicalize()
            .unwrap_or_else(|_| self.root.clone());

        let relative = resolved
            .strip_prefix(&root)
            .map_err(|_| PreflightError::OutsideWorkspace(raw_path.to_string()))?;
        // A strip_prefix success with a leading ".." component would still
        // indicate an escape if symlink resolution produced one; guard it.
        if relative.starts_with("..") {
            return Err(PreflightError::OutsideWorkspace(raw_path.to_string()));
        }

        Ok(resolved)
    }
}

fn canonicalize_best_effort(path: &Path) -> PathBuf {
    let mut current = path.to_path_buf();
    let mut tail = Vec::new();
    loop {
        match current.canonicalize() {
            Ok(base) => {
                let mut result = base;
                for component in tail.into_iter().rev() {
                    result.push(component);
                }
                return result;
            }
            Err(_) => {
                let Some(file_name) = current.file_name().map(|f| f.to_os_string()) else {
                    return path.to_path_buf();
                };
                tail.push(file_name);
                if !current.pop() {
                    return path.to_path_buf();
                }
            }
        }
    }
}

pub const MAX_ESTIMATED_TOKENS: usize = 25_000;
pub const MAX_READ_FILE_BYTES: u64 = 256 * 1024;
pub const DEFAULT_LINE_WINDOW: usize = 1000;
pub const LIST_DIRECTORY_CHAR_BUDGET: usize = 40_000;
pub const GLOB_RESULT_CAP: usize = 100;
pub const GREP_OUTPUT_CAP: usize = 20_000;

/// Default-ignore patterns applied by `list_directory` and `glob`: VCS,
/// build, cache, virtualenv, and IDE directories.
pub const DEFAULT_IGNORE_DIRS: &[&str] = &[
    ".git", ".hg", ".svn", "node_modules", "target", "dist", "build", "__pycache__", ".venv",
    "venv", ".mypy_cache", ".pytest_cache", ".idea", ".vscode", ".DS_Store",
];

pub fn is_default_ignored(name: &str) -> bool {
    DEFAULT_IGNORE_DIRS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_relative_path() {
        let root = WorkspaceRoot::new("/tmp");
        let err = root.resolve("relative/path.txt", false).unwrap_err();
        assert!(matches!(err, PreflightError::NotAbsolute(_)));
    }

    #[test]
    fn rejects_path_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = WorkspaceRoot::new(dir.path());
        let outside = format!("{}-evil/file.txt", dir.path().display());
        let err = root.resolve(&outside, false).unwrap_err();
        assert!(matches!(err, PreflightError::OutsideWorkspace(_)));
    }

    #[test]
    fn accepts_path_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hi").unwrap();
        let root = WorkspaceRoot::new(dir.path());
        let path = dir.path().join("a.txt");
        let resolved = root.resolve(path.to_str().unwrap(), true).unwrap();
        assert!(resolved.ends_with("a.txt"));
    }
}
