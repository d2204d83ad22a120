//! Safe, path-validated file operations: read, write, search & replace.
//!
//! Every function here takes an explicit `root` and refuses to touch
//! anything outside it, regardless of `..` components or absolute paths in
//! the untrusted `path` argument. This is the primitive layer; tool-facing
//! behavior (JSON argument parsing, fuzzy search/replace, truncation for
//! LLM context) lives above it.

use std::fs;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("path escapes root: {path} (root: {root})")]
    PathEscapesRoot { path: String, root: String },
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no match found for old_string in {path}")]
    NoMatch { path: String },
    #[error("old_string is not unique in {path} ({count} occurrences)")]
    NotUnique { path: String, count: usize },
}

pub type Result<T> = std::result::Result<T, FsError>;

/// Collapse `.`/`..` components lexically without touching the filesystem
/// (so it also works for paths that don't exist yet, e.g. a new file).
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Resolve `path` (absolute or relative to `root`) and ensure the result is
/// still inside `root` after normalization.
pub fn resolve_within(root: &Path, path: &str) -> Result<PathBuf> {
    let input = Path::new(path);
    let joined = if input.is_absolute() {
        input.to_path_buf()
    } else {
        root.join(input)
    };
    let normalized = normalize(&joined);
    if !normalized.starts_with(root) {
        return Err(FsError::PathEscapesRoot {
            path: path.to_string(),
            root: root.display().to_string(),
        });
    }
    Ok(normalized)
}

/// Read a file as UTF-8 text, with the path validated against `root`.
pub fn read_to_string(root: &Path, path: &str) -> Result<String> {
    let resolved = resolve_within(root, path)?;
    fs::read_to_string(&resolved).map_err(|source| FsError::Io {
        path: resolved.display().to_string(),
        source,
    })
}

/// Write `content` to `path` (creating parent directories), with the path
/// validated against `root`.
pub fn write(root: &Path, path: &str, content: &str) -> Result<PathBuf> {
    let resolved = resolve_within(root, path)?;
    if let Some(parent) = resolved.parent() {
        fs::create_dir_all(parent).map_err(|source| FsError::Io {
            path: parent.display().to_string(),
            source,
        })?;
    }
    fs::write(&resolved, content).map_err(|source| FsError::Io {
        path: resolved.display().to_string(),
        source,
    })?;
    Ok(resolved)
}

/// Append `content` to `path` (creating it and parent directories if needed).
pub fn append(root: &Path, path: &str, content: &str) -> Result<PathBuf> {
    use std::io::Write as _;
    let resolved = resolve_within(root, path)?;
    if let Some(parent) = resolved.parent() {
        fs::create_dir_all(parent).map_err(|source| FsError::Io {
            path: parent.display().to_string(),
            source,
        })?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&resolved)
        .map_err(|source| FsError::Io {
            path: resolved.display().to_string(),
            source,
        })?;
    file.write_all(content.as_bytes()).map_err(|source| FsError::Io {
        path: resolved.display().to_string(),
        source,
    })?;
    Ok(resolved)
}

/// Replace the first (or every, with `replace_all`) exact occurrence of
/// `old` with `new` in `path`. Fails if `old` isn't found, or — unless
/// `replace_all` — if it occurs more than once (ambiguous edit).
pub fn search_replace(
    root: &Path,
    path: &str,
    old: &str,
    new: &str,
    replace_all: bool,
) -> Result<String> {
    let resolved = resolve_within(root, path)?;
    let content = fs::read_to_string(&resolved).map_err(|source| FsError::Io {
        path: resolved.display().to_string(),
        source,
    })?;

    let count = content.matches(old).count();
    if count == 0 {
        return Err(FsError::NoMatch {
            path: resolved.display().to_string(),
        });
    }
    if count > 1 && !replace_all {
        return Err(FsError::NotUnique {
            path: resolved.display().to_string(),
            count,
        });
    }

    let updated = if replace_all {
        content.replace(old, new)
    } else {
        content.replacen(old, new, 1)
    };
    fs::write(&resolved, &updated).map_err(|source| FsError::Io {
        path: resolved.display().to_string(),
        source,
    })?;
    Ok(updated)
}

/// Search file contents under `root` for lines matching `pattern` (regex).
/// Returns up to `max_matches` `(relative_path, line_number, line)` tuples.
pub fn grep(root: &Path, pattern: &str, max_matches: usize) -> Result<Vec<(String, usize, String)>> {
    let re = regex::Regex::new(pattern).map_err(|e| FsError::Io {
        path: pattern.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()),
    })?;
    let mut matches = Vec::new();
    grep_dir(root, root, &re, max_matches, &mut matches)?;
    Ok(matches)
}

fn grep_dir(
    root: &Path,
    dir: &Path,
    re: &regex::Regex,
    max_matches: usize,
    matches: &mut Vec<(String, usize, String)>,
) -> Result<()> {
    if matches.len() >= max_matches {
        return Ok(());
    }
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return Ok(()), // unreadable dir (permissions) — skip, not fatal
    };
    for entry in entries.filter_map(|e| e.ok()) {
        if matches.len() >= max_matches {
            break;
        }
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if path.is_dir() {
            if matches!(name.as_str(), "node_modules" | ".git" | "target" | "__pycache__") {
                continue;
            }
            grep_dir(root, &path, re, max_matches, matches)?;
        } else if let Ok(content) = fs::read_to_string(&path) {
            let rel = path.strip_prefix(root).unwrap_or(&path).display().to_string();
            for (lineno, line) in content.lines().enumerate() {
                if matches.len() >= max_matches {
                    break;
                }
                if re.is_match(line) {
                    matches.push((rel.clone(), lineno + 1, line.to_string()));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_within_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_within(dir.path(), "../../etc/passwd").unwrap_err();
        assert!(matches!(err, FsError::PathEscapesRoot { .. }));
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a/b.txt", "hello").unwrap();
        assert_eq!(read_to_string(dir.path(), "a/b.txt").unwrap(), "hello");
    }

    #[test]
    fn search_replace_rejects_ambiguous_match() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "f.txt", "foo foo").unwrap();
        let err = search_replace(dir.path(), "f.txt", "foo", "bar", false).unwrap_err();
        assert!(matches!(err, FsError::NotUnique { count: 2, .. }));
    }

    #[test]
    fn search_replace_all_replaces_every_occurrence() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "f.txt", "foo foo").unwrap();
        let updated = search_replace(dir.path(), "f.txt", "foo", "bar", true).unwrap();
        assert_eq!(updated, "bar bar");
    }

    #[test]
    fn grep_finds_matching_lines() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "f.txt", "alpha\nbeta\ngamma").unwrap();
        let hits = grep(dir.path(), "^b", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1, 2);
    }
}
