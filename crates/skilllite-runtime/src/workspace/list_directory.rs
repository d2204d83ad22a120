//! `list_directory`: a recursive tree listing with default-ignore patterns
//! and a character-budget cap.

use super::{is_default_ignored, WorkspaceRoot, LIST_DIRECTORY_CHAR_BUDGET};
use crate::message::ToolResult;
use std::path::Path;

pub fn list_directory(root: &WorkspaceRoot, path: &str, extra_ignore_globs: &[String]) -> ToolResult {
    let resolved = match root.resolve(path, true) {
        Ok(p) => p,
        Err(e) => return ToolResult::error(e.to_string()),
    };
    if !resolved.is_dir() {
        return ToolResult::error(format!("{path} is not a directory"));
    }

    let mut lines = Vec::new();
    let mut truncated = false;
    walk(&resolved, 0, extra_ignore_globs, &mut lines, &mut truncated);

    let mut body = lines.join("\n");
    if body.len() > LIST_DIRECTORY_CHAR_BUDGET {
        body.truncate(LIST_DIRECTORY_CHAR_BUDGET);
        truncated = true;
    }

    if truncated {
        body.push_str(
            "\n\n(Listing truncated — large or deep directories are not shown in full. \
Narrow the path or use glob/grep for targeted search.)",
        );
    }
    body.push_str(
        "\n\n(VCS, build, cache, virtualenv, and IDE directories are hidden by default; \
use glob or grep if you need to search inside them.)",
    );

    ToolResult::ok(body)
}

fn walk(dir: &Path, depth: usize, extra_ignore: &[String], out: &mut Vec<String>, truncated: &mut bool) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut entries: Vec<_> = entries.filter_map(Result::ok).collect();
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().to_string();
        if is_default_ignored(&name) {
            continue;
        }
        if extra_ignore.iter().any(|pat| glob_match(pat, &name)) {
            continue;
        }

        let indent = "  ".repeat(depth);
        let is_dir = entry.path().is_dir();
        out.push(format!("{indent}{name}{}", if is_dir { "/" } else { "" }));

        if is_dir {
            if out.len() > 5000 {
                *truncated = true;
                return;
            }
            walk(&entry.path(), depth + 1, extra_ignore, out, truncated);
        }
    }
}

/// Minimal glob match (`*` wildcard only) sufficient for extra ignore
/// patterns on a single path component.
fn glob_match(pattern: &str, name: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == name;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut rest = name;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !rest.starts_with(part) {
                return false;
            }
            rest = &rest[part.len()..];
        } else if let Some(idx) = rest.find(part) {
            rest = &rest[idx + part.len()..];
        } else {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), "y").unwrap();
        let root = WorkspaceRoot::new(dir.path());
        let result = list_directory(&root, dir.path().to_str().unwrap(), &[]);
        assert!(result.content.contains("a.txt"));
        assert!(result.content.contains("sub/"));
        assert!(result.content.contains("b.txt"));
    }

    #[test]
    fn skips_default_ignored_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("node_modules")).unwrap();
        std::fs::write(dir.path().join("node_modules/pkg.json"), "{}").unwrap();
        std::fs::write(dir.path().join("keep.txt"), "x").unwrap();
        let root = WorkspaceRoot::new(dir.path());
        let result = list_directory(&root, dir.path().to_str().unwrap(), &[]);
        assert!(!result.content.contains("node_modules"));
        assert!(result.content.contains("keep.txt"));
    }
}
