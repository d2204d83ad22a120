//! `edit_file`: exact-string replacement with the read-before-edit
//! invariant (P4) and occurrence-count safety checks.

use super::{WorkspaceRoot, MAX_ESTIMATED_TOKENS};
use crate::message::{estimate_tokens, ToolResult};
use crate::read_tracker::ReadTracker;

const TAB_WIDTH: usize = 8;
const SNIPPET_CONTEXT_LINES: usize = 4;

fn expand_tabs(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for line in s.split_inclusive('\n') {
        let mut col = 0usize;
        for c in line.chars() {
            if c == '\t' {
                let spaces = TAB_WIDTH - (col % TAB_WIDTH);
                out.push_str(&" ".repeat(spaces));
                col += spaces;
            } else {
                out.push(c);
                if c == '\n' {
                    col = 0;
                } else {
                    col += 1;
                }
            }
        }
    }
    out
}

pub fn edit_file(
    root: &WorkspaceRoot,
    tracker: &ReadTracker,
    path: &str,
    old_string: &str,
    new_string: &str,
    replace_all: bool,
) -> ToolResult {
    let resolved = match root.resolve(path, true) {
        Ok(p) => p,
        Err(e) => return ToolResult::error(e.to_string()),
    };

    let metadata = match std::fs::metadata(&resolved) {
        Ok(m) => m,
        Err(e) => return ToolResult::error(format!("cannot stat {path}: {e}")),
    };
    if !metadata.is_file() {
        return ToolResult::error(format!("{path} is not a regular file"));
    }

    if !tracker.has_been_read(&resolved) {
        return ToolResult::error(format!(
            "File has not been read yet. Read {path} with read_file before editing it."
        ));
    }

    let old_string = expand_tabs(old_string);
    let new_string_expanded = expand_tabs(new_string);

    if old_string == new_string_expanded {
        return ToolResult::error("old_string and new_string are identical; nothing to do");
    }

    let raw = match std::fs::read(&resolved) {
        Ok(b) => b,
        Err(e) => return ToolResult::error(format!("cannot read {path}: {e}")),
    };
    let original_text = String::from_utf8_lossy(&raw).to_string();
    let content = expand_tabs(&original_text);

    let occurrences: Vec<usize> = content
        .match_indices(old_string.as_str())
        .map(|(idx, _)| idx)
        .collect();

    if occurrences.is_empty() {
        return ToolResult::error(format!("string not found in {path}: {old_string:?}"));
    }

    if occurrences.len() > 1 && !replace_all {
        let line_numbers: Vec<String> = occurrences
            .iter()
            .map(|&idx| (content[..idx].matches('\n').count() + 1).to_string())
            .collect();
        return ToolResult::error(format!(
            "old_string is not unique in {path}: found on lines {}. Pass replace_all=true or include more surrounding context.",
            line_numbers.join(", ")
        ));
    }

    let new_content = if replace_all {
        content.replace(old_string.as_str(), &new_string_expanded)
    } else {
        content.replacen(old_string.as_str(), &new_string_expanded, 1)
    };

    if estimate_tokens(&new_content) > MAX_ESTIMATED_TOKENS {
        return ToolResult::error(format!(
            "resulting content would exceed {MAX_ESTIMATED_TOKENS} estimated tokens"
        ));
    }

    if let Err(e) = std::fs::write(&resolved, &new_content) {
        return ToolResult::error(format!("cannot write {path}: {e}"));
    }

    let first_occurrence = occurrences[0];
    let replaced_line = content[..first_occurrence].matches('\n').count() + 1;
    let snippet = build_snippet(&new_content, replaced_line, SNIPPET_CONTEXT_LINES);

    ToolResult::ok(format!(
        "Edited {path}. Replaced {} occurrence(s).\n\n{snippet}",
        if replace_all { occurrences.len() } else { 1 }
    ))
}

fn build_snippet(content: &str, around_line: usize, context: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let start = around_line.saturating_sub(context + 1);
    let end = (around_line + context).min(lines.len());
    lines[start..end]
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{:>6}\u{2192}{}", start + i + 1, line))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, WorkspaceRoot, ReadTracker, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.py"), "def run():\n    pass\n").unwrap();
        let root = WorkspaceRoot::new(dir.path());
        let tracker = ReadTracker::new();
        let resolved = dir.path().join("f.py").canonicalize().unwrap();
        (dir, root, tracker, resolved)
    }

    #[test]
    fn rejects_edit_without_prior_read() {
        let (dir, root, tracker, _) = setup();
        let path = dir.path().join("f.py").to_string_lossy().to_string();
        let result = edit_file(&root, &tracker, &path, "pass", "return 0", false);
        assert!(!result.is_success());
        assert!(result.content.contains("has not been read"));
    }

    #[test]
    fn happy_path_replaces_and_writes() {
        let (dir, root, tracker, resolved) = setup();
        tracker.mark_read(&resolved);
        let path = dir.path().join("f.py").to_string_lossy().to_string();
        let result = edit_file(
            &root,
            &tracker,
            &path,
            "def run():\n    pass",
            "def run():\n    return 0",
            false,
        );
        assert!(result.is_success());
        let written = std::fs::read_to_string(&resolved).unwrap();
        assert!(written.contains("return 0"));
    }

    #[test]
    fn identical_strings_rejected() {
        let (dir, root, tracker, resolved) = setup();
        tracker.mark_read(&resolved);
        let path = dir.path().join("f.py").to_string_lossy().to_string();
        let result = edit_file(&root, &tracker, &path, "pass", "pass", false);
        assert!(!result.is_success());
        let written = std::fs::read_to_string(&resolved).unwrap();
        assert!(written.contains("pass"));
    }

    #[test]
    fn non_unique_without_replace_all_lists_lines() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.py"), "x = 1\nx = 1\n").unwrap();
        let root = WorkspaceRoot::new(dir.path());
        let tracker = ReadTracker::new();
        let resolved = dir.path().join("f.py").canonicalize().unwrap();
        tracker.mark_read(&resolved);
        let path = dir.path().join("f.py").to_string_lossy().to_string();
        let result = edit_file(&root, &tracker, &path, "x = 1", "x = 2", false);
        assert!(!result.is_success());
        assert!(result.content.contains("lines 1, 2"));
    }

    #[test]
    fn replace_all_replaces_every_occurrence() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.py"), "x = 1\nx = 1\n").unwrap();
        let root = WorkspaceRoot::new(dir.path());
        let tracker = ReadTracker::new();
        let resolved = dir.path().join("f.py").canonicalize().unwrap();
        tracker.mark_read(&resolved);
        let path = dir.path().join("f.py").to_string_lossy().to_string();
        let result = edit_file(&root, &tracker, &path, "x = 1", "x = 2", true);
        assert!(result.is_success());
        let written = std::fs::read_to_string(&resolved).unwrap();
        assert_eq!(written, "x = 2\nx = 2\n");
    }

    #[test]
    fn string_not_found_rejected() {
        let (dir, root, tracker, resolved) = setup();
        tracker.mark_read(&resolved);
        let path = dir.path().join("f.py").to_string_lossy().to_string();
        let result = edit_file(&root, &tracker, &path, "does-not-exist", "x", false);
        assert!(!result.is_success());
        assert!(result.content.contains("string not found"));
    }
}
