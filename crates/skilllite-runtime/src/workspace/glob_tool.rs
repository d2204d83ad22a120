//! `glob`: POSIX-style pattern matching with `**` support, filtered against
//! default-ignore patterns, sorted by mtime descending then path, capped at
//! 100 entries.

use super::{is_default_ignored, WorkspaceRoot, GLOB_RESULT_CAP};
use crate::message::ToolResult;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub fn glob(root: &WorkspaceRoot, pattern: &str, base_path: Option<&str>) -> ToolResult {
    let search_root = match base_path {
        Some(p) => match root.resolve(p, true) {
            Ok(resolved) => resolved,
            Err(e) => return ToolResult::error(e.to_string()),
        },
        None => root.path().to_path_buf(),
    };

    let regex = match glob_to_regex(pattern) {
        Ok(r) => r,
        Err(e) => return ToolResult::error(format!("invalid glob pattern {pattern:?}: {e}")),
    };

    let mut matches: Vec<(PathBuf, SystemTime)> = Vec::new();
    collect(&search_root, &search_root, &regex, &mut matches);

    matches.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let total = matches.len();
    let truncated = total > GLOB_RESULT_CAP;
    matches.truncate(GLOB_RESULT_CAP);

    let mut body = matches
        .into_iter()
        .map(|(p, _)| p.display().to_string())
        .collect::<Vec<_>>()
        .join("\n");

    if truncated {
        body.push_str(&format!(
            "\n\n(Truncated to {GLOB_RESULT_CAP} of {total} matches; narrow the pattern.)"
        ));
    }

    ToolResult::ok(body)
}

fn collect(base: &Path, dir: &Path, regex: &Regex, out: &mut Vec<(PathBuf, SystemTime)>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if path.is_dir() {
            if is_default_ignored(&name) {
                continue;
            }
            collect(base, &path, regex, out);
            continue;
        }
        let Ok(relative) = path.strip_prefix(base) else {
            continue;
        };
        let relative_str = relative.to_string_lossy().replace('\\', "/");
        if regex.is_match(&relative_str) {
            let mtime = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            out.push((path, mtime));
        }
    }
}

/// Translate a POSIX-style glob (with `**` matching across directory
/// separators) into an anchored regex.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut re = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        re.push_str("(?:.*/)?");
                    } else {
                        re.push_str(".*");
                    }
                } else {
                    re.push_str("[^/]*");
                }
            }
            '?' => re.push_str("[^/]"),
            '.' | '+' | '(' | ')' | '|' | '^' | '$' | '\\' => {
                re.push('\\');
                re.push(c);
            }
            other => re.push(other),
        }
    }
    re.push('$');
    Regex::new(&re)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_double_star_across_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        std::fs::write(dir.path().join("src/a.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/nested/b.rs"), "").unwrap();
        std::fs::write(dir.path().join("readme.md"), "").unwrap();
        let root = WorkspaceRoot::new(dir.path());
        let result = glob(&root, "**/*.rs", None);
        assert!(result.content.contains("a.rs"));
        assert!(result.content.contains("b.rs"));
        assert!(!result.content.contains("readme.md"));
    }

    #[test]
    fn truncates_to_cap_and_discloses_it() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..150 {
            std::fs::write(dir.path().join(format!("f{i}.txt")), "").unwrap();
        }
        let root = WorkspaceRoot::new(dir.path());
        let result = glob(&root, "*.txt", None);
        let count = result.content.lines().filter(|l| l.ends_with(".txt")).count();
        assert_eq!(count, GLOB_RESULT_CAP);
        assert!(result.content.contains("Truncated"));
    }
}
