//! `read_file`: size-guarded, encoding-tolerant file reads with line-range
//! windowing and Read-Tracker bookkeeping.

use super::{WorkspaceRoot, DEFAULT_LINE_WINDOW, MAX_ESTIMATED_TOKENS, MAX_READ_FILE_BYTES};
use crate::message::{estimate_tokens, ToolResult};
use crate::read_tracker::ReadTracker;

pub struct ReadFileArgs {
    pub path: String,
    pub start_line: Option<usize>,
    pub end_line: Option<usize>,
}

/// UTF-8 strict, then Latin-1 strict (every byte is valid Latin-1, so this
/// never fails), then UTF-8 with replacement characters as the final
/// fallback.
fn decode_with_fallback(bytes: &[u8]) -> String {
    if let Ok(s) = std::str::from_utf8(bytes) {
        return s.to_string();
    }
    bytes.iter().map(|&b| b as char).collect()
}

pub fn read_file(root: &WorkspaceRoot, tracker: &ReadTracker, args: ReadFileArgs) -> ToolResult {
    let resolved = match root.resolve(&args.path, true) {
        Ok(p) => p,
        Err(e) => return ToolResult::error(e.to_string()),
    };

    let metadata = match std::fs::metadata(&resolved) {
        Ok(m) => m,
        Err(e) => return ToolResult::error(format!("cannot stat {}: {e}", args.path)),
    };
    if !metadata.is_file() {
        return ToolResult::error(format!("{} is not a regular file", args.path));
    }

    let has_range = args.start_line.is_some() || args.end_line.is_some();
    if metadata.len() > MAX_READ_FILE_BYTES && !has_range {
        return ToolResult::error(format!(
            "{} is {} bytes, exceeding the {}-byte limit; pass start_line/end_line to read a range",
            args.path,
            metadata.len(),
            MAX_READ_FILE_BYTES
        ));
    }

    let bytes = match std::fs::read(&resolved) {
        Ok(b) => b,
        Err(e) => return ToolResult::error(format!("cannot read {}: {e}", args.path)),
    };
    let text = decode_with_fallback(&bytes);
    let all_lines: Vec<&str> = text.lines().collect();
    let total_lines = all_lines.len();

    let start = args.start_line.unwrap_or(1).max(1);
    let default_end = start + DEFAULT_LINE_WINDOW;
    let end = args.end_line.unwrap_or(default_end).min(total_lines);
    let truncated = args.end_line.is_none() && end < total_lines;

    let start_idx = (start - 1).min(all_lines.len());
    let end_idx = end.min(all_lines.len());
    let slice = &all_lines[start_idx..end_idx];

    let body: String = slice
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{:>6}\u{2192}{}", start_idx + i + 1, line))
        .collect::<Vec<_>>()
        .join("\n");

    if estimate_tokens(&body) > MAX_ESTIMATED_TOKENS {
        return ToolResult::error(format!(
            "{} would produce more than {} estimated tokens; narrow the line range",
            args.path, MAX_ESTIMATED_TOKENS
        ));
    }

    let mut output = body;
    if truncated {
        output.push_str(&format!(
            "\n\n(File truncated. Total lines: {total_lines}. Provide end_line to read more.)"
        ));
    }

    tracker.mark_read(&resolved);
    ToolResult::ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_with_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\nthree").unwrap();
        let root = WorkspaceRoot::new(dir.path());
        let tracker = ReadTracker::new();
        let path = dir.path().join("a.txt").to_string_lossy().to_string();
        let result = read_file(
            &root,
            &tracker,
            ReadFileArgs { path: path.clone(), start_line: None, end_line: None },
        );
        assert!(result.content.contains("1\u{2192}one"));
        assert!(tracker.has_been_read(std::path::Path::new(&dir.path().join("a.txt").canonicalize().unwrap())));
    }

    #[test]
    fn rejects_oversized_file_without_range() {
        let dir = tempfile::tempdir().unwrap();
        let big = "x".repeat(300 * 1024);
        std::fs::write(dir.path().join("big.txt"), big).unwrap();
        let root = WorkspaceRoot::new(dir.path());
        let tracker = ReadTracker::new();
        let path = dir.path().join("big.txt").to_string_lossy().to_string();
        let result = read_file(
            &root,
            &tracker,
            ReadFileArgs { path, start_line: None, end_line: None },
        );
        assert!(!result.is_success());
    }

    #[test]
    fn oversized_file_with_narrow_range_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let big = "x".repeat(300 * 1024);
        std::fs::write(dir.path().join("big.txt"), big).unwrap();
        let root = WorkspaceRoot::new(dir.path());
        let tracker = ReadTracker::new();
        let path = dir.path().join("big.txt").to_string_lossy().to_string();
        let result = read_file(
            &root,
            &tracker,
            ReadFileArgs { path, start_line: Some(1), end_line: Some(1) },
        );
        assert!(result.is_success());
    }
}
