//! `grep`: regex-over-files dispatched to an external ripgrep-class binary,
//! with content/files_with_matches/count modes.

use super::{WorkspaceRoot, GREP_OUTPUT_CAP};
use crate::message::ToolResult;
use std::path::Path;
use std::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Content,
    FilesWithMatches,
    Count,
}

pub struct GrepArgs<'a> {
    pub pattern: &'a str,
    pub path: Option<&'a str>,
    pub mode: OutputMode,
    pub case_insensitive: bool,
    pub glob: Option<&'a str>,
    pub file_type: Option<&'a str>,
    pub before: Option<u32>,
    pub after: Option<u32>,
    pub context: Option<u32>,
    pub head_limit: Option<usize>,
    pub multiline: bool,
}

#[derive(Debug)]
pub struct GrepValidationError(pub String);

/// Context flags must not coexist with file-list modes; `-C` is mutually
/// exclusive with `-A`/`-B`.
pub fn validate(args: &GrepArgs) -> Result<(), GrepValidationError> {
    let has_context_flags = args.before.is_some() || args.after.is_some() || args.context.is_some();
    if has_context_flags && args.mode != OutputMode::Content {
        return Err(GrepValidationError(
            "-A/-B/-C require output_mode=content".to_string(),
        ));
    }
    if args.context.is_some() && (args.before.is_some() || args.after.is_some()) {
        return Err(GrepValidationError(
            "-C is mutually exclusive with -A/-B".to_string(),
        ));
    }
    Ok(())
}

/// Resolve a ripgrep-class binary: a system install first, falling back to
/// a bundled per-architecture binary if one was provided.
pub fn resolve_binary(bundled_fallback: Option<&Path>) -> Option<std::path::PathBuf> {
    if let Ok(path) = which_rg() {
        return Some(path);
    }
    bundled_fallback.map(|p| p.to_path_buf())
}

fn which_rg() -> Result<std::path::PathBuf, ()> {
    for dir in std::env::var_os("PATH").iter().flat_map(std::env::split_paths) {
        let candidate = dir.join("rg");
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(())
}

pub fn grep(root: &WorkspaceRoot, rg_binary: &Path, args: GrepArgs) -> ToolResult {
    if let Err(e) = validate(&args) {
        return ToolResult::error(e.0);
    }

    let search_path = match args.path {
        Some(p) => match root.resolve(p, true) {
            Ok(resolved) => resolved,
            Err(e) => return ToolResult::error(e.to_string()),
        },
        None => root.path().to_path_buf(),
    };

    let mut cmd = Command::new(rg_binary);
    cmd.arg(args.pattern).arg(&search_path);

    if args.case_insensitive {
        cmd.arg("-i");
    }
    if args.multiline {
        cmd.arg("-U").arg("--multiline-dotall");
    }
    if let Some(glob) = args.glob {
        cmd.arg("--glob").arg(glob);
    }
    if let Some(t) = args.file_type {
        cmd.arg("--type").arg(t);
    }
    for dir in super::DEFAULT_IGNORE_DIRS {
        cmd.arg("--glob").arg(format!("!{dir}"));
    }

    match args.mode {
        OutputMode::Content => {
            cmd.arg("-n");
            if let Some(c) = args.context {
                cmd.arg("-C").arg(c.to_string());
            } else {
                if let Some(b) = args.before {
                    cmd.arg("-B").arg(b.to_string());
                }
                if let Some(a) = args.after {
                    cmd.arg("-A").arg(a.to_string());
                }
            }
        }
        OutputMode::FilesWithMatches => {
            cmd.arg("-l").arg("--sortr").arg("modified");
        }
        OutputMode::Count => {
            cmd.arg("-c");
        }
    }

    let output = match cmd.output() {
        Ok(o) => o,
        Err(e) => return ToolResult::error(format!("failed to spawn {}: {e}", rg_binary.display())),
    };

    // Exit code 1 means "no matches", not an error (B5).
    if !output.status.success() && output.status.code() != Some(1) {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return ToolResult::error(format!("grep failed: {stderr}"));
    }

    if output.status.code() == Some(1) {
        return ToolResult::ok("No matches found.");
    }

    let mut text = String::from_utf8_lossy(&output.stdout).to_string();

    if let Some(limit) = args.head_limit {
        text = text.lines().take(limit).collect::<Vec<_>>().join("\n");
    }

    if text.len() > GREP_OUTPUT_CAP {
        text.truncate(GREP_OUTPUT_CAP);
        text.push_str("\n\n(Output truncated.)");
    }

    ToolResult::ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_flags_require_content_mode() {
        let args = GrepArgs {
            pattern: "foo",
            path: None,
            mode: OutputMode::FilesWithMatches,
            case_insensitive: false,
            glob: None,
            file_type: None,
            before: Some(2),
            after: None,
            context: None,
            head_limit: None,
            multiline: false,
        };
        assert!(validate(&args).is_err());
    }

    #[test]
    fn context_mutually_exclusive_with_before_after() {
        let args = GrepArgs {
            pattern: "foo",
            path: None,
            mode: OutputMode::Content,
            case_insensitive: false,
            glob: None,
            file_type: None,
            before: Some(1),
            after: None,
            context: Some(2),
            head_limit: None,
            multiline: false,
        };
        assert!(validate(&args).is_err());
    }

    #[test]
    fn plain_content_mode_is_valid() {
        let args = GrepArgs {
            pattern: "foo",
            path: None,
            mode: OutputMode::Content,
            case_insensitive: true,
            glob: None,
            file_type: None,
            before: None,
            after: None,
            context: None,
            head_limit: None,
            multiline: false,
        };
        assert!(validate(&args).is_ok());
    }
}
