//! write_output / list_output: a dedicated output directory for generated
//! artifacts (reports, reformatted files, previewable HTML), separate from
//! the workspace the agent is editing so generated content never collides
//! with user files it didn't create.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use crate::types::{FunctionDef, ToolDefinition};

use super::{get_path_arg, list_dir_impl, normalize_path};

pub(super) fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDef {
                name: "write_output".to_string(),
                description: "Write a file to the dedicated output directory (for generated artifacts like reports or previewable HTML), separate from the user's workspace. Creates parent directories if needed.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "file_path": {
                            "type": "string",
                            "description": "Path relative to the output directory"
                        },
                        "path": {
                            "type": "string",
                            "description": "Alias for file_path"
                        },
                        "content": {
                            "type": "string",
                            "description": "Content to write"
                        }
                    },
                    "required": ["content"]
                }),
            },
        },
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDef {
                name: "list_output".to_string(),
                description: "List files previously written to the output directory.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "recursive": {
                            "type": "boolean",
                            "description": "List subdirectories recursively. Default: true."
                        }
                    },
                    "required": []
                }),
            },
        },
    ]
}

/// Directory for generated artifacts: `SKILLLITE_OUTPUT_DIR` if set, else
/// `<workspace>/output`.
pub(super) fn output_root(workspace: &Path) -> PathBuf {
    crate::types::get_output_dir()
        .map(PathBuf::from)
        .unwrap_or_else(|| workspace.join("output"))
}

fn resolve_output_path(rel: &str, workspace: &Path) -> Result<PathBuf> {
    let root = output_root(workspace);
    let input = Path::new(rel);
    let resolved = if input.is_absolute() {
        input.to_path_buf()
    } else {
        root.join(input)
    };
    let normalized = normalize_path(&resolved);
    if !normalized.starts_with(&root) {
        anyhow::bail!("Path escapes output directory: {} (output dir: {})", rel, root.display());
    }
    Ok(normalized)
}

pub(super) fn execute_write_output(args: &Value, workspace: &Path) -> Result<String> {
    let file_path = get_path_arg(args, false).context("file_path (or path) required")?;
    let content = args
        .get("content")
        .and_then(|v| v.as_str())
        .context("content required")?;

    let target = resolve_output_path(&file_path, workspace)?;
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
    }
    std::fs::write(&target, content)
        .with_context(|| format!("Failed to write output file: {}", target.display()))?;

    Ok(format!(
        "Wrote {} bytes to output/{}",
        content.len(),
        file_path
    ))
}

pub(super) fn execute_list_output(args: &Value) -> Result<String> {
    let recursive = args.get("recursive").and_then(|v| v.as_bool()).unwrap_or(true);
    // list_output has no workspace context (only the output dir matters), so
    // resolve it relative to the configured output dir directly.
    let root = crate::types::get_output_dir()
        .map(PathBuf::from)
        .context("No output directory configured or created yet (SKILLLITE_OUTPUT_DIR unset and nothing written via write_output)")?;
    if !root.exists() {
        return Ok("Output directory is empty.".to_string());
    }

    let mut entries = Vec::new();
    list_dir_impl(&root, &root, recursive, &mut entries, 0)?;
    if entries.is_empty() {
        Ok("Output directory is empty.".to_string())
    } else {
        Ok(entries.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_output_rejects_escape_via_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path();
        let err = resolve_output_path("../../etc/passwd", workspace).unwrap_err();
        assert!(err.to_string().contains("escapes output directory"));
    }

    #[test]
    fn write_output_creates_file_under_output_root() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path();
        let args = json!({"file_path": "report.txt", "content": "hello"});
        let msg = execute_write_output(&args, workspace).unwrap();
        assert!(msg.contains("report.txt"));
        assert!(output_root(workspace).join("report.txt").exists());
    }
}
