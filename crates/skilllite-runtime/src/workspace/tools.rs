//! Adapts the free-function workspace operations into registrable
//! [`Tool`](crate::tool_executor::Tool) objects, each carrying its own
//! `ToolDefinition` for schema export (§6) and its own
//! `requires_confirmation` per §4.4's dispatch policy: reads and searches
//! run unattended, writes and shell commands gate on confirmation.

use super::bash::{CommandPolicy, PersistentShell};
use super::grep_tool::{self, GrepArgs, OutputMode};
use super::{glob_tool, list_directory, read_file, write_file, WorkspaceRoot};
use crate::message::{ToolDefinition, ToolParameter, ToolResult};
use crate::read_tracker::ReadTracker;
use crate::tool_executor::Tool;
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn opt_str(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(|x| x.as_str()).map(str::to_string)
}

fn opt_u64(v: &Value, key: &str) -> Option<u64> {
    v.get(key).and_then(|x| x.as_u64())
}

pub struct ReadFileTool {
    root: WorkspaceRoot,
    tracker: Arc<ReadTracker>,
}

impl ReadFileTool {
    pub fn new(root: WorkspaceRoot, tracker: Arc<ReadTracker>) -> Self {
        Self { root, tracker }
    }

    pub fn definition() -> ToolDefinition {
        ToolDefinition {
            name: "read_file".into(),
            description: "Read a file within the workspace, optionally windowed by line range.".into(),
            parameters: vec![
                ToolParameter {
                    name: "path".into(),
                    kind: "string".into(),
                    description: "Absolute path to the file".into(),
                    required: true,
                    r#enum: None,
                },
                ToolParameter {
                    name: "start_line".into(),
                    kind: "integer".into(),
                    description: "1-indexed first line to include".into(),
                    required: false,
                    r#enum: None,
                },
                ToolParameter {
                    name: "end_line".into(),
                    kind: "integer".into(),
                    description: "1-indexed last line to include (exclusive upper bound)".into(),
                    required: false,
                    r#enum: None,
                },
            ],
            requires_confirmation: false,
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn requires_confirmation(&self) -> bool {
        false
    }

    async fn call(&self, arguments: Value) -> ToolResult {
        let Some(path) = opt_str(&arguments, "path") else {
            return ToolResult::error("missing required argument: path");
        };
        let args = read_file::ReadFileArgs {
            path,
            start_line: opt_u64(&arguments, "start_line").map(|n| n as usize),
            end_line: opt_u64(&arguments, "end_line").map(|n| n as usize),
        };
        read_file::read_file(&self.root, &self.tracker, args)
    }
}

pub struct WriteFileTool {
    root: WorkspaceRoot,
}

impl WriteFileTool {
    pub fn new(root: WorkspaceRoot) -> Self {
        Self { root }
    }

    pub fn definition() -> ToolDefinition {
        ToolDefinition {
            name: "write_file".into(),
            description: "Write (create or overwrite) a whole file within the workspace.".into(),
            parameters: vec![
                ToolParameter {
                    name: "path".into(),
                    kind: "string".into(),
                    description: "Absolute path to the file".into(),
                    required: true,
                    r#enum: None,
                },
                ToolParameter {
                    name: "content".into(),
                    kind: "string".into(),
                    description: "Full file content".into(),
                    required: true,
                    r#enum: None,
                },
            ],
            requires_confirmation: true,
        }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn requires_confirmation(&self) -> bool {
        true
    }

    async fn call(&self, arguments: Value) -> ToolResult {
        let Some(path) = opt_str(&arguments, "path") else {
            return ToolResult::error("missing required argument: path");
        };
        let content = opt_str(&arguments, "content").unwrap_or_default();
        write_file::write_file(&self.root, &path, &content)
    }
}

pub struct EditFileTool {
    root: WorkspaceRoot,
    tracker: Arc<ReadTracker>,
}

impl EditFileTool {
    pub fn new(root: WorkspaceRoot, tracker: Arc<ReadTracker>) -> Self {
        Self { root, tracker }
    }

    pub fn definition() -> ToolDefinition {
        ToolDefinition {
            name: "edit_file".into(),
            description:
                "Replace an exact string occurrence in a file that has already been read this session."
                    .into(),
            parameters: vec![
                ToolParameter {
                    name: "path".into(),
                    kind: "string".into(),
                    description: "Absolute path to the file".into(),
                    required: true,
                    r#enum: None,
                },
                ToolParameter {
                    name: "old_string".into(),
                    kind: "string".into(),
                    description: "Exact text to replace".into(),
                    required: true,
                    r#enum: None,
                },
                ToolParameter {
                    name: "new_string".into(),
                    kind: "string".into(),
                    description: "Replacement text".into(),
                    required: true,
                    r#enum: None,
                },
                ToolParameter {
                    name: "replace_all".into(),
                    kind: "boolean".into(),
                    description: "Replace every occurrence instead of requiring a unique match".into(),
                    required: false,
                    r#enum: None,
                },
            ],
            requires_confirmation: true,
        }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn requires_confirmation(&self) -> bool {
        true
    }

    async fn call(&self, arguments: Value) -> ToolResult {
        let Some(path) = opt_str(&arguments, "path") else {
            return ToolResult::error("missing required argument: path");
        };
        let Some(old_string) = opt_str(&arguments, "old_string") else {
            return ToolResult::error("missing required argument: old_string");
        };
        let new_string = opt_str(&arguments, "new_string").unwrap_or_default();
        let replace_all = arguments
            .get("replace_all")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        super::edit_file::edit_file(&self.root, &self.tracker, &path, &old_string, &new_string, replace_all)
    }
}

pub struct ListDirectoryTool {
    root: WorkspaceRoot,
}

impl ListDirectoryTool {
    pub fn new(root: WorkspaceRoot) -> Self {
        Self { root }
    }

    pub fn definition() -> ToolDefinition {
        ToolDefinition {
            name: "list_directory".into(),
            description: "List a directory tree within the workspace, hiding VCS/build/cache directories.".into(),
            parameters: vec![ToolParameter {
                name: "path".into(),
                kind: "string".into(),
                description: "Absolute path to the directory".into(),
                required: true,
                r#enum: None,
            }],
            requires_confirmation: false,
        }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn requires_confirmation(&self) -> bool {
        false
    }

    async fn call(&self, arguments: Value) -> ToolResult {
        let Some(path) = opt_str(&arguments, "path") else {
            return ToolResult::error("missing required argument: path");
        };
        list_directory::list_directory(&self.root, &path, &[])
    }
}

pub struct GlobTool {
    root: WorkspaceRoot,
}

impl GlobTool {
    pub fn new(root: WorkspaceRoot) -> Self {
        Self { root }
    }

    pub fn definition() -> ToolDefinition {
        ToolDefinition {
            name: "glob".into(),
            description: "Find files by a POSIX-style glob pattern (`**` supported), newest first.".into(),
            parameters: vec![
                ToolParameter {
                    name: "pattern".into(),
                    kind: "string".into(),
                    description: "Glob pattern, e.g. `**/*.rs`".into(),
                    required: true,
                    r#enum: None,
                },
                ToolParameter {
                    name: "path".into(),
                    kind: "string".into(),
                    description: "Absolute directory to search under (defaults to workspace root)".into(),
                    required: false,
                    r#enum: None,
                },
            ],
            requires_confirmation: false,
        }
    }
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn requires_confirmation(&self) -> bool {
        false
    }

    async fn call(&self, arguments: Value) -> ToolResult {
        let Some(pattern) = opt_str(&arguments, "pattern") else {
            return ToolResult::error("missing required argument: pattern");
        };
        let base_path = opt_str(&arguments, "path");
        glob_tool::glob(&self.root, &pattern, base_path.as_deref())
    }
}

pub struct GrepTool {
    root: WorkspaceRoot,
    rg_binary: PathBuf,
}

impl GrepTool {
    pub fn new(root: WorkspaceRoot, rg_binary: PathBuf) -> Self {
        Self { root, rg_binary }
    }

    pub fn definition() -> ToolDefinition {
        ToolDefinition {
            name: "grep".into(),
            description: "Search file contents by regex (content/files_with_matches/count modes).".into(),
            parameters: vec![
                ToolParameter {
                    name: "pattern".into(),
                    kind: "string".into(),
                    description: "Regular expression".into(),
                    required: true,
                    r#enum: None,
                },
                ToolParameter {
                    name: "path".into(),
                    kind: "string".into(),
                    description: "Absolute directory or file to search (defaults to workspace root)".into(),
                    required: false,
                    r#enum: None,
                },
                ToolParameter {
                    name: "output_mode".into(),
                    kind: "string".into(),
                    description: "content | files_with_matches | count".into(),
                    required: false,
                    r#enum: Some(vec!["content".into(), "files_with_matches".into(), "count".into()]),
                },
                ToolParameter {
                    name: "-i".into(),
                    kind: "boolean".into(),
                    description: "Case-insensitive search".into(),
                    required: false,
                    r#enum: None,
                },
            ],
            requires_confirmation: false,
        }
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn requires_confirmation(&self) -> bool {
        false
    }

    async fn call(&self, arguments: Value) -> ToolResult {
        let Some(pattern) = opt_str(&arguments, "pattern") else {
            return ToolResult::error("missing required argument: pattern");
        };
        let path = opt_str(&arguments, "path");
        let mode = match opt_str(&arguments, "output_mode").as_deref() {
            Some("files_with_matches") => OutputMode::FilesWithMatches,
            Some("count") => OutputMode::Count,
            _ => OutputMode::Content,
        };
        let args = GrepArgs {
            pattern: &pattern,
            path: path.as_deref(),
            mode,
            case_insensitive: arguments.get("-i").and_then(|v| v.as_bool()).unwrap_or(false),
            glob: None,
            file_type: None,
            before: opt_u64(&arguments, "-B").map(|n| n as u32),
            after: opt_u64(&arguments, "-A").map(|n| n as u32),
            context: opt_u64(&arguments, "-C").map(|n| n as u32),
            head_limit: opt_u64(&arguments, "head_limit").map(|n| n as usize),
            multiline: arguments.get("multiline").and_then(|v| v.as_bool()).unwrap_or(false),
        };
        grep_tool::grep(&self.root, &self.rg_binary, args)
    }
}

pub struct BashTool {
    shell: Arc<PersistentShell>,
    policy: CommandPolicy,
    default_timeout: Duration,
}

impl BashTool {
    pub fn new(shell: Arc<PersistentShell>, policy: CommandPolicy, default_timeout: Duration) -> Self {
        Self { shell, policy, default_timeout }
    }

    pub fn definition() -> ToolDefinition {
        ToolDefinition {
            name: "bash".into(),
            description: "Run a shell command in the persistent workspace shell.".into(),
            parameters: vec![
                ToolParameter {
                    name: "command".into(),
                    kind: "string".into(),
                    description: "Shell command to run".into(),
                    required: true,
                    r#enum: None,
                },
                ToolParameter {
                    name: "timeout_ms".into(),
                    kind: "integer".into(),
                    description: "Override the default command timeout".into(),
                    required: false,
                    r#enum: None,
                },
            ],
            requires_confirmation: true,
        }
    }

    /// Disallowed commands still surface as a tool error rather than a
    /// confirmation prompt; the executor's confirmation gate covers the
    /// "needs confirmation" and "auto-approved" outcomes.
    pub fn policy_decision(&self, command: &str) -> super::bash::PolicyDecision {
        self.policy.evaluate(command)
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn requires_confirmation(&self) -> bool {
        true
    }

    async fn call(&self, arguments: Value) -> ToolResult {
        let Some(command) = opt_str(&arguments, "command") else {
            return ToolResult::error("missing required argument: command");
        };

        if matches!(self.policy.evaluate(&command), super::bash::PolicyDecision::Disallowed) {
            return ToolResult::error(format!("command is on the disallow list: {command}"));
        }

        let timeout = opt_u64(&arguments, "timeout_ms")
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);

        let shell = Arc::clone(&self.shell);
        let command_owned = command.clone();
        let outcome = tokio::task::spawn_blocking(move || shell.execute(&command_owned, timeout)).await;

        match outcome {
            Ok(Ok(result)) => {
                let mut text = result.output;
                if result.timed_out {
                    text.push_str(&format!(
                        "\n\n(Command timed out after {}ms; it may still be running in the background.)",
                        timeout.as_millis()
                    ));
                    return ToolResult::error(text);
                }
                match result.exit_code {
                    Some(0) => ToolResult::ok(text),
                    Some(code) => ToolResult::error(format!("{text}\n\n(exit code {code})")),
                    None => ToolResult::error(text),
                }
            }
            Ok(Err(e)) => ToolResult::error(format!("shell error: {e}")),
            Err(e) => ToolResult::error(format!("shell task panicked: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_tracker::ReadTracker;
    use serde_json::json;

    #[tokio::test]
    async fn read_file_tool_requires_path_argument() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ReadFileTool::new(WorkspaceRoot::new(dir.path()), Arc::new(ReadTracker::new()));
        let result = tool.call(json!({})).await;
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn write_file_tool_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let tool = WriteFileTool::new(WorkspaceRoot::new(dir.path()));
        let path = dir.path().join("out.txt");
        let result = tool
            .call(json!({"path": path.to_str().unwrap(), "content": "hi"}))
            .await;
        assert!(result.is_success());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hi");
    }

    #[tokio::test]
    async fn edit_file_tool_rejects_without_prior_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "hello world").unwrap();
        let tool = EditFileTool::new(WorkspaceRoot::new(dir.path()), Arc::new(ReadTracker::new()));
        let result = tool
            .call(json!({
                "path": path.to_str().unwrap(),
                "old_string": "hello",
                "new_string": "goodbye",
            }))
            .await;
        assert!(!result.is_success());
    }

    #[test]
    fn tool_definitions_mark_confirmation_per_spec_dispatch_policy() {
        assert!(!ReadFileTool::definition().requires_confirmation);
        assert!(WriteFileTool::definition().requires_confirmation);
        assert!(EditFileTool::definition().requires_confirmation);
        assert!(!ListDirectoryTool::definition().requires_confirmation);
        assert!(!GlobTool::definition().requires_confirmation);
        assert!(!GrepTool::definition().requires_confirmation);
        assert!(BashTool::definition().requires_confirmation);
    }
}
