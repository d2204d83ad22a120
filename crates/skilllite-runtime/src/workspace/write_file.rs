//! `write_file`: whole-file writes within the workspace, reporting
//! created-vs-updated and a line/char count. Requires confirmation (see
//! `ToolDefinition::requires_confirmation`).

use super::{WorkspaceRoot, MAX_ESTIMATED_TOKENS};
use crate::message::{estimate_tokens, ToolResult};

pub fn write_file(root: &WorkspaceRoot, path: &str, content: &str) -> ToolResult {
    let resolved = match root.resolve(path, false) {
        Ok(p) => p,
        Err(e) => return ToolResult::error(e.to_string()),
    };

    if estimate_tokens(content) > MAX_ESTIMATED_TOKENS {
        return ToolResult::error(format!(
            "content would produce more than {MAX_ESTIMATED_TOKENS} estimated tokens"
        ));
    }

    let existed = resolved.exists();

    if let Some(parent) = resolved.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return ToolResult::error(format!("cannot create parent directories: {e}"));
        }
    }

    if let Err(e) = std::fs::write(&resolved, content) {
        return ToolResult::error(format!("cannot write {path}: {e}"));
    }

    let lines = content.lines().count();
    let chars = content.chars().count();
    let verb = if existed { "Updated" } else { "Created" };
    ToolResult::ok(format!("{verb} {path} ({lines} lines, {chars} chars)"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = WorkspaceRoot::new(dir.path());
        let path = dir.path().join("new.txt").to_string_lossy().to_string();
        let result = write_file(&root, &path, "hello\nworld");
        assert!(result.content.contains("Created"));
        assert_eq!(std::fs::read_to_string(dir.path().join("new.txt")).unwrap(), "hello\nworld");
    }

    #[test]
    fn reports_updated_for_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("existing.txt"), "old").unwrap();
        let root = WorkspaceRoot::new(dir.path());
        let path = dir.path().join("existing.txt").to_string_lossy().to_string();
        let result = write_file(&root, &path, "new content");
        assert!(result.content.contains("Updated"));
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = WorkspaceRoot::new(dir.path());
        let path = dir.path().join("nested/dir/file.txt").to_string_lossy().to_string();
        let result = write_file(&root, &path, "content");
        assert!(result.is_success());
        assert!(dir.path().join("nested/dir/file.txt").exists());
    }
}
