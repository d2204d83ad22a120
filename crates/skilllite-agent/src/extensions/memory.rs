//! Durable memory tools: `memory_write` and `memory_search`.
//!
//! Backed by `skilllite_executor::memory`'s SQLite FTS5 index under
//! `~/.skilllite/chat/memory/`. Separate from the user's workspace — memory
//! persists across sessions and across different workspaces.

use serde_json::{json, Value};
use std::path::Path;

use crate::types::{FunctionDef, ToolDefinition, ToolResult};
use super::registry::MemoryVectorContext;

fn memory_data_root() -> std::path::PathBuf {
    skilllite_executor::workspace_root(None)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| std::path::PathBuf::from("."))
                .join(".skilllite")
        })
        .join("chat")
}

pub fn tool_definitions() -> Vec<ToolDefinition> {
    get_memory_tool_definitions()
}

pub fn get_memory_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDef {
                name: "memory_write".to_string(),
                description: "Save a durable note to memory (survives conversation compaction and future sessions). Use for user preferences, decisions, or facts worth remembering long-term.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "content": {
                            "type": "string",
                            "description": "The note to remember"
                        }
                    },
                    "required": ["content"]
                }),
            },
        },
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDef {
                name: "memory_search".to_string(),
                description: "Search previously saved memory notes by keyword.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "Keywords to search for"
                        }
                    },
                    "required": ["query"]
                }),
            },
        },
    ]
}

pub fn is_memory_tool(name: &str) -> bool {
    matches!(name, "memory_write" | "memory_search")
}

pub async fn execute_memory_tool(
    tool_name: &str,
    arguments: &str,
    _workspace: &Path,
    session_key: &str,
    _enable_memory_vector: bool,
    _embed_ctx: Option<&MemoryVectorContext<'_>>,
) -> ToolResult {
    let args: Value = match serde_json::from_str(arguments) {
        Ok(v) => v,
        Err(e) => {
            return ToolResult {
                tool_call_id: String::new(),
                tool_name: tool_name.to_string(),
                content: format!("Invalid arguments JSON: {}", e),
                is_error: true,
            };
        }
    };

    let result = match tool_name {
        "memory_write" => execute_memory_write(&args, session_key),
        "memory_search" => execute_memory_search(&args, session_key),
        _ => Err(anyhow::anyhow!("Unknown memory tool: {}", tool_name)),
    };

    match result {
        Ok(content) => ToolResult {
            tool_call_id: String::new(),
            tool_name: tool_name.to_string(),
            content,
            is_error: false,
        },
        Err(e) => ToolResult {
            tool_call_id: String::new(),
            tool_name: tool_name.to_string(),
            content: format!("Error: {}", e),
            is_error: true,
        },
    }
}

fn execute_memory_write(args: &Value, session_key: &str) -> anyhow::Result<String> {
    let content = args
        .get("content")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("'content' required"))?;

    let data_root = memory_data_root();
    let today = chrono::Local::now().format("%Y-%m-%d").to_string();
    let rel_path = format!("{}.md", today);
    let memory_dir = data_root.join("memory");
    std::fs::create_dir_all(&memory_dir)?;
    let path = memory_dir.join(&rel_path);
    let entry = format!("\n\n---\n\n{}", content);
    let final_content = if path.exists() {
        format!("{}{}", std::fs::read_to_string(&path)?, entry)
    } else {
        content.to_string()
    };
    std::fs::write(&path, &final_content)?;

    let idx_path = skilllite_executor::memory::index_path(&data_root, session_key);
    if let Some(parent) = idx_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = rusqlite::Connection::open(&idx_path)?;
    skilllite_executor::memory::ensure_index(&conn)?;
    skilllite_executor::memory::index_file(&conn, &rel_path, &final_content)?;

    Ok(format!("Saved to memory/{}", rel_path))
}

fn execute_memory_search(args: &Value, session_key: &str) -> anyhow::Result<String> {
    let query = args
        .get("query")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("'query' required"))?;

    let data_root = memory_data_root();
    let idx_path = skilllite_executor::memory::index_path(&data_root, session_key);
    if !idx_path.exists() {
        return Ok("No memories saved yet.".to_string());
    }
    let conn = rusqlite::Connection::open(&idx_path)?;
    skilllite_executor::memory::ensure_index(&conn)?;
    let hits = skilllite_executor::memory::search(&conn, query, 5)?;
    if hits.is_empty() {
        return Ok(format!("No memories found matching '{}'.", query));
    }
    let mut out = String::new();
    for hit in hits {
        out.push_str(&format!("- ({}) {}\n", hit.path, hit.snippet));
    }
    Ok(out)
}

/// Best-effort context injection: search memory for `user_message`'s keywords
/// and return a short system-message block, or `None` if nothing's indexed
/// yet or nothing matches. Never fails loudly — memory is an aid, not a
/// requirement.
pub fn build_memory_context(_workspace: &Path, session_key: &str, user_message: &str) -> Option<String> {
    let data_root = memory_data_root();
    let idx_path = skilllite_executor::memory::index_path(&data_root, session_key);
    if !idx_path.exists() {
        return None;
    }
    let conn = rusqlite::Connection::open(&idx_path).ok()?;
    skilllite_executor::memory::ensure_index(&conn).ok()?;
    let hits = skilllite_executor::memory::search(&conn, user_message, 3).ok()?;
    if hits.is_empty() {
        return None;
    }
    let mut out = String::from("[Relevant memory]\n");
    for hit in hits {
        out.push_str(&format!("- {}\n", hit.snippet));
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_memory_tool_matches_both_tools() {
        assert!(is_memory_tool("memory_write"));
        assert!(is_memory_tool("memory_search"));
        assert!(!is_memory_tool("read_file"));
    }

    #[test]
    fn tool_definitions_cover_both_names() {
        let defs = get_memory_tool_definitions();
        let names: Vec<&str> = defs.iter().map(|d| d.function.name.as_str()).collect();
        assert!(names.contains(&"memory_write"));
        assert!(names.contains(&"memory_search"));
    }
}
