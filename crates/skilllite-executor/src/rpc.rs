//! JSON-RPC handlers exposing session/transcript/memory/plan operations to
//! `skilllite serve --stdio` (see `skilllite::stdio_rpc`). Each handler takes
//! the request's `params` object and returns the `result` value directly —
//! the stdio layer wraps it in the JSON-RPC envelope.
//!
//! All handlers accept an optional `data_root` param; when absent they fall
//! back to [`crate::skilllite_data_root`] joined with `"chat"`, matching
//! [`crate::workspace_root`]'s default.

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::PathBuf;

use crate::{memory, plan, session, transcript};

fn data_root_from(params: &Value) -> PathBuf {
    params
        .get("data_root")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .unwrap_or_else(|| crate::skilllite_data_root().join("chat"))
}

fn require_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .with_context(|| format!("'{}' required", key))
}

fn session_entry_json(entry: &session::SessionEntry) -> Value {
    json!({
        "session_id": entry.session_id,
        "created_at": entry.created_at,
        "updated_at": entry.updated_at,
        "compaction_count": entry.compaction_count,
        "memory_flush_compaction_count": entry.memory_flush_compaction_count,
        "memory_flush_at": entry.memory_flush_at,
    })
}

pub fn handle_session_create(params: &Value) -> Result<Value> {
    let data_root = data_root_from(params);
    let session_key = require_str(params, "session_key")?;
    let path = data_root.join("sessions.json");
    let mut store = session::SessionStore::load(&path)?;
    let entry = store.create_or_get(session_key).clone();
    store.save(&path)?;
    Ok(session_entry_json(&entry))
}

pub fn handle_session_get(params: &Value) -> Result<Value> {
    let data_root = data_root_from(params);
    let session_key = require_str(params, "session_key")?;
    let path = data_root.join("sessions.json");
    let store = session::SessionStore::load(&path)?;
    Ok(store.get(session_key).map(session_entry_json).unwrap_or(Value::Null))
}

pub fn handle_session_update(params: &Value) -> Result<Value> {
    let data_root = data_root_from(params);
    let session_key = require_str(params, "session_key")?;
    let path = data_root.join("sessions.json");
    let mut store = session::SessionStore::load(&path)?;
    store.create_or_get(session_key);
    if let Some(entry) = store.sessions.get_mut(session_key) {
        if let Some(c) = params.get("compaction_count").and_then(|v| v.as_u64()) {
            entry.compaction_count = c as u32;
        }
        if let Some(c) = params.get("memory_flush_compaction_count").and_then(|v| v.as_u64()) {
            entry.memory_flush_compaction_count = Some(c as u32);
        }
        if let Some(s) = params.get("memory_flush_at").and_then(|v| v.as_str()) {
            entry.memory_flush_at = Some(s.to_string());
        }
        entry.updated_at = chrono::Utc::now().to_rfc3339();
    }
    store.save(&path)?;
    Ok(store.get(session_key).map(session_entry_json).unwrap_or(Value::Null))
}

pub fn handle_transcript_append(params: &Value) -> Result<Value> {
    let data_root = data_root_from(params);
    let session_key = require_str(params, "session_key")?;
    let entry_json = params.get("entry").context("'entry' required")?;
    let entry: transcript::TranscriptEntry = serde_json::from_value(entry_json.clone())
        .context("'entry' is not a valid transcript entry")?;
    let t_path =
        transcript::transcript_path_today(&data_root.join("transcripts"), session_key);
    transcript::append_entry(&t_path, &entry)?;
    Ok(json!({"ok": true}))
}

pub fn handle_transcript_read(params: &Value) -> Result<Value> {
    let data_root = data_root_from(params);
    let session_key = require_str(params, "session_key")?;
    let entries =
        transcript::read_entries_for_session(&data_root.join("transcripts"), session_key)?;
    Ok(json!({"entries": entries}))
}

pub fn handle_transcript_ensure(params: &Value) -> Result<Value> {
    let data_root = data_root_from(params);
    let session_key = require_str(params, "session_key")?;
    let session_id = require_str(params, "session_id")?;
    let workspace = params.get("workspace").and_then(|v| v.as_str());
    let t_path =
        transcript::transcript_path_today(&data_root.join("transcripts"), session_key);
    transcript::ensure_session_header(&t_path, session_id, workspace)?;
    Ok(json!({"ok": true}))
}

pub fn handle_memory_write(params: &Value) -> Result<Value> {
    let data_root = data_root_from(params);
    let session_key = require_str(params, "session_key")?;
    let rel_path = require_str(params, "rel_path")?;
    let content = require_str(params, "content")?;

    let memory_dir = data_root.join("memory");
    std::fs::create_dir_all(&memory_dir)?;
    std::fs::write(memory_dir.join(rel_path), content)
        .with_context(|| format!("Failed to write memory file: {}", rel_path))?;

    let idx_path = memory::index_path(&data_root, session_key);
    if let Some(parent) = idx_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(&idx_path)?;
    memory::ensure_index(&conn)?;
    memory::index_file(&conn, rel_path, content)?;
    Ok(json!({"ok": true}))
}

pub fn handle_memory_search(params: &Value) -> Result<Value> {
    let data_root = data_root_from(params);
    let session_key = require_str(params, "session_key")?;
    let query = require_str(params, "query")?;
    let limit = params.get("limit").and_then(|v| v.as_u64()).unwrap_or(5) as usize;

    let idx_path = memory::index_path(&data_root, session_key);
    if !idx_path.exists() {
        return Ok(json!({"hits": []}));
    }
    let conn = Connection::open(&idx_path)?;
    memory::ensure_index(&conn)?;
    let hits = memory::search(&conn, query, limit)?;
    Ok(json!({
        "hits": hits.into_iter().map(|h| json!({"path": h.path, "snippet": h.snippet})).collect::<Vec<_>>()
    }))
}

/// Rough token estimate (chars / 4), matching the heuristic used to size
/// tool-result truncation elsewhere — not a real tokenizer, good enough for
/// deciding whether to compact or truncate.
pub fn handle_token_count(params: &Value) -> Result<Value> {
    let text = require_str(params, "text")?;
    Ok(json!({"tokens": text.chars().count() / 4}))
}

pub fn handle_plan_textify(params: &Value) -> Result<Value> {
    let plan_json = params.get("plan").context("'plan' required")?;
    let task = plan_json.get("task").and_then(|v| v.as_str()).unwrap_or("");
    let steps = plan_json.get("steps").and_then(|v| v.as_array()).cloned().unwrap_or_default();
    let mut lines = vec![format!("Task: {}", task)];
    for step in &steps {
        let id = step.get("id").and_then(|v| v.as_u64()).unwrap_or(0);
        let desc = step.get("description").and_then(|v| v.as_str()).unwrap_or("");
        let status = step.get("status").and_then(|v| v.as_str()).unwrap_or("pending");
        let marker = match status {
            "completed" => "[x]",
            "running" => "[>]",
            _ => "[ ]",
        };
        lines.push(format!("{} {}. {}", marker, id, desc));
    }
    Ok(json!({"text": lines.join("\n")}))
}

pub fn handle_plan_write(params: &Value) -> Result<Value> {
    let data_root = data_root_from(params);
    let session_key = require_str(params, "session_key")?;
    let plan_json = params.get("plan").context("'plan' required")?;
    plan::append_plan(&data_root.join("plans"), session_key, plan_json)?;
    Ok(json!({"ok": true}))
}

pub fn handle_plan_read(params: &Value) -> Result<Value> {
    let data_root = data_root_from(params);
    let session_key = require_str(params, "session_key")?;
    let latest = plan::read_latest_plan(&data_root.join("plans"), session_key, None)?;
    Ok(latest.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_create_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let params = json!({"data_root": dir.path().to_string_lossy(), "session_key": "k"});
        let created = handle_session_create(&params).unwrap();
        let fetched = handle_session_get(&params).unwrap();
        assert_eq!(created["session_id"], fetched["session_id"]);
    }

    #[test]
    fn token_count_is_rough_heuristic() {
        let result = handle_token_count(&json!({"text": "abcdefgh"})).unwrap();
        assert_eq!(result["tokens"], 2);
    }

    #[test]
    fn plan_textify_marks_status() {
        let plan = json!({
            "task": "do thing",
            "steps": [{"id": 1, "description": "step one", "status": "completed"}],
        });
        let result = handle_plan_textify(&json!({"plan": plan})).unwrap();
        assert!(result["text"].as_str().unwrap().contains("[x] 1. step one"));
    }
}
