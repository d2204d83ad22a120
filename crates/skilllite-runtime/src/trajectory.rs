//! Append-only structured event log for a session (`trajectory.jsonl`) plus
//! the overwritten-each-turn conversation snapshot (`llm_messages.json`)
//! used for history resume.

use crate::message::{Message, ToolCall};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum TrajectoryEvent {
    SessionStart {
        timestamp: String,
        session_id: String,
        workspace_path: String,
    },
    UserMessage {
        timestamp: String,
        session_id: String,
        prompt_id: String,
        content: Value,
    },
    AssistantResponse {
        timestamp: String,
        session_id: String,
        prompt_id: String,
        content: String,
        tool_calls: Vec<ToolCall>,
        #[serde(skip_serializing_if = "Option::is_none")]
        extra_data: Option<Value>,
    },
    ToolResult {
        timestamp: String,
        session_id: String,
        prompt_id: String,
        tool_call_id: String,
        content: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        arguments: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    ToolCallSanitized {
        timestamp: String,
        session_id: String,
        prompt_id: String,
        tool_call_id: String,
        before: String,
        after: String,
    },
    SessionSummary {
        timestamp: String,
        session_id: String,
        summary: Value,
    },
}

/// The overwritten-each-turn snapshot used by conversation resume (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub timestamp: String,
    pub session_id: String,
    pub messages: Vec<Message>,
    pub tools: Vec<String>,
}

pub struct TrajectoryWriter {
    trajectory_path: PathBuf,
    snapshot_path: PathBuf,
    log_path: PathBuf,
}

impl TrajectoryWriter {
    /// `<logs_dir>/<workspace_slug>/<session_id>/`
    pub fn new(logs_dir: &Path, workspace_slug: &str, session_id: &str) -> Result<Self> {
        let dir = logs_dir.join(workspace_slug).join(session_id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating session log dir {}", dir.display()))?;
        Ok(Self {
            trajectory_path: dir.join("trajectory.jsonl"),
            snapshot_path: dir.join("llm_messages.json"),
            log_path: dir.join("main.log"),
        })
    }

    pub fn append_event(&self, event: &TrajectoryEvent) -> Result<()> {
        let line = serde_json::to_string(event)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.trajectory_path)
            .with_context(|| format!("opening {}", self.trajectory_path.display()))?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    pub fn write_snapshot(&self, snapshot: &ConversationSnapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(snapshot)?;
        fs::write(&self.snapshot_path, json)
            .with_context(|| format!("writing {}", self.snapshot_path.display()))
    }

    pub fn read_snapshot(&self) -> Result<ConversationSnapshot> {
        let raw = fs::read_to_string(&self.snapshot_path)
            .with_context(|| format!("reading {}", self.snapshot_path.display()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// One JSON object per line: timestamp, level, logger, message, plus
    /// arbitrary key/value fields.
    pub fn log_line(&self, level: &str, logger: &str, message: &str, fields: Value) -> Result<()> {
        let mut entry = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "logger": logger,
            "message": message,
        });
        if let Value::Object(extra) = fields {
            if let Value::Object(base) = &mut entry {
                base.extend(extra);
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .with_context(|| format!("opening {}", self.log_path.display()))?;
        writeln!(file, "{}", serde_json::to_string(&entry)?)?;
        Ok(())
    }

    /// Read every line currently in the trajectory file. Used by property
    /// P6 tests: the set of lines at time T must be a prefix of the set at
    /// any later time T'.
    pub fn read_all_lines(&self) -> Result<Vec<String>> {
        if !self.trajectory_path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.trajectory_path)?;
        Ok(contents.lines().map(str::to_string).collect())
    }
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Serialize a user message's content the way the `user_message` trajectory
/// event expects it: a string, or a list of `{type, text | image_url}`
/// blocks with undefined fields elided. `serde`'s `skip_serializing_if`
/// annotations on `Block`/`Content` already produce this shape, so this is
/// just a thin `to_value` wrapper kept here for discoverability.
pub fn serialize_content(content: &crate::message::Content) -> Value {
    serde_json::to_value(content).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Content, Message};

    #[test]
    fn append_is_prefix_stable() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TrajectoryWriter::new(dir.path(), "ws-slug", "session_x").unwrap();
        let event = TrajectoryEvent::SessionStart {
            timestamp: now_rfc3339(),
            session_id: "session_x".into(),
            workspace_path: "/tmp/ws".into(),
        };
        writer.append_event(&event).unwrap();
        let first = writer.read_all_lines().unwrap();
        writer.append_event(&event).unwrap();
        let second = writer.read_all_lines().unwrap();
        assert_eq!(second[..first.len()], first[..]);
        assert_eq!(second.len(), first.len() + 1);
    }

    #[test]
    fn snapshot_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TrajectoryWriter::new(dir.path(), "ws-slug", "session_x").unwrap();
        let snap = ConversationSnapshot {
            timestamp: now_rfc3339(),
            session_id: "session_x".into(),
            messages: vec![Message::system("sys"), Message::user(Content::text("hi"))],
            tools: vec!["read_file".into()],
        };
        writer.write_snapshot(&snap).unwrap();
        let loaded = writer.read_snapshot().unwrap();
        assert_eq!(loaded.messages.len(), 2);
    }
}
