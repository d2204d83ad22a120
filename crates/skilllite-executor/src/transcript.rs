//! Conversation transcript: append-only jsonl, one file per session per day.
//!
//! Each line is a `TranscriptEntry`. A session's transcript can span several
//! daily files; `read_entries_for_session` reads all of them in file-date
//! order and concatenates their entries.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

fn date_today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

/// One line of a transcript file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TranscriptEntry {
    /// Marks the start of a session within this file (written once, idempotently).
    #[serde(rename = "session")]
    Session {
        id: String,
        session_id: String,
        workspace: Option<String>,
        started_at: String,
    },
    /// A single user/assistant/tool message.
    #[serde(rename = "message")]
    Message {
        id: String,
        parent_id: Option<String>,
        role: String,
        content: Option<String>,
        tool_calls: Option<Value>,
    },
    /// A compaction checkpoint: everything before it was summarized.
    #[serde(rename = "compaction")]
    Compaction {
        id: String,
        parent_id: Option<String>,
        first_kept_entry_id: String,
        tokens_before: u64,
        summary: Option<String>,
    },
}

/// Path for a session's transcript file on a given (or today's) date:
/// transcripts/{session_key}-{date}.jsonl
pub fn transcript_path_for_session(
    transcripts_dir: &Path,
    session_key: &str,
    date: Option<&str>,
) -> PathBuf {
    let date_str = date.map(|s| s.to_string()).unwrap_or_else(date_today);
    transcripts_dir.join(format!("{}-{}.jsonl", session_key, date_str))
}

/// Path for today's transcript file: transcripts/{session_key}-{date}.jsonl
pub fn transcript_path_today(transcripts_dir: &Path, session_key: &str) -> PathBuf {
    transcript_path_for_session(transcripts_dir, session_key, None)
}

/// Append one entry to `path`, creating the file and parent dirs if needed.
pub fn append_entry(path: &Path, entry: &TranscriptEntry) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open transcript: {}", path.display()))?;
    let line = serde_json::to_string(entry)?;
    writeln!(file, "{}", line)?;
    Ok(())
}

/// Write a `Session` header entry at `path` unless that session_id is already
/// recorded there (keeps `ensure_session_header` idempotent across restarts).
pub fn ensure_session_header(
    path: &Path,
    session_id: &str,
    workspace: Option<&str>,
) -> Result<()> {
    if path.exists() {
        let existing = read_entries(path)?;
        let already_present = existing.iter().any(|e| {
            matches!(e, TranscriptEntry::Session { session_id: sid, .. } if sid == session_id)
        });
        if already_present {
            return Ok(());
        }
    }
    let entry = TranscriptEntry::Session {
        id: uuid::Uuid::new_v4().to_string(),
        session_id: session_id.to_string(),
        workspace: workspace.map(|s| s.to_string()),
        started_at: chrono::Utc::now().to_rfc3339(),
    };
    append_entry(path, &entry)
}

/// Read and parse every line of a single transcript file, skipping blank
/// lines and lines that fail to parse (corrupt tail from a crashed write).
pub fn read_entries(path: &Path) -> Result<Vec<TranscriptEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open transcript: {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<TranscriptEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => tracing::warn!("Skipping malformed transcript line in {}: {}", path.display(), e),
        }
    }
    Ok(entries)
}

/// All transcript files belonging to `session_key`, sorted by file name
/// (and therefore chronologically, since names are `{key}-{date}.jsonl`).
pub fn list_transcript_files(transcripts_dir: &Path, session_key: &str) -> Result<Vec<PathBuf>> {
    if !transcripts_dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(transcripts_dir)
        .with_context(|| format!("Failed to read transcripts dir: {}", transcripts_dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension().map_or(false, |e| e == "jsonl")
                && p
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map_or(false, |n| n.starts_with(&format!("{}-", session_key)))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Concatenated entries across every daily file for `session_key`, in order.
pub fn read_entries_for_session(
    transcripts_dir: &Path,
    session_key: &str,
) -> Result<Vec<TranscriptEntry>> {
    let mut entries = Vec::new();
    for path in list_transcript_files(transcripts_dir, session_key)? {
        entries.extend(read_entries(&path)?);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s-2026-01-01.jsonl");
        ensure_session_header(&path, "session_x", Some("/tmp/ws")).unwrap();
        ensure_session_header(&path, "session_x", Some("/tmp/ws")).unwrap();
        let entries = read_entries(&path).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn message_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s-2026-01-01.jsonl");
        let entry = TranscriptEntry::Message {
            id: "m1".into(),
            parent_id: None,
            role: "user".into(),
            content: Some("hi".into()),
            tool_calls: None,
        };
        append_entry(&path, &entry).unwrap();
        let entries = read_entries(&path).unwrap();
        assert_eq!(entries.len(), 1);
        match &entries[0] {
            TranscriptEntry::Message { content, .. } => assert_eq!(content.as_deref(), Some("hi")),
            _ => panic!("expected message entry"),
        }
    }

    #[test]
    fn malformed_line_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s-2026-01-01.jsonl");
        std::fs::write(&path, "not json\n").unwrap();
        let entries = read_entries(&path).unwrap();
        assert!(entries.is_empty());
    }
}
