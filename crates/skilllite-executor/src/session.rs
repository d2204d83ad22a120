//! Session registry: maps a stable session key (derived from workspace +
//! invocation) to a generated session id and compaction bookkeeping.
//!
//! Persisted as a single `sessions.json` map, rewritten whole on every save —
//! sessions are created rarely compared to transcript/plan appends, so this
//! doesn't need append-only treatment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Per-key session state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub session_id: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub compaction_count: u32,
    /// Compaction count at which the memory flush last ran, if any — compared
    /// against `compaction_count + 1` to decide whether a flush is due.
    #[serde(default)]
    pub memory_flush_compaction_count: Option<u32>,
    #[serde(default)]
    pub memory_flush_at: Option<String>,
}

impl SessionEntry {
    fn new(session_id: String) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            session_id,
            created_at: now.clone(),
            updated_at: now,
            compaction_count: 0,
            memory_flush_compaction_count: None,
            memory_flush_at: None,
        }
    }
}

/// `sessions.json`: session_key -> SessionEntry.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SessionStore {
    pub sessions: HashMap<String, SessionEntry>,
}

impl SessionStore {
    /// Load from `path`, or start empty if it doesn't exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read sessions store: {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse sessions store: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write sessions store: {}", path.display()))
    }

    pub fn get(&self, session_key: &str) -> Option<&SessionEntry> {
        self.sessions.get(session_key)
    }

    /// Return the existing entry for `session_key`, creating one with a
    /// freshly generated session id if it doesn't exist yet.
    pub fn create_or_get(&mut self, session_key: &str) -> &SessionEntry {
        self.sessions
            .entry(session_key.to_string())
            .or_insert_with(|| SessionEntry::new(generate_session_id()));
        self.sessions.get(session_key).expect("just inserted")
    }

    /// Reset compaction/memory-flush bookkeeping for `session_key` (full clear).
    /// Leaves the session id untouched — the key keeps mapping to the same id.
    pub fn reset_compaction_state(&mut self, session_key: &str) {
        if let Some(entry) = self.sessions.get_mut(session_key) {
            entry.compaction_count = 0;
            entry.memory_flush_compaction_count = None;
            entry.memory_flush_at = None;
            entry.updated_at = chrono::Utc::now().to_rfc3339();
        }
    }
}

/// Generate a new session id: `session_{YYYYMMDD_HHMMSS}_{uuid4_hex[:8]}`.
pub fn generate_session_id() -> String {
    let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let short = uuid::Uuid::new_v4().simple().to_string();
    format!("session_{}_{}", ts, &short[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_matches_expected_shape() {
        let id = generate_session_id();
        assert!(id.starts_with("session_"));
        let rest = &id["session_".len()..];
        let parts: Vec<&str> = rest.splitn(2, '_').collect();
        assert_eq!(parts[0].len(), 8); // YYYYMMDD
    }

    #[test]
    fn create_or_get_is_idempotent() {
        let mut store = SessionStore::default();
        let id1 = store.create_or_get("key-a").session_id.clone();
        let id2 = store.create_or_get("key-a").session_id.clone();
        assert_eq!(id1, id2);
    }

    #[test]
    fn save_and_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        let mut store = SessionStore::default();
        store.create_or_get("key-a");
        store.save(&path).unwrap();

        let loaded = SessionStore::load(&path).unwrap();
        assert!(loaded.get("key-a").is_some());
    }

    #[test]
    fn reset_compaction_state_keeps_session_id() {
        let mut store = SessionStore::default();
        let id = store.create_or_get("key-a").session_id.clone();
        store.sessions.get_mut("key-a").unwrap().compaction_count = 3;
        store.reset_compaction_state("key-a");
        let entry = store.get("key-a").unwrap();
        assert_eq!(entry.compaction_count, 0);
        assert_eq!(entry.session_id, id);
    }
}
