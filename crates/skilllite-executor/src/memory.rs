//! Durable memory index: SQLite FTS5 over `memory/*.md` files.
//!
//! Memory content itself lives as plain markdown under `<data_root>/memory/`;
//! this module only maintains a searchable index (`path`, `content`) so the
//! agent can recall earlier notes by keyword without re-reading every file.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Path to the FTS index database for a session: `memory/{session_key}.sqlite3`.
pub fn index_path(data_root: &Path, session_key: &str) -> PathBuf {
    data_root.join("memory").join(format!("{}.sqlite3", session_key))
}

/// Create the FTS5 virtual table if it doesn't exist yet. Safe to call on
/// every write — `CREATE VIRTUAL TABLE IF NOT EXISTS`.
pub fn ensure_index(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS memory_docs USING fts5(path, content);",
    )
    .context("Failed to create memory index")
}

/// (Re)index a single memory file: drop any existing rows for `rel_path`,
/// then insert the current content as one document.
pub fn index_file(conn: &Connection, rel_path: &str, content: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM memory_docs WHERE path = ?1",
        rusqlite::params![rel_path],
    )
    .context("Failed to clear previous memory index entry")?;
    conn.execute(
        "INSERT INTO memory_docs (path, content) VALUES (?1, ?2)",
        rusqlite::params![rel_path, content],
    )
    .context("Failed to index memory file")?;
    Ok(())
}

/// A single search hit: which file matched, and a short snippet around the match.
#[derive(Debug, Clone)]
pub struct MemoryHit {
    pub path: String,
    pub snippet: String,
}

/// BM25-ranked full text search over indexed memory files.
/// `query` is passed through to FTS5's MATCH — caller should quote terms
/// that may contain FTS5 operator characters if exact matching is wanted.
pub fn search(conn: &Connection, query: &str, limit: usize) -> Result<Vec<MemoryHit>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(
        "SELECT path, snippet(memory_docs, 1, '[', ']', '...', 20)
         FROM memory_docs WHERE memory_docs MATCH ?1
         ORDER BY bm25(memory_docs) LIMIT ?2",
    )?;
    let rows = stmt.query_map(rusqlite::params![query, limit as i64], |row| {
        Ok(MemoryHit {
            path: row.get(0)?,
            snippet: row.get(1)?,
        })
    })?;
    let mut hits = Vec::new();
    for row in rows {
        match row {
            Ok(hit) => hits.push(hit),
            Err(e) => tracing::warn!("Skipping malformed memory search row: {}", e),
        }
    }
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_and_search_round_trip() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_index(&conn).unwrap();
        index_file(&conn, "2026-01-01.md", "user prefers dark mode and tabs over spaces").unwrap();
        let hits = search(&conn, "dark", 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "2026-01-01.md");
    }

    #[test]
    fn reindexing_replaces_old_content() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_index(&conn).unwrap();
        index_file(&conn, "f.md", "alpha").unwrap();
        index_file(&conn, "f.md", "beta").unwrap();
        assert!(search(&conn, "alpha", 5).unwrap().is_empty());
        assert_eq!(search(&conn, "beta", 5).unwrap().len(), 1);
    }

    #[test]
    fn empty_query_returns_nothing() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_index(&conn).unwrap();
        assert!(search(&conn, "", 5).unwrap().is_empty());
    }
}
