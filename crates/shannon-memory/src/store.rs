use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use shannon_core::Result;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS memory (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        category TEXT NOT NULL DEFAULT 'general',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        source TEXT NOT NULL DEFAULT ''
    );
    CREATE INDEX IF NOT EXISTS idx_memory_category ON memory (category);
    CREATE INDEX IF NOT EXISTS idx_memory_updated ON memory (updated_at);
";

/// A single remembered fact or preference.
#[derive(Debug, Clone)]
pub struct MemoryEntry {
    pub key: String,
    pub value: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source: String,
}

/// Persistent key/value memory with category and source tags.
pub struct MemoryStore {
    db: Arc<Mutex<Connection>>,
}

impl MemoryStore {
    /// Open or create the memory database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!(path = %path.display(), "opening memory store");
        let conn = Connection::open(path).map_err(persistence)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(persistence)?;
        conn.execute_batch(SCHEMA).map_err(persistence)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(persistence)?;
        conn.execute_batch(SCHEMA).map_err(persistence)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Upsert a key/value pair. Updates `updated_at` on conflict.
    pub fn set(&self, key: &str, value: &str, category: &str, source: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.db
            .lock()
            .execute(
                "INSERT INTO memory (key, value, category, created_at, updated_at, source)
                 VALUES (?1, ?2, ?3, ?4, ?4, ?5)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    category = excluded.category,
                    updated_at = excluded.updated_at,
                    source = excluded.source",
                params![key, value, category, now, source],
            )
            .map_err(persistence)?;
        Ok(())
    }

    /// Look up an entry by key.
    pub fn get(&self, key: &str) -> Result<Option<MemoryEntry>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare(
                "SELECT key, value, category, created_at, updated_at, source
                 FROM memory WHERE key = ?1",
            )
            .map_err(persistence)?;
        let entry = stmt
            .query_row(params![key], row_to_entry)
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
            .map_err(persistence)?;
        Ok(entry)
    }

    /// Delete an entry. Returns whether anything was removed.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let rows = self
            .db
            .lock()
            .execute("DELETE FROM memory WHERE key = ?1", params![key])
            .map_err(persistence)?;
        Ok(rows > 0)
    }

    /// Substring search on key OR value, most recently updated first.
    pub fn search(&self, query: &str) -> Result<Vec<MemoryEntry>> {
        let pattern = format!("%{query}%");
        let db = self.db.lock();
        let mut stmt = db
            .prepare(
                "SELECT key, value, category, created_at, updated_at, source
                 FROM memory WHERE key LIKE ?1 OR value LIKE ?1
                 ORDER BY updated_at DESC",
            )
            .map_err(persistence)?;
        let entries = stmt
            .query_map(params![pattern], row_to_entry)
            .map_err(persistence)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(persistence)?;
        Ok(entries)
    }

    /// All entries in a category, most recently updated first.
    pub fn list_category(&self, category: &str) -> Result<Vec<MemoryEntry>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare(
                "SELECT key, value, category, created_at, updated_at, source
                 FROM memory WHERE category = ?1
                 ORDER BY updated_at DESC",
            )
            .map_err(persistence)?;
        let entries = stmt
            .query_map(params![category], row_to_entry)
            .map_err(persistence)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(persistence)?;
        Ok(entries)
    }

    /// Delete everything. Returns the number of entries removed.
    pub fn clear(&self) -> Result<usize> {
        let rows = self
            .db
            .lock()
            .execute("DELETE FROM memory", [])
            .map_err(persistence)?;
        Ok(rows)
    }

    /// Total number of entries.
    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .db
            .lock()
            .query_row("SELECT COUNT(*) FROM memory", [], |row| row.get(0))
            .map_err(persistence)?;
        Ok(count as usize)
    }

    /// Serialize the most recently updated entries as `"[category] key:
    /// value"` lines under a character budget of roughly `max_tokens * 4`.
    /// When not everything fits, a truncation sentinel is appended. The
    /// returned string is injected into the system prompt verbatim.
    pub fn export_context(&self, max_tokens: usize) -> Result<String> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare("SELECT key, value, category FROM memory ORDER BY updated_at DESC, key")
            .map_err(persistence)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(persistence)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(persistence)?;
        drop(stmt);
        drop(db);

        if rows.is_empty() {
            return Ok(String::new());
        }

        let max_chars = max_tokens.saturating_mul(4);
        let mut lines: Vec<String> = Vec::new();
        let mut total_chars = 0usize;
        let mut truncated = 0usize;
        for (key, value, category) in &rows {
            let line = format!("[{category}] {key}: {value}");
            if total_chars + line.len() + 1 > max_chars {
                truncated = rows.len() - lines.len();
                break;
            }
            total_chars += line.len() + 1;
            lines.push(line);
        }
        if truncated > 0 {
            lines.push(format!("... ({truncated} more memories truncated)"));
        }
        Ok(lines.join("\n"))
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryEntry> {
    let created_at: String = row.get(3)?;
    let updated_at: String = row.get(4)?;
    Ok(MemoryEntry {
        key: row.get(0)?,
        value: row.get(1)?,
        category: row.get(2)?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
        source: row.get(5)?,
    })
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

fn persistence(e: rusqlite::Error) -> shannon_core::ShannonError {
    shannon_core::ShannonError::Persistence(e.to_string())
}
