//! Per-(platform, channel) conversation log with SQLite persistence and
//! LLM-driven summarization.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use shannon_core::{Result, ShannonError};
use shannon_llm::{ChatMessage, CompletionRequest, LlmProvider, Role};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        platform TEXT NOT NULL,
        channel TEXT NOT NULL,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        token_estimate INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_messages_lookup
        ON messages (platform, channel, timestamp);
";

const SUMMARIZE_PROMPT: &str = "Summarize the following conversation history concisely. \
     Preserve key facts, decisions, and context that would be needed to \
     continue the conversation. Keep the summary under 500 words.";

/// Summarization only runs once a channel has at least this many
/// non-system messages; below that it is a no-op.
const MIN_MESSAGES_TO_SUMMARIZE: usize = 4;

/// One persisted conversation turn.
#[derive(Debug, Clone)]
pub struct ContextMessage {
    pub platform: String,
    pub channel: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub token_estimate: usize,
}

/// Size statistics for a channel's context.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextStats {
    pub message_count: usize,
    pub total_chars: usize,
    pub total_tokens: usize,
}

/// The persistent conversation store. Writes commit atomically per turn;
/// summarization is a single transaction guarded by a per-channel advisory
/// lock so two summarizations cannot race.
pub struct ContextStore {
    db: Arc<Mutex<Connection>>,
    llm: Arc<dyn LlmProvider>,
    max_messages: usize,
    summarize_locks: DashMap<(String, String), Arc<tokio::sync::Mutex<()>>>,
}

impl ContextStore {
    pub fn open(path: &Path, llm: Arc<dyn LlmProvider>, max_messages: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!(path = %path.display(), "opening context store");
        let conn = Connection::open(path).map_err(persistence)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(persistence)?;
        conn.execute_batch(SCHEMA).map_err(persistence)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            llm,
            max_messages,
            summarize_locks: DashMap::new(),
        })
    }

    pub fn open_in_memory(llm: Arc<dyn LlmProvider>, max_messages: usize) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(persistence)?;
        conn.execute_batch(SCHEMA).map_err(persistence)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            llm,
            max_messages,
            summarize_locks: DashMap::new(),
        })
    }

    /// Append one turn. The token estimate is best-effort via the provider.
    pub fn append(&self, platform: &str, channel: &str, role: Role, content: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let tokens = self.llm.count_tokens(content) as i64;
        self.db
            .lock()
            .execute(
                "INSERT INTO messages (platform, channel, role, content, timestamp, token_estimate)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![platform, channel, role.as_str(), content, now, tokens],
            )
            .map_err(persistence)?;
        Ok(())
    }

    /// The most recent messages for a channel, oldest first.
    pub fn get_context(&self, platform: &str, channel: &str) -> Result<Vec<ContextMessage>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare(
                "SELECT platform, channel, role, content, timestamp, token_estimate
                 FROM messages WHERE platform = ?1 AND channel = ?2
                 ORDER BY timestamp DESC, id DESC LIMIT ?3",
            )
            .map_err(persistence)?;
        let mut messages = stmt
            .query_map(
                params![platform, channel, self.max_messages as i64],
                row_to_message,
            )
            .map_err(persistence)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(persistence)?;
        messages.reverse();
        Ok(messages)
    }

    /// Delete all rows for a channel. Returns the number removed.
    pub fn clear(&self, platform: &str, channel: &str) -> Result<usize> {
        let rows = self
            .db
            .lock()
            .execute(
                "DELETE FROM messages WHERE platform = ?1 AND channel = ?2",
                params![platform, channel],
            )
            .map_err(persistence)?;
        Ok(rows)
    }

    pub fn stats(&self, platform: &str, channel: &str) -> Result<ContextStats> {
        let db = self.db.lock();
        let (count, chars, tokens): (i64, i64, i64) = db
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(LENGTH(content)), 0),
                        COALESCE(SUM(token_estimate), 0)
                 FROM messages WHERE platform = ?1 AND channel = ?2",
                params![platform, channel],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(persistence)?;
        Ok(ContextStats {
            message_count: count as usize,
            total_chars: chars as usize,
            total_tokens: tokens as usize,
        })
    }

    /// Replace the oldest half of the channel's non-system messages with a
    /// single system row holding an LLM-written summary. A no-op on
    /// already-small contexts, so running it twice is safe. The replacement
    /// is one transaction: on any failure the log is left untouched.
    pub async fn summarize(&self, platform: &str, channel: &str) -> Result<Option<String>> {
        let lock = self
            .summarize_locks
            .entry((platform.to_string(), channel.to_string()))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Load the full log, oldest first.
        let rows: Vec<(i64, String, String, String)> = {
            let db = self.db.lock();
            let mut stmt = db
                .prepare(
                    "SELECT id, role, content, timestamp
                     FROM messages WHERE platform = ?1 AND channel = ?2
                     ORDER BY timestamp, id",
                )
                .map_err(persistence)?;
            let rows = stmt
                .query_map(params![platform, channel], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })
                .map_err(persistence)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(persistence)?;
            rows
        };

        let non_system: Vec<&(i64, String, String, String)> =
            rows.iter().filter(|(_, role, _, _)| role != "system").collect();
        if non_system.len() < MIN_MESSAGES_TO_SUMMARIZE {
            return Ok(None);
        }

        let oldest = &non_system[..non_system.len() / 2];
        let transcript = oldest
            .iter()
            .map(|(_, role, content, _)| format!("{role}: {content}"))
            .collect::<Vec<_>>()
            .join("\n");

        let request = CompletionRequest {
            messages: vec![ChatMessage::text(
                Role::User,
                format!("{SUMMARIZE_PROMPT}\n\n{transcript}"),
            )],
            system: None,
            tools: vec![],
            max_tokens: 1024,
            temperature: 0.3,
        };
        let summary = self.llm.complete(&request).await?.content;
        if summary.is_empty() {
            return Err(ShannonError::Provider("summarization returned no text".into()));
        }

        let summary_content = format!("[Previous conversation summary: {summary}]");
        let summary_tokens = self.llm.count_tokens(&summary_content) as i64;
        // The summary row inherits the first removed row's timestamp so it
        // sorts before the preserved suffix.
        let summary_ts = oldest[0].3.clone();
        let removed_ids: Vec<i64> = oldest.iter().map(|(id, _, _, _)| *id).collect();

        {
            let mut db = self.db.lock();
            let tx = db.transaction().map_err(persistence)?;
            for id in &removed_ids {
                tx.execute("DELETE FROM messages WHERE id = ?1", params![id])
                    .map_err(persistence)?;
            }
            tx.execute(
                "INSERT INTO messages (platform, channel, role, content, timestamp, token_estimate)
                 VALUES (?1, ?2, 'system', ?3, ?4, ?5)",
                params![platform, channel, summary_content, summary_ts, summary_tokens],
            )
            .map_err(persistence)?;
            tx.commit().map_err(persistence)?;
        }

        info!(
            platform,
            channel,
            replaced = removed_ids.len(),
            "context summarized"
        );
        Ok(Some(summary))
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContextMessage> {
    let role: String = row.get(2)?;
    let timestamp: String = row.get(4)?;
    let tokens: i64 = row.get(5)?;
    Ok(ContextMessage {
        platform: row.get(0)?,
        channel: row.get(1)?,
        role: Role::parse(&role).unwrap_or(Role::User),
        content: row.get(3)?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_default(),
        token_estimate: tokens as usize,
    })
}

fn persistence(e: rusqlite::Error) -> ShannonError {
    ShannonError::Persistence(e.to_string())
}
