//! [`MemoryStore`] – SQLite-backed keyed storage for all record families.
//!
//! The store is the kernel's single consistency boundary: every other
//! component is stateless and synchronizes only through it. A [`MemoryStore`]
//! is a cheaply cloneable handle over one shared SQLite connection, so
//! concurrent perception and maintenance tasks can hold their own copies.
//!
//! # Storage layout
//!
//! | table | key | secondary lookup |
//! |---|---|---|
//! | `users` | id (UUID TEXT) | `username` UNIQUE |
//! | `knowledge_entries` | id (UUID TEXT) | `topic` (indexed, non-unique) |
//! | `voice_interactions` | id (UUID TEXT) | `user_id` (indexed, nullable) |
//! | `system_settings` | `setting_key` | – |
//!
//! Timestamps are RFC-3339 TEXT (UTC) and always caller-supplied; structured
//! payloads are serialized JSON TEXT. `knowledge_entries.version` backs the
//! optimistic concurrency check on [`MemoryStore::touch_knowledge`].
//!
//! # Atomicity
//!
//! Two operations must stay atomic under concurrent callers:
//!
//! * [`upsert_user`][MemoryStore::upsert_user] – a single
//!   `INSERT … ON CONFLICT DO UPDATE` statement, so simultaneous utterances
//!   from the same new user never lose an increment.
//! * [`touch_knowledge`][MemoryStore::touch_knowledge] – a versioned
//!   `UPDATE … WHERE version = ?`; a write that raced past another touch
//!   returns [`EngramError::Conflict`] and the caller re-reads and retries.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use engram_types::EngramError;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;
use uuid::Uuid;

use crate::records::{KnowledgeDraft, KnowledgeEntry, SystemSetting, User, VoiceInteraction};
use crate::settings;

// ─────────────────────────────────────────────────────────────────────────────
// MemoryStore
// ─────────────────────────────────────────────────────────────────────────────

/// Cloneable handle over the shared SQLite connection.
///
/// All operations take the caller's `now`; the store never reads the wall
/// clock. Any operation may block briefly on the connection lock; a poisoned
/// lock (a panic in another holder) surfaces as
/// [`EngramError::StoreUnavailable`].
#[derive(Clone)]
pub struct MemoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl MemoryStore {
    /// Open (or create) a persistent store at `path`.
    pub fn open(path: &str) -> Result<Self, EngramError> {
        let conn = Connection::open(path).map_err(db_err)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open a temporary in-memory store (useful for testing).
    pub fn open_in_memory() -> Result<Self, EngramError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), EngramError> {
        self.conn()?
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS users (
                    id                TEXT NOT NULL PRIMARY KEY,
                    username          TEXT NOT NULL UNIQUE,
                    created_at        TEXT NOT NULL,
                    last_seen         TEXT NOT NULL,
                    interaction_count INTEGER NOT NULL DEFAULT 0
                );
                CREATE TABLE IF NOT EXISTS knowledge_entries (
                    id              TEXT NOT NULL PRIMARY KEY,
                    topic           TEXT NOT NULL,
                    content         TEXT NOT NULL,
                    relevance_score REAL NOT NULL,
                    decay_rate      REAL NOT NULL,
                    access_count    INTEGER NOT NULL DEFAULT 0,
                    last_accessed   TEXT NOT NULL,
                    created_at      TEXT NOT NULL,
                    updated_at      TEXT NOT NULL,
                    version         INTEGER NOT NULL DEFAULT 0
                );
                CREATE INDEX IF NOT EXISTS idx_knowledge_topic
                    ON knowledge_entries(topic);
                CREATE TABLE IF NOT EXISTS voice_interactions (
                    id         TEXT NOT NULL PRIMARY KEY,
                    user_id    TEXT REFERENCES users(id),
                    content    TEXT NOT NULL,
                    confidence REAL NOT NULL,
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_interactions_user
                    ON voice_interactions(user_id);
                CREATE TABLE IF NOT EXISTS system_settings (
                    setting_key        TEXT NOT NULL PRIMARY KEY,
                    setting_value      TEXT NOT NULL,
                    setting_updated_at TEXT NOT NULL
                );",
            )
            .map_err(db_err)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, EngramError> {
        self.conn
            .lock()
            .map_err(|_| EngramError::StoreUnavailable("connection mutex poisoned".to_string()))
    }

    // -------------------------------------------------------------------------
    // Users
    // -------------------------------------------------------------------------

    /// Create the user if absent; otherwise touch `last_seen` and increment
    /// `interaction_count`.
    ///
    /// The read-modify-write is a single SQL statement, so N concurrent calls
    /// for the same username yield exactly one row with count N.
    pub fn upsert_user(&self, username: &str, now: DateTime<Utc>) -> Result<User, EngramError> {
        if username.trim().is_empty() {
            return Err(EngramError::Validation(
                "username must not be empty".to_string(),
            ));
        }
        let conn = self.conn()?;
        conn.query_row(
            "INSERT INTO users (id, username, created_at, last_seen, interaction_count)
             VALUES (?1, ?2, ?3, ?3, 1)
             ON CONFLICT(username) DO UPDATE SET
                 last_seen = excluded.last_seen,
                 interaction_count = users.interaction_count + 1
             RETURNING id, username, created_at, last_seen, interaction_count",
            params![Uuid::new_v4().to_string(), username, now.to_rfc3339()],
            row_to_user,
        )
        .map_err(db_err)
    }

    /// Fetch a single user by id.
    pub fn get_user(&self, id: Uuid) -> Result<User, EngramError> {
        self.conn()?
            .query_row(
                "SELECT id, username, created_at, last_seen, interaction_count
                 FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_user,
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| EngramError::NotFound(format!("user {id}")))
    }

    /// Fetch a single user by username, or `None` if never seen.
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>, EngramError> {
        self.conn()?
            .query_row(
                "SELECT id, username, created_at, last_seen, interaction_count
                 FROM users WHERE username = ?1",
                params![username],
                row_to_user,
            )
            .optional()
            .map_err(db_err)
    }

    // -------------------------------------------------------------------------
    // Voice interactions
    // -------------------------------------------------------------------------

    /// Append one immutable interaction row.
    ///
    /// Rejects confidence outside `[0.0, 1.0]` and empty content with
    /// [`EngramError::Validation`].
    pub fn record_interaction(
        &self,
        user_id: Option<Uuid>,
        content: &str,
        confidence: f64,
        now: DateTime<Utc>,
    ) -> Result<VoiceInteraction, EngramError> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(EngramError::Validation(format!(
                "confidence {confidence} outside [0.0, 1.0]"
            )));
        }
        if content.trim().is_empty() {
            return Err(EngramError::Validation(
                "interaction content must not be empty".to_string(),
            ));
        }
        let row = VoiceInteraction {
            id: Uuid::new_v4(),
            user_id,
            content: content.to_string(),
            confidence,
            created_at: now,
        };
        self.conn()?
            .execute(
                "INSERT INTO voice_interactions (id, user_id, content, confidence, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    row.id.to_string(),
                    row.user_id.map(|u| u.to_string()),
                    row.content,
                    row.confidence,
                    row.created_at.to_rfc3339(),
                ],
            )
            .map_err(db_err)?;
        Ok(row)
    }

    /// All interactions attributed to `user_id`, in non-decreasing
    /// `created_at` order. No cross-user ordering is guaranteed.
    pub fn interactions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<VoiceInteraction>, EngramError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, content, confidence, created_at
                 FROM voice_interactions WHERE user_id = ?1
                 ORDER BY created_at ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![user_id.to_string()], row_to_interaction)
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    // -------------------------------------------------------------------------
    // Knowledge entries
    // -------------------------------------------------------------------------

    /// Insert-or-replace a knowledge entry by id.
    ///
    /// Replacing an existing entry resets `access_count` to 0 and
    /// `relevance_score` to the configured `default_relevance_score` even
    /// when the new content is byte-identical – replace semantics, not a
    /// no-op. `created_at` is preserved on replace; `updated_at` and
    /// `last_accessed` advance to `now`.
    pub fn write_knowledge(
        &self,
        draft: KnowledgeDraft,
        now: DateTime<Utc>,
    ) -> Result<KnowledgeEntry, EngramError> {
        if draft.topic.trim().is_empty() {
            return Err(EngramError::Validation(
                "knowledge topic must not be empty".to_string(),
            ));
        }
        if let Some(rate) = draft.decay_rate
            && !(rate.is_finite() && rate >= 0.0)
        {
            return Err(EngramError::Validation(format!(
                "decay_rate {rate} must be finite and >= 0"
            )));
        }
        let content = serde_json::to_string(&draft.content)
            .map_err(|e| EngramError::Validation(format!("unserializable content: {e}")))?;

        let conn = self.conn()?;
        let relevance = setting_f64_with(&conn, settings::DEFAULT_RELEVANCE_SCORE)?
            .unwrap_or(settings::FALLBACK_RELEVANCE_SCORE)
            .clamp(0.0, 1.0);
        let decay_rate = match draft.decay_rate {
            Some(rate) => rate,
            None => setting_f64_with(&conn, settings::DEFAULT_DECAY_RATE)?
                .unwrap_or(settings::FALLBACK_DECAY_RATE),
        };
        let id = draft.id.unwrap_or_else(Uuid::new_v4);

        conn.query_row(
            "INSERT INTO knowledge_entries
                 (id, topic, content, relevance_score, decay_rate,
                  access_count, last_accessed, created_at, updated_at, version)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6, ?6, 0)
             ON CONFLICT(id) DO UPDATE SET
                 topic           = excluded.topic,
                 content         = excluded.content,
                 relevance_score = excluded.relevance_score,
                 decay_rate      = excluded.decay_rate,
                 access_count    = 0,
                 last_accessed   = excluded.last_accessed,
                 updated_at      = excluded.updated_at,
                 version         = knowledge_entries.version + 1
             RETURNING id, topic, content, relevance_score, decay_rate,
                       access_count, last_accessed, created_at, updated_at, version",
            params![
                id.to_string(),
                draft.topic,
                content,
                relevance,
                decay_rate,
                now.to_rfc3339(),
            ],
            row_to_knowledge,
        )
        .map_err(db_err)
    }

    /// Fetch a single knowledge entry by id.
    pub fn get_knowledge(&self, id: Uuid) -> Result<KnowledgeEntry, EngramError> {
        self.conn()?
            .query_row(
                "SELECT id, topic, content, relevance_score, decay_rate,
                        access_count, last_accessed, created_at, updated_at, version
                 FROM knowledge_entries WHERE id = ?1",
                params![id.to_string()],
                row_to_knowledge,
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| EngramError::NotFound(format!("knowledge entry {id}")))
    }

    /// All entries under `topic`, in storage (creation) order.
    ///
    /// Ranking by effective relevance is the relevance engine's job, not the
    /// store's. An unknown topic returns an empty vec, not an error.
    pub fn find_knowledge_by_topic(&self, topic: &str) -> Result<Vec<KnowledgeEntry>, EngramError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, topic, content, relevance_score, decay_rate,
                        access_count, last_accessed, created_at, updated_at, version
                 FROM knowledge_entries WHERE topic = ?1
                 ORDER BY created_at ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![topic], row_to_knowledge)
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    /// The atomic touch: persist a reinforcement result.
    ///
    /// The write only lands when `expected_version` still matches the row;
    /// otherwise another touch got there first and the caller receives
    /// [`EngramError::Conflict`] to re-read, re-decay, and retry.
    /// `new_score` is clamped to `[0.0, 1.0]` before persisting – no write
    /// path may store an out-of-range relevance.
    pub fn touch_knowledge(
        &self,
        id: Uuid,
        new_score: f64,
        new_access_count: i64,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> Result<KnowledgeEntry, EngramError> {
        if new_access_count < 0 {
            return Err(EngramError::Validation(format!(
                "access_count {new_access_count} must be >= 0"
            )));
        }
        let conn = self.conn()?;
        let touched = conn
            .query_row(
                "UPDATE knowledge_entries SET
                     relevance_score = ?1,
                     access_count    = ?2,
                     last_accessed   = ?3,
                     version         = version + 1
                 WHERE id = ?4 AND version = ?5
                 RETURNING id, topic, content, relevance_score, decay_rate,
                           access_count, last_accessed, created_at, updated_at, version",
                params![
                    new_score.clamp(0.0, 1.0),
                    new_access_count,
                    now.to_rfc3339(),
                    id.to_string(),
                    expected_version,
                ],
                row_to_knowledge,
            )
            .optional()
            .map_err(db_err)?;
        match touched {
            Some(entry) => Ok(entry),
            None => {
                let exists = conn
                    .query_row(
                        "SELECT 1 FROM knowledge_entries WHERE id = ?1",
                        params![id.to_string()],
                        |_| Ok(()),
                    )
                    .optional()
                    .map_err(db_err)?
                    .is_some();
                if exists {
                    Err(EngramError::Conflict {
                        entity: "knowledge_entry",
                        id,
                    })
                } else {
                    Err(EngramError::NotFound(format!("knowledge entry {id}")))
                }
            }
        }
    }

    /// Maintenance sweep: delete entries whose *effective* relevance at `now`
    /// has decayed below `threshold`. Returns the number of entries evicted.
    ///
    /// Run by an external scheduler; the per-query retrieval path never
    /// deletes anything.
    pub fn evict_knowledge_below(
        &self,
        threshold: f64,
        now: DateTime<Utc>,
    ) -> Result<usize, EngramError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, topic, content, relevance_score, decay_rate,
                        access_count, last_accessed, created_at, updated_at, version
                 FROM knowledge_entries",
            )
            .map_err(db_err)?;
        let entries = stmt
            .query_map([], row_to_knowledge)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        drop(stmt);

        let mut evicted = 0usize;
        for entry in entries {
            if entry.effective_relevance(now) < threshold {
                conn.execute(
                    "DELETE FROM knowledge_entries WHERE id = ?1",
                    params![entry.id.to_string()],
                )
                .map_err(db_err)?;
                evicted += 1;
            }
        }
        if evicted > 0 {
            debug!(evicted, threshold, "evicted decayed knowledge entries");
        }
        Ok(evicted)
    }

    // -------------------------------------------------------------------------
    // System settings
    // -------------------------------------------------------------------------

    /// Fetch a setting, or `None` if the key was never written.
    pub fn get_setting(&self, key: &str) -> Result<Option<SystemSetting>, EngramError> {
        self.conn()?
            .query_row(
                "SELECT setting_key, setting_value, setting_updated_at
                 FROM system_settings WHERE setting_key = ?1",
                params![key],
                row_to_setting,
            )
            .optional()
            .map_err(db_err)
    }

    /// Convenience numeric read for the recognized tuning settings.
    pub fn setting_f64(&self, key: &str) -> Result<Option<f64>, EngramError> {
        setting_f64_with(&*self.conn()?, key)
    }

    /// Create-or-overwrite a setting in place (last-writer-wins).
    pub fn put_setting(
        &self,
        key: &str,
        value: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), EngramError> {
        if key.trim().is_empty() {
            return Err(EngramError::Validation(
                "setting key must not be empty".to_string(),
            ));
        }
        let value = serde_json::to_string(&value)
            .map_err(|e| EngramError::Validation(format!("unserializable setting: {e}")))?;
        self.conn()?
            .execute(
                "INSERT INTO system_settings (setting_key, setting_value, setting_updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(setting_key) DO UPDATE SET
                     setting_value      = excluded.setting_value,
                     setting_updated_at = excluded.setting_updated_at",
                params![key, value, now.to_rfc3339()],
            )
            .map_err(db_err)?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mappers and helpers
// ─────────────────────────────────────────────────────────────────────────────

fn db_err(e: rusqlite::Error) -> EngramError {
    EngramError::StoreUnavailable(format!("sqlite error: {e}"))
}

fn setting_f64_with(conn: &Connection, key: &str) -> Result<Option<f64>, EngramError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT setting_value FROM system_settings WHERE setting_key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)?;
    match raw {
        Some(text) => {
            let value: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| EngramError::StoreUnavailable(format!("corrupt setting {key}: {e}")))?;
            Ok(value.as_f64())
        }
        None => Ok(None),
    }
}

fn parse_uuid(idx: usize, raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| {
        rusqlite::Error::InvalidColumnType(idx, e.to_string(), rusqlite::types::Type::Text)
    })
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>().map_err(|e| {
        rusqlite::Error::InvalidColumnType(idx, e.to_string(), rusqlite::types::Type::Text)
    })
}

fn parse_json(idx: usize, raw: &str) -> rusqlite::Result<serde_json::Value> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::InvalidColumnType(idx, e.to_string(), rusqlite::types::Type::Text)
    })
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    let created_at: String = row.get(2)?;
    let last_seen: String = row.get(3)?;
    Ok(User {
        id: parse_uuid(0, &id)?,
        username: row.get(1)?,
        created_at: parse_ts(2, &created_at)?,
        last_seen: parse_ts(3, &last_seen)?,
        interaction_count: row.get(4)?,
    })
}

fn row_to_interaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<VoiceInteraction> {
    let id: String = row.get(0)?;
    let user_id: Option<String> = row.get(1)?;
    let created_at: String = row.get(4)?;
    Ok(VoiceInteraction {
        id: parse_uuid(0, &id)?,
        user_id: user_id.as_deref().map(|u| parse_uuid(1, u)).transpose()?,
        content: row.get(2)?,
        confidence: row.get(3)?,
        created_at: parse_ts(4, &created_at)?,
    })
}

fn row_to_knowledge(row: &rusqlite::Row<'_>) -> rusqlite::Result<KnowledgeEntry> {
    let id: String = row.get(0)?;
    let content: String = row.get(2)?;
    let last_accessed: String = row.get(6)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;
    Ok(KnowledgeEntry {
        id: parse_uuid(0, &id)?,
        topic: row.get(1)?,
        content: parse_json(2, &content)?,
        relevance_score: row.get(3)?,
        decay_rate: row.get(4)?,
        access_count: row.get(5)?,
        last_accessed: parse_ts(6, &last_accessed)?,
        created_at: parse_ts(7, &created_at)?,
        updated_at: parse_ts(8, &updated_at)?,
        version: row.get(9)?,
    })
}

fn row_to_setting(row: &rusqlite::Row<'_>) -> rusqlite::Result<SystemSetting> {
    let value: String = row.get(1)?;
    let updated_at: String = row.get(2)?;
    Ok(SystemSetting {
        setting_key: row.get(0)?,
        setting_value: parse_json(1, &value)?,
        setting_updated_at: parse_ts(2, &updated_at)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
