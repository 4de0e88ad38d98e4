//! The four persisted record families.
//!
//! All timestamps are UTC and always caller-supplied – no record constructor
//! or store operation reads the wall clock, so decay computations stay
//! deterministic under test.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// User
// ─────────────────────────────────────────────────────────────────────────────

/// Identity anchor for interactions.
///
/// Created on the first observed interaction; `last_seen` and
/// `interaction_count` advance on every subsequent one. Never deleted by the
/// kernel – retention is an external concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Monotonically increasing count of observed utterances.
    pub interaction_count: i64,
}

// ─────────────────────────────────────────────────────────────────────────────
// KnowledgeEntry
// ─────────────────────────────────────────────────────────────────────────────

/// A unit of retrievable knowledge.
///
/// `relevance_score` is always the value *as of* `last_accessed` – the live,
/// decay-adjusted value is derived via [`KnowledgeEntry::effective_relevance`]
/// and never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: Uuid,
    /// Category key; not unique across entries.
    pub topic: String,
    /// Structured content payload, replaceable wholesale on update.
    pub content: serde_json::Value,
    /// Baseline relevance in `[0.0, 1.0]` as of `last_accessed`.
    pub relevance_score: f64,
    /// Exponential forgetting rate, per hour of elapsed time. Zero means the
    /// entry never decays.
    pub decay_rate: f64,
    /// Number of reinforcing accesses since the last content write.
    pub access_count: i64,
    pub last_accessed: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency version; bumped by every write to this row.
    pub version: i64,
}

impl KnowledgeEntry {
    /// The decay-adjusted relevance of this entry at query time `now`.
    ///
    /// `relevance_score * exp(-decay_rate * elapsed_hours)`, clamped to
    /// `[0.0, 1.0]`. Negative elapsed time (a `now` before `last_accessed`)
    /// clamps to zero elapsed, so decay never *increases* relevance.
    pub fn effective_relevance(&self, now: DateTime<Utc>) -> f64 {
        let elapsed_hours =
            (now - self.last_accessed).num_milliseconds().max(0) as f64 / 3_600_000.0;
        (self.relevance_score * (-self.decay_rate * elapsed_hours).exp()).clamp(0.0, 1.0)
    }
}

/// The writer-supplied portion of a knowledge entry.
///
/// Passing the id of an existing entry replaces its content wholesale, which
/// resets `access_count` to 0 and `relevance_score` to the configured default
/// – new content invalidates prior reinforcement history.
#[derive(Debug, Clone)]
pub struct KnowledgeDraft {
    /// Target entry id; `None` generates a fresh UUID.
    pub id: Option<Uuid>,
    pub topic: String,
    pub content: serde_json::Value,
    /// Per-entry forgetting rate; `None` falls back to the configured
    /// `default_decay_rate` setting.
    pub decay_rate: Option<f64>,
}

impl KnowledgeDraft {
    pub fn new(topic: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            id: None,
            topic: topic.into(),
            content,
            decay_rate: None,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_decay_rate(mut self, rate: f64) -> Self {
        self.decay_rate = Some(rate);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// VoiceInteraction
// ─────────────────────────────────────────────────────────────────────────────

/// An immutable log record of one observed utterance. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceInteraction {
    pub id: Uuid,
    /// Owning user; `None` when the sensor could not attribute a speaker.
    pub user_id: Option<Uuid>,
    pub content: String,
    /// Transcription confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// SystemSetting
// ─────────────────────────────────────────────────────────────────────────────

/// A singleton-per-key configuration value, overwritten in place on every
/// write (last-writer-wins, no versioning). Settings are never decayed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSetting {
    pub setting_key: String,
    pub setting_value: serde_json::Value,
    pub setting_updated_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
