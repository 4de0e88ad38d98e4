//! Confidence-gated intake from sensor events to interaction history.
//!
//! One sensor event becomes at most one interaction row. The gate runs
//! before any write: an event below the configured confidence threshold is
//! rejected outright, leaving users and history exactly as they were – a
//! rejected utterance must not bump anyone's `interaction_count`.

use chrono::{DateTime, Utc};
use engram_store::{MemoryStore, VoiceInteraction, settings};
use engram_types::{EngramError, SensorEvent};
use tracing::debug;

/// Persists accepted sensor events as interaction history.
#[derive(Clone)]
pub struct InteractionRecorder {
    store: MemoryStore,
}

impl InteractionRecorder {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }

    /// Validate, gate, and persist one sensor event.
    ///
    /// Order matters: malformed events (confidence outside `[0.0, 1.0]`,
    /// empty transcript) and sub-threshold events are rejected with
    /// [`EngramError::Validation`] *before* the speaker upsert, so a
    /// rejection touches no table. An accepted event from a named speaker
    /// upserts that user first, then appends the interaction attributed to
    /// them; an unattributed speaker yields a row with no user.
    ///
    /// Confidence exactly at the threshold is accepted – only *below* is
    /// rejected.
    pub fn record(
        &self,
        event: &SensorEvent,
        now: DateTime<Utc>,
    ) -> Result<VoiceInteraction, EngramError> {
        if !(0.0..=1.0).contains(&event.confidence) {
            return Err(EngramError::Validation(format!(
                "confidence {} outside [0.0, 1.0]",
                event.confidence
            )));
        }
        if event.transcript.trim().is_empty() {
            return Err(EngramError::Validation(
                "transcript must not be empty".to_string(),
            ));
        }
        let threshold = self
            .store
            .setting_f64(settings::MINIMUM_CONFIDENCE_THRESHOLD)?
            .unwrap_or(settings::FALLBACK_MINIMUM_CONFIDENCE);
        if event.confidence < threshold {
            debug!(
                confidence = event.confidence,
                threshold, "discarding low-confidence utterance"
            );
            return Err(EngramError::Validation(format!(
                "confidence {} below threshold {threshold}",
                event.confidence
            )));
        }

        let user_id = match event.speaker.as_deref() {
            Some(name) => Some(self.store.upsert_user(name, now)?.id),
            None => None,
        };
        self.store
            .record_interaction(user_id, &event.transcript, event.confidence, now)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
