//! `engram-types` – shared data model for the engram memory kernel.
//!
//! Defines the seam types exchanged between the perception side (sensor
//! events), the actuation side (action requests), and the event bus that
//! carries both, plus the error taxonomy every crate in the workspace speaks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// One observed utterance arriving from an external sensor (speech-to-text
/// pipeline, chat listener, …).
///
/// Arrival is asynchronous and unordered across speakers; `timestamp` is the
/// sensor's observation time, not the time the event was processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorEvent {
    /// Speaker identifier, or `None` when the sensor cannot attribute one.
    pub speaker: Option<String>,
    /// Transcript text of the utterance.
    pub transcript: String,
    /// Transcription confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    /// When the sensor observed the utterance.
    pub timestamp: DateTime<Utc>,
}

/// An outbound action request derived from a knowledge ranking.
///
/// The kernel's obligation ends at handing this tuple to the actuator
/// interface; what the actuator does with it is an external concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Topic the chosen knowledge entry belongs to.
    pub topic: String,
    /// Id of the chosen knowledge entry.
    pub entry_id: Uuid,
    /// The entry's structured content payload.
    pub content: serde_json::Value,
}

/// Unified event wrapper for the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "engram-runtime::agent_loop"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Build an event with a fresh UUID and the given timestamp.
    pub fn new(timestamp: DateTime<Utc>, source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// An utterance observed by an external sensor.
    SensorObservation(SensorEvent),
    /// An action handed off to the external actuator interface.
    ActionDispatch(ActionRequest),
    /// A component entered a faulted state for the current tick.
    Fault { component: String, message: String },
}

/// Error taxonomy spanning store failures, validation rejections, and
/// optimistic-concurrency conflicts.
///
/// Only [`EngramError::StoreUnavailable`] is classified fatal for a tick;
/// everything else is surfaced to the immediate caller.
#[derive(Error, Debug)]
pub enum EngramError {
    /// Malformed input – never retried.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A read addressed an absent row; callers decide whether absence is
    /// expected.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An atomic touch raced past its version check.
    #[error("Conflict on {entity} {id}: concurrent modification")]
    Conflict { entity: &'static str, id: Uuid },

    /// The durable medium failed; fatal for the current tick.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// An event bus lane had no live subscribers or was closed.
    #[error("Channel error: {0}")]
    Channel(String),
}

impl EngramError {
    /// `true` when the error should drive the agent loop to `Faulted`.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngramError::StoreUnavailable(_))
    }
}
