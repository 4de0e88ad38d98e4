//! `engram-engine` – Scoring and intake policy over the memory store.
//!
//! Everything in this crate is stateless: the store is the only state, and
//! both components here read a caller-supplied `now` rather than the wall
//! clock.
//!
//! - [`relevance`] – [`RelevanceEngine`][relevance::RelevanceEngine]: ranked
//!   retrieval over decayed scores, plus the reinforcement write-back with
//!   its bounded conflict-retry loop.
//! - [`recorder`] – [`InteractionRecorder`][recorder::InteractionRecorder]:
//!   the confidence-gated intake path from sensor events to persisted
//!   interaction history.

pub mod recorder;
pub mod relevance;

pub use recorder::InteractionRecorder;
pub use relevance::{RelevanceConfig, RelevanceEngine, ScoredEntry};
