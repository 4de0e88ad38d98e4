//! Recognized `system_settings` keys and their defaults.
//!
//! Settings are read through the store at use time, so a value written at
//! runtime takes effect on the next operation that consults it. The defaults
//! below apply whenever a key has never been written.

/// Interactions with confidence below this threshold are rejected rather
/// than persisted, keeping transcription noise out of the history.
pub const MINIMUM_CONFIDENCE_THRESHOLD: &str = "minimum_confidence_threshold";

/// Baseline relevance assigned by a content write (fresh or replacing).
pub const DEFAULT_RELEVANCE_SCORE: &str = "default_relevance_score";

/// Per-hour forgetting rate used when a knowledge draft omits one.
pub const DEFAULT_DECAY_RATE: &str = "default_decay_rate";

/// Upper bound of the per-access relevance boost (shrinks with access count).
pub const REINFORCEMENT_GAIN: &str = "reinforcement_gain";

/// Conservative fallback: drop anything the transcriber is unsure about.
pub const FALLBACK_MINIMUM_CONFIDENCE: f64 = 0.6;
pub const FALLBACK_RELEVANCE_SCORE: f64 = 0.5;
pub const FALLBACK_DECAY_RATE: f64 = 0.05;
pub const FALLBACK_REINFORCEMENT_GAIN: f64 = 0.3;
