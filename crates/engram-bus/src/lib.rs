//! `engram-bus` – Typed, topic-based publish/subscribe event bus.
//!
//! Decouples the producers feeding the memory kernel from the consumers
//! acting on its output. Built on [`tokio::sync::broadcast`] channels so
//! every subscriber receives every message without any single subscriber
//! blocking the others.
//!
//! # Topics
//!
//! Traffic is partitioned into three [`Topic`] lanes so components only
//! receive the messages they care about:
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::SensorEvents`] | Transcribed utterances from perception adapters |
//! | [`Topic::ActionRequests`] | Knowledge selected by the agent loop for downstream actuators |
//! | [`Topic::SystemAlerts`] | Fault notifications from a degraded agent loop |

pub mod bus;

pub use bus::{EventBus, Topic, TopicReceiver};
