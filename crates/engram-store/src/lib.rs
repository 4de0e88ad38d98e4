//! `engram-store` – The durable memory substrate.
//!
//! Owns every persisted record family of the engram kernel – users,
//! knowledge entries, voice interactions, and system settings – on a local
//! SQLite substrate. The store holds no scoring logic beyond CRUD and
//! indexed lookup; ranking and reinforcement live in `engram-engine`.
//!
//! # Modules
//!
//! - [`records`] – the four record families plus the decay projection each
//!   [`KnowledgeEntry`][records::KnowledgeEntry] can compute over itself.
//! - [`store`] – [`MemoryStore`][store::MemoryStore]: cloneable handle over a
//!   shared SQLite connection, the workspace's single consistency boundary.
//!   `touch_knowledge` and `upsert_user` are the two per-key-atomic
//!   operations required by concurrent callers.
//! - [`settings`] – recognized `system_settings` keys and their conservative
//!   defaults.

pub mod records;
pub mod settings;
pub mod store;

pub use records::{KnowledgeDraft, KnowledgeEntry, SystemSetting, User, VoiceInteraction};
pub use store::MemoryStore;
