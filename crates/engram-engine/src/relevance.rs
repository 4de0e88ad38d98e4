//! Ranked retrieval and reinforcement over decayed relevance.
//!
//! The engine derives every ranking from the same projection:
//!
//! ```text
//! effective = stored_score * exp(-decay_rate * hours_since_last_access)
//! ```
//!
//! Retrieval is strictly read-only – observing an entry's rank never mutates
//! it. Reinforcement is the explicit counterpart: it re-bases the stored
//! score on the current effective value, adds a boost that shrinks as the
//! entry accrues accesses, and persists through the store's versioned touch.
//! A touch that loses a race returns a conflict and the engine re-reads and
//! retries from scratch, up to a small bound.

use chrono::{DateTime, Utc};
use engram_store::{KnowledgeEntry, MemoryStore, settings};
use engram_types::EngramError;
use tracing::debug;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Engine tunables. Values read from `system_settings` take precedence;
/// these are the fallbacks when a key has never been written.
#[derive(Debug, Clone)]
pub struct RelevanceConfig {
    /// Upper bound of the per-access boost; the applied boost is
    /// `gain / (1 + access_count)`.
    pub reinforcement_gain: f64,
    /// How many times [`RelevanceEngine::reinforce`] re-reads and retries a
    /// conflicted touch before giving up.
    pub max_touch_attempts: u32,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            reinforcement_gain: settings::FALLBACK_REINFORCEMENT_GAIN,
            max_touch_attempts: 3,
        }
    }
}

/// A knowledge entry paired with its effective relevance at query time.
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub entry: KnowledgeEntry,
    /// Decay-adjusted relevance at the query's `now`, in `[0.0, 1.0]`.
    pub effective: f64,
}

/// Stateless ranking and reinforcement over a [`MemoryStore`].
#[derive(Clone)]
pub struct RelevanceEngine {
    store: MemoryStore,
    config: RelevanceConfig,
    /// Test seam: runs between each attempt's read and its touch, so tests
    /// can interpose a competing writer.
    #[cfg(test)]
    before_touch: Option<std::sync::Arc<dyn Fn(&KnowledgeEntry) + Send + Sync>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

impl RelevanceEngine {
    pub fn new(store: MemoryStore) -> Self {
        Self::with_config(store, RelevanceConfig::default())
    }

    pub fn with_config(store: MemoryStore, config: RelevanceConfig) -> Self {
        Self {
            store,
            config,
            #[cfg(test)]
            before_touch: None,
        }
    }

    /// The `k` most relevant entries under `topic` at `now`, highest first.
    ///
    /// Ties on effective relevance break toward the more recently accessed
    /// entry, then the more recently created one. Read-only: ranking an
    /// entry does not count as accessing it. Fewer than `k` entries under
    /// the topic returns them all; an unknown topic returns an empty vec.
    pub fn retrieve_top_k(
        &self,
        topic: &str,
        k: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScoredEntry>, EngramError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut scored: Vec<ScoredEntry> = self
            .store
            .find_knowledge_by_topic(topic)?
            .into_iter()
            .map(|entry| {
                let effective = entry.effective_relevance(now);
                ScoredEntry { entry, effective }
            })
            .collect();
        scored.sort_by(|a, b| {
            b.effective
                .total_cmp(&a.effective)
                .then_with(|| b.entry.last_accessed.cmp(&a.entry.last_accessed))
                .then_with(|| b.entry.created_at.cmp(&a.entry.created_at))
        });
        scored.truncate(k);
        Ok(scored)
    }

    /// Register one meaningful access to an entry.
    ///
    /// Computes `min(1.0, effective + gain / (1 + access_count))`, then
    /// persists the boosted score with `access_count + 1` and
    /// `last_accessed = now`. The decayed portion of the old score is gone
    /// for good – reinforcement re-bases on the effective value, it does not
    /// resurrect the stored one.
    ///
    /// On a version conflict the whole read-compute-touch cycle reruns
    /// against the winner's row, so no reinforcement is ever lost to a race;
    /// after `max_touch_attempts` consecutive losses the conflict propagates
    /// to the caller.
    pub fn reinforce(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<KnowledgeEntry, EngramError> {
        let gain = self
            .store
            .setting_f64(settings::REINFORCEMENT_GAIN)?
            .unwrap_or(self.config.reinforcement_gain);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let entry = self.store.get_knowledge(id)?;
            let effective = entry.effective_relevance(now);
            let boosted = (effective + gain / (1.0 + entry.access_count as f64)).min(1.0);
            #[cfg(test)]
            if let Some(hook) = &self.before_touch {
                hook(&entry);
            }
            match self.store.touch_knowledge(
                entry.id,
                boosted,
                entry.access_count + 1,
                entry.version,
                now,
            ) {
                Ok(touched) => return Ok(touched),
                Err(EngramError::Conflict { .. }) if attempt < self.config.max_touch_attempts => {
                    debug!(%id, attempt, "reinforce lost a touch race, re-reading");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use engram_store::KnowledgeDraft;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
    }

    fn engine() -> (RelevanceEngine, MemoryStore) {
        let store = MemoryStore::open_in_memory().unwrap();
        (RelevanceEngine::new(store.clone()), store)
    }

    fn write(
        store: &MemoryStore,
        topic: &str,
        decay_rate: f64,
        at: DateTime<Utc>,
    ) -> KnowledgeEntry {
        store
            .write_knowledge(
                KnowledgeDraft::new(topic, serde_json::json!({"t": topic}))
                    .with_decay_rate(decay_rate),
                at,
            )
            .unwrap()
    }

    // ── retrieve_top_k ───────────────────────────────────────────────────────

    #[test]
    fn ranks_by_effective_relevance_not_stored_score() {
        let (engine, store) = engine();
        // Same stored score; the fast-decaying one must rank lower after
        // time passes.
        let fast = write(&store, "rules", 1.0, t0());
        let slow = write(&store, "rules", 0.01, t0());

        let now = t0() + Duration::hours(5);
        let top = engine.retrieve_top_k("rules", 2, now).unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].entry.id, slow.id);
        assert_eq!(top[1].entry.id, fast.id);
        assert!(top[0].effective > top[1].effective);
    }

    #[test]
    fn reinforced_entry_outranks_decayed_sibling() {
        let (engine, store) = engine();
        let a = write(&store, "rules", 0.1, t0());
        let b = write(&store, "rules", 0.1, t0());

        let mid = t0() + Duration::hours(3);
        engine.reinforce(a.id, mid).unwrap();

        let now = t0() + Duration::hours(6);
        let top = engine.retrieve_top_k("rules", 2, now).unwrap();
        assert_eq!(top[0].entry.id, a.id);
        assert_eq!(top[1].entry.id, b.id);
    }

    #[test]
    fn top_two_of_three_keeps_order_and_drops_the_weakest() {
        let (engine, store) = engine();
        // Distinct decay rates give distinct effective scores after 10 hours.
        let high = write(&store, "rules", 0.01, t0());
        let _low = write(&store, "rules", 0.30, t0());
        let mid = write(&store, "rules", 0.05, t0());

        let now = t0() + Duration::hours(10);
        let top = engine.retrieve_top_k("rules", 2, now).unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].entry.id, high.id);
        assert_eq!(top[1].entry.id, mid.id);
    }

    #[test]
    fn truncates_to_k_and_handles_small_topics() {
        let (engine, store) = engine();
        for _ in 0..5 {
            write(&store, "rules", 0.1, t0());
        }
        assert_eq!(engine.retrieve_top_k("rules", 3, t0()).unwrap().len(), 3);
        assert_eq!(engine.retrieve_top_k("rules", 50, t0()).unwrap().len(), 5);
        assert!(engine.retrieve_top_k("rules", 0, t0()).unwrap().is_empty());
        assert!(engine.retrieve_top_k("ghosts", 3, t0()).unwrap().is_empty());
    }

    #[test]
    fn ties_break_by_last_accessed_then_created_at() {
        let (engine, store) = engine();
        // Zero decay and equal scores: pure ties on effective relevance.
        let older = write(&store, "rules", 0.0, t0());
        let newer = write(&store, "rules", 0.0, t0() + Duration::minutes(1));

        let now = t0() + Duration::hours(1);
        let top = engine.retrieve_top_k("rules", 2, now).unwrap();
        assert_eq!(top[0].entry.id, newer.id);
        assert_eq!(top[1].entry.id, older.id);
    }

    #[test]
    fn retrieval_is_read_only() {
        let (engine, store) = engine();
        let entry = write(&store, "rules", 0.1, t0());
        engine
            .retrieve_top_k("rules", 1, t0() + Duration::hours(1))
            .unwrap();
        let after = store.get_knowledge(entry.id).unwrap();
        assert_eq!(after.access_count, 0);
        assert_eq!(after.last_accessed, t0());
        assert_eq!(after.version, entry.version);
    }

    // ── reinforce ────────────────────────────────────────────────────────────

    #[test]
    fn reinforcement_boost_shrinks_with_access_count() {
        let (engine, store) = engine();
        // Zero decay isolates the boost arithmetic; gain defaults to 0.3.
        let entry = write(&store, "rules", 0.0, t0());
        assert!((entry.relevance_score - 0.5).abs() < 1e-9);

        let first = engine.reinforce(entry.id, t0()).unwrap();
        assert!((first.relevance_score - 0.8).abs() < 1e-9);
        assert_eq!(first.access_count, 1);

        let second = engine.reinforce(entry.id, t0()).unwrap();
        assert!((second.relevance_score - 0.95).abs() < 1e-9);
        assert_eq!(second.access_count, 2);

        let third = engine.reinforce(entry.id, t0()).unwrap();
        assert_eq!(third.relevance_score, 1.0);
        assert_eq!(third.access_count, 3);
    }

    #[test]
    fn reinforcement_rebases_on_decayed_score() {
        let (engine, store) = engine();
        let entry = write(&store, "rules", 0.1, t0());

        // After 10 hours: effective = 0.5 * e^-1, boost = 0.3.
        let now = t0() + Duration::hours(10);
        let touched = engine.reinforce(entry.id, now).unwrap();
        let expected = 0.5 * (-1.0f64).exp() + 0.3;
        assert!((touched.relevance_score - expected).abs() < 1e-6);
        assert_eq!(touched.last_accessed, now);
    }

    #[test]
    fn reinforcement_honors_gain_setting() {
        let (engine, store) = engine();
        store
            .put_setting(settings::REINFORCEMENT_GAIN, serde_json::json!(0.1), t0())
            .unwrap();
        let entry = write(&store, "rules", 0.0, t0());
        let touched = engine.reinforce(entry.id, t0()).unwrap();
        assert!((touched.relevance_score - 0.6).abs() < 1e-9);
    }

    #[test]
    fn reinforce_unknown_entry_is_not_found() {
        let (engine, _store) = engine();
        let err = engine.reinforce(Uuid::new_v4(), t0()).unwrap_err();
        assert!(matches!(err, EngramError::NotFound(_)));
    }

    #[test]
    fn reinforce_gives_up_after_bounded_conflict_retries() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicU32, Ordering};

        let (mut engine, store) = engine();
        let entry = write(&store, "rules", 0.0, t0());

        // Every attempt loses its touch race: a competing writer lands
        // between the engine's read and its touch.
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = attempts.clone();
        let racer = store.clone();
        engine.before_touch = Some(Arc::new(move |read: &KnowledgeEntry| {
            seen.fetch_add(1, Ordering::SeqCst);
            racer
                .touch_knowledge(read.id, 0.7, read.access_count + 1, read.version, t0())
                .unwrap();
        }));

        let err = engine.reinforce(entry.id, t0()).unwrap_err();
        assert!(matches!(err, EngramError::Conflict { .. }));
        assert_eq!(
            attempts.load(Ordering::SeqCst),
            RelevanceConfig::default().max_touch_attempts
        );
    }

    #[test]
    fn concurrent_reinforcements_all_land() {
        let (engine, store) = engine();
        let entry = write(&store, "rules", 0.0, t0());

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let engine = engine.clone();
                let id = entry.id;
                std::thread::spawn(move || engine.reinforce(id, t0()).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let after = store.get_knowledge(entry.id).unwrap();
        assert_eq!(after.access_count, 3);
    }
}
