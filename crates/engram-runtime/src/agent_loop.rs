//! [`AgentLoop`] – The perceive–record–decide–act orchestrator.
//!
//! Implements the cycle that turns a stream of transcribed utterances into
//! memory writes and context-driven actions.  Each tick:
//!
//! 1. **Perceive** – run the incoming [`SensorEvent`] through the
//!    [`InteractionRecorder`].  A confidence rejection is a normal outcome,
//!    not a fault: the utterance is dropped and the tick continues.
//! 2. **Decide** – ask the [`RelevanceEngine`] for the top-k entries under
//!    the configured context topic at this tick's `now`, then let the
//!    [`DecisionPolicy`] pick one (or decline).
//! 3. **Act** – reinforce the chosen entry (selection is a meaningful
//!    access) and publish an [`ActionRequest`] on
//!    [`Topic::ActionRequests`].  Publication is best-effort: no subscriber
//!    is not an error.
//!
//! # Fault handling
//!
//! A fatal error (the store becoming unavailable) parks the loop in
//! [`TickPhase::Faulted`] and announces the fault on
//! [`Topic::SystemAlerts`].  The loop stays resident: the next event
//! re-arms it from the top of the cycle, so a recovered store resumes
//! service without a restart.
//!
//! All decay and reinforcement arithmetic inside a tick is evaluated against
//! one [`Clock::now`] sample taken at tick start.

use engram_bus::{EventBus, Topic, TopicReceiver};
use engram_engine::{InteractionRecorder, RelevanceEngine, ScoredEntry};
use engram_store::MemoryStore;
use engram_types::{ActionRequest, EngramError, Event, EventPayload, SensorEvent};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};

/// Event source tag stamped on everything the loop publishes.
const LOOP_SOURCE: &str = "engram-runtime::agent_loop";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration bundle for [`AgentLoop`].
#[derive(Debug, Clone)]
pub struct AgentLoopConfig {
    /// Knowledge topic queried for context on every tick.
    pub context_topic: String,
    /// How many candidate entries the decision policy sees.
    pub top_k: usize,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            context_topic: "general".to_string(),
            top_k: 3,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Decision policy
// ─────────────────────────────────────────────────────────────────────────────

/// Chooses which ranked entry (if any) a tick should act on.
///
/// Receives the triggering event and the ranking, highest effective
/// relevance first; returns an index into the ranking or `None` to skip
/// acting this tick.
pub trait DecisionPolicy: Send + Sync {
    fn choose(&self, event: &SensorEvent, ranking: &[ScoredEntry]) -> Option<usize>;
}

/// Default policy: always act on the top-ranked entry when one exists.
pub struct TopRanked;

impl DecisionPolicy for TopRanked {
    fn choose(&self, _event: &SensorEvent, ranking: &[ScoredEntry]) -> Option<usize> {
        (!ranking.is_empty()).then_some(0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tick state
// ─────────────────────────────────────────────────────────────────────────────

/// Where the loop currently is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPhase {
    /// Between ticks, waiting for the next sensor event.
    Idle,
    /// Running the intake path for the current event.
    Perceiving,
    /// Ranking context and consulting the decision policy.
    Deciding,
    /// Reinforcing the chosen entry and dispatching the action.
    Acting,
    /// A fatal error parked the loop; the next event re-arms it.
    Faulted,
}

/// What one tick produced.
#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// The policy chose an entry; this request was dispatched.
    Acted(ActionRequest),
    /// Nothing to act on (empty ranking or the policy declined).
    NoAction,
}

// ─────────────────────────────────────────────────────────────────────────────
// AgentLoop
// ─────────────────────────────────────────────────────────────────────────────

/// The perceive–record–decide–act orchestrator.
///
/// Owns the recorder, the relevance engine, and a subscription to
/// [`Topic::SensorEvents`].  Call [`AgentLoop::run`] to process the stream,
/// or drive [`AgentLoop::tick`] directly with individual events.
pub struct AgentLoop {
    config: AgentLoopConfig,
    recorder: InteractionRecorder,
    engine: RelevanceEngine,
    bus: EventBus,
    sensor_rx: TopicReceiver,
    policy: Box<dyn DecisionPolicy>,
    clock: Box<dyn Clock>,
    phase: TickPhase,
    faulted_ticks: u64,
}

impl AgentLoop {
    /// Wire a loop over the given store and bus with default policy and
    /// system clock.
    pub fn new(config: AgentLoopConfig, store: MemoryStore, bus: EventBus) -> Self {
        let sensor_rx = bus.subscribe_to(Topic::SensorEvents);
        Self {
            config,
            recorder: InteractionRecorder::new(store.clone()),
            engine: RelevanceEngine::new(store),
            bus,
            sensor_rx,
            policy: Box::new(TopRanked),
            clock: Box::new(SystemClock),
            phase: TickPhase::Idle,
            faulted_ticks: 0,
        }
    }

    /// Replace the decision policy.
    pub fn with_policy(mut self, policy: Box<dyn DecisionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the time source (tests pin this to a [`FixedClock`]).
    ///
    /// [`FixedClock`]: crate::clock::FixedClock
    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The loop's current [`TickPhase`].
    pub fn phase(&self) -> TickPhase {
        self.phase
    }

    /// How many ticks have ended in a fault since startup.
    pub fn faulted_ticks(&self) -> u64 {
        self.faulted_ticks
    }

    // -------------------------------------------------------------------------
    // Tick
    // -------------------------------------------------------------------------

    /// Process one sensor event through the full cycle.
    ///
    /// Non-fatal intake errors (confidence rejection, malformed event) are
    /// logged and the tick proceeds to the decision phase – dropped noise
    /// must not cost the downstream consumer its context.  A fatal error
    /// faults the loop and propagates to the caller.
    pub fn tick(&mut self, event: &SensorEvent) -> Result<TickOutcome, EngramError> {
        // Entering the cycle re-arms a faulted loop.
        self.phase = TickPhase::Perceiving;
        let now = self.clock.now();

        match self.recorder.record(event, now) {
            Ok(row) => debug!(interaction = %row.id, "utterance recorded"),
            Err(e) if e.is_fatal() => return self.fault("recorder", e, now),
            Err(e) => debug!(error = %e, "utterance dropped at intake"),
        }

        self.phase = TickPhase::Deciding;
        let ranking = match self.engine.retrieve_top_k(
            &self.config.context_topic,
            self.config.top_k,
            now,
        ) {
            Ok(ranking) => ranking,
            Err(e) => return self.fault("engine", e, now),
        };

        let Some(chosen) = self
            .policy
            .choose(event, &ranking)
            .and_then(|i| ranking.get(i))
        else {
            self.phase = TickPhase::Idle;
            return Ok(TickOutcome::NoAction);
        };

        self.phase = TickPhase::Acting;
        // Selection is a meaningful access: reinforce before dispatching.
        let entry = match self.engine.reinforce(chosen.entry.id, now) {
            Ok(entry) => entry,
            Err(e) if e.is_fatal() => return self.fault("engine", e, now),
            Err(e) => {
                // Lost a race or the entry was evicted mid-tick; act on the
                // snapshot we ranked.
                warn!(error = %e, entry = %chosen.entry.id, "reinforcement skipped");
                chosen.entry.clone()
            }
        };

        let request = ActionRequest {
            topic: entry.topic.clone(),
            entry_id: entry.id,
            content: entry.content.clone(),
        };
        let dispatch = Event::new(now, LOOP_SOURCE, EventPayload::ActionDispatch(request.clone()));
        // Best-effort publish – no subscribers is not an error.
        let _ = self.bus.publish_to(Topic::ActionRequests, dispatch);

        self.phase = TickPhase::Idle;
        Ok(TickOutcome::Acted(request))
    }

    fn fault(
        &mut self,
        component: &str,
        cause: EngramError,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<TickOutcome, EngramError> {
        self.phase = TickPhase::Faulted;
        self.faulted_ticks += 1;
        error!(component, error = %cause, "tick faulted");
        let alert = Event::new(
            now,
            LOOP_SOURCE,
            EventPayload::Fault {
                component: component.to_string(),
                message: cause.to_string(),
            },
        );
        // Best-effort: a fault with nobody listening is still a fault.
        let _ = self.bus.publish_to(Topic::SystemAlerts, alert);
        Err(cause)
    }

    // -------------------------------------------------------------------------
    // Run loop
    // -------------------------------------------------------------------------

    /// Consume the sensor stream until `shutdown` flips to `true` or the bus
    /// closes.
    ///
    /// Tick errors never end the loop – they are already logged and
    /// announced on [`Topic::SystemAlerts`] by [`tick`][Self::tick].  A
    /// lagged subscription is logged and skipped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(topic = %self.config.context_topic, "agent loop running");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = self.sensor_rx.recv() => match received {
                    Ok(event) => {
                        if let EventPayload::SensorObservation(sensor) = event.payload {
                            let _ = self.tick(&sensor);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(dropped = n, "sensor stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        info!("agent loop stopped");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
