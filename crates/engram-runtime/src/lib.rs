//! `engram-runtime` – The agent loop engine.
//!
//! The execution layer that ties the bus, the store, and the relevance
//! engine into a living process.
//!
//! # Modules
//!
//! - [`agent_loop`] – [`AgentLoop`][agent_loop::AgentLoop]:
//!   the perceive–record–decide–act orchestrator.  Consumes sensor events
//!   from the bus, records them through the
//!   [`InteractionRecorder`][engram_engine::InteractionRecorder], ranks
//!   context with the [`RelevanceEngine`][engram_engine::RelevanceEngine],
//!   and dispatches [`ActionRequest`][engram_types::ActionRequest]s.  A
//!   fatal store error parks the loop in a `Faulted` phase until the next
//!   event re-arms it.
//! - [`clock`] – [`Clock`][clock::Clock]: the injected time source.  All
//!   decay arithmetic below the runtime takes `now` as an argument; this is
//!   the one place that actually reads a clock.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace
//!   export to Jaeger, Grafana Tempo, or any OTLP-compatible collector.

pub mod agent_loop;
pub mod clock;
pub mod telemetry;

pub use agent_loop::{
    AgentLoop, AgentLoopConfig, DecisionPolicy, TickOutcome, TickPhase, TopRanked,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use telemetry::{TracerProviderGuard, init_tracing};
