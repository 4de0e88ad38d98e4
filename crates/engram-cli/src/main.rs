//! `engram-cli` – Engram Command Line Interface
//!
//! This binary is the primary entry point ("ignition switch") for the engram
//! memory kernel.  It:
//!
//! 1. Checks for `~/.engram/config.toml`; writes the defaults when the file
//!    is absent.
//! 2. Opens (or creates) the SQLite memory store and seeds the tuning
//!    settings that have never been written.
//! 3. Starts the agent loop over the event bus and blocks until shutdown.
//! 4. Intercepts **Ctrl-C** to announce a fault on `SystemAlerts` and stop
//!    the loop gracefully.

mod config;

use colored::Colorize;
use tracing::warn;

use engram_bus::{EventBus, Topic};
use engram_runtime::{AgentLoop, AgentLoopConfig, telemetry};
use engram_store::{MemoryStore, settings};
use engram_types::{EngramError, Event, EventPayload};

fn main() {
    // ── Structured logging ────────────────────────────────────────────────
    // Initialise tracing before the Tokio runtime exists; the OTLP exporter
    // (when enabled) uses a simple synchronous pipeline for that reason.
    // The CLI's user-facing output still uses println! for UX consistency.
    let _telemetry_guard = telemetry::init_tracing("engram");

    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let cfg = config::Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };

    // ── Memory store ──────────────────────────────────────────────────────
    let store = match MemoryStore::open(&cfg.db_path) {
        Ok(store) => store,
        Err(e) => {
            println!("{}: {}", "Failed to open memory store".red(), e);
            std::process::exit(1);
        }
    };
    println!("  Memory store open at {}", cfg.db_path.bold());

    if let Err(e) = seed_settings(&store, &cfg) {
        warn!(error = %e, "failed to seed tuning settings; store values may be incomplete");
    }

    // ── Event bus and shutdown plumbing ───────────────────────────────────
    let bus = EventBus::default();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let ctrlc_bus = bus.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!(
            "{}",
            "⚠  Ctrl-C received – initiating graceful shutdown …"
                .yellow()
                .bold()
        );

        // Announce the shutdown on the alerts lane so any subscriber can
        // react before the loop stops.
        let stop_event = Event::new(
            chrono::Utc::now(),
            "engram-cli",
            EventPayload::Fault {
                component: "cli".to_string(),
                message: "operator Ctrl-C".to_string(),
            },
        );
        let _ = ctrlc_bus.publish_to(Topic::SystemAlerts, stop_event);
        let _ = shutdown_tx.send(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    // ── Agent loop ────────────────────────────────────────────────────────
    let loop_config = AgentLoopConfig {
        context_topic: cfg.context_topic.clone(),
        top_k: cfg.top_k,
    };
    let agent = AgentLoop::new(loop_config, store, bus);

    println!(
        "\n  Listening for sensor events on topic {} (top-{} context).\n",
        cfg.context_topic.bold().cyan(),
        cfg.top_k
    );

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            println!("{}: {}", "Failed to start async runtime".red(), e);
            std::process::exit(1);
        }
    };
    rt.block_on(agent.run(shutdown_rx));

    println!("{}", "  ✓ Exiting engram.".green());
}

// ─────────────────────────────────────────────────────────────────────────────
// Settings seeding
// ─────────────────────────────────────────────────────────────────────────────

/// Write each tuning setting that has never been written.
///
/// Existing values are left alone: runtime retuning through the store
/// survives restarts, the config file only supplies first-boot seeds.
fn seed_settings(store: &MemoryStore, cfg: &config::Config) -> Result<(), EngramError> {
    let now = chrono::Utc::now();
    let seeds = [
        (
            settings::MINIMUM_CONFIDENCE_THRESHOLD,
            cfg.minimum_confidence_threshold,
        ),
        (settings::DEFAULT_RELEVANCE_SCORE, cfg.default_relevance_score),
        (settings::DEFAULT_DECAY_RATE, cfg.default_decay_rate),
        (settings::REINFORCEMENT_GAIN, cfg.reinforcement_gain),
    ];
    for (key, value) in seeds {
        if store.get_setting(key)?.is_none() {
            store.put_setting(key, serde_json::json!(value), now)?;
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"  ___ _ __   __ _ _ __ __ _ _ __ ___  "#.bold().cyan());
    println!("{}", r#" / _ \ '_ \ / _` | '__/ _` | '_ ` _ \ "#.bold().cyan());
    println!("{}", r#"|  __/ | | | (_| | | | (_| | | | | | |"#.bold().cyan());
    println!("{}", r#" \___|_| |_|\__, |_|  \__,_|_| |_| |_|"#.bold().cyan());
    println!("{}", r#"            |___/                     "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "engram".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Time-decaying memory kernel");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_settings_writes_absent_keys_once() {
        let store = MemoryStore::open_in_memory().unwrap();
        let cfg = config::Config::default();

        seed_settings(&store, &cfg).unwrap();
        assert_eq!(
            store
                .setting_f64(settings::MINIMUM_CONFIDENCE_THRESHOLD)
                .unwrap(),
            Some(0.6)
        );
        assert_eq!(
            store.setting_f64(settings::DEFAULT_DECAY_RATE).unwrap(),
            Some(0.05)
        );
    }

    #[test]
    fn seed_settings_preserves_existing_values() {
        let store = MemoryStore::open_in_memory().unwrap();
        store
            .put_setting(
                settings::REINFORCEMENT_GAIN,
                serde_json::json!(0.9),
                chrono::Utc::now(),
            )
            .unwrap();

        seed_settings(&store, &config::Config::default()).unwrap();
        assert_eq!(
            store.setting_f64(settings::REINFORCEMENT_GAIN).unwrap(),
            Some(0.9)
        );
    }
}
