//! Configuration Vault – reads/writes `~/.engram/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Persisted user configuration stored in `~/.engram/config.toml`.
///
/// The tuning values (`minimum_confidence_threshold` and friends) are only
/// used to seed `system_settings` keys that have never been written; once
/// seeded, the store's values are authoritative and can be retuned at
/// runtime without touching this file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the SQLite database file. Relative paths resolve against the
    /// working directory.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Knowledge topic the agent loop queries for context.
    #[serde(default = "default_context_topic")]
    pub context_topic: String,

    /// How many candidate entries each tick ranks.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Seed for the `minimum_confidence_threshold` setting.
    #[serde(default = "default_confidence_threshold")]
    pub minimum_confidence_threshold: f64,

    /// Seed for the `default_relevance_score` setting.
    #[serde(default = "default_relevance_score")]
    pub default_relevance_score: f64,

    /// Seed for the `default_decay_rate` setting (per hour).
    #[serde(default = "default_decay_rate")]
    pub default_decay_rate: f64,

    /// Seed for the `reinforcement_gain` setting.
    #[serde(default = "default_reinforcement_gain")]
    pub reinforcement_gain: f64,
}

fn default_db_path() -> String {
    "engram.db".to_string()
}
fn default_context_topic() -> String {
    "general".to_string()
}
fn default_top_k() -> usize {
    3
}
fn default_confidence_threshold() -> f64 {
    engram_store::settings::FALLBACK_MINIMUM_CONFIDENCE
}
fn default_relevance_score() -> f64 {
    engram_store::settings::FALLBACK_RELEVANCE_SCORE
}
fn default_decay_rate() -> f64 {
    engram_store::settings::FALLBACK_DECAY_RATE
}
fn default_reinforcement_gain() -> f64 {
    engram_store::settings::FALLBACK_REINFORCEMENT_GAIN
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            context_topic: default_context_topic(),
            top_k: default_top_k(),
            minimum_confidence_threshold: default_confidence_threshold(),
            default_relevance_score: default_relevance_score(),
            default_decay_rate: default_decay_rate(),
            reinforcement_gain: default_reinforcement_gain(),
        }
    }
}

/// Return the path to `~/.engram/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
/// Extracted for testability without mutating environment variables.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".engram").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &PathBuf) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `ENGRAM_*` environment variable overrides to `cfg`.
///
/// Supported variables:
///
/// | Variable | Config field |
/// |---|---|
/// | `ENGRAM_DB_PATH` | `db_path` |
/// | `ENGRAM_CONTEXT_TOPIC` | `context_topic` |
/// | `ENGRAM_TOP_K` | `top_k` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("ENGRAM_DB_PATH") {
        cfg.db_path = v;
    }
    if let Ok(v) = std::env::var("ENGRAM_CONTEXT_TOPIC") {
        cfg.context_topic = v;
    }
    if let Ok(v) = std::env::var("ENGRAM_TOP_K")
        && let Ok(k) = v.parse::<usize>()
    {
        cfg.top_k = k;
    }
}

/// Save the config to disk, creating `~/.engram/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &PathBuf) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Restrict the config directory to the owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    // Write the file with owner-only read/write (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config::default();
        save_to(&cfg, &path).expect("save");

        let file_meta = std::fs::metadata(&path).expect("file metadata");
        let file_mode = file_meta.permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_meta = std::fs::metadata(path.parent().unwrap()).expect("dir metadata");
        let dir_mode = dir_meta.permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700, "config directory must have 0o700 permissions");
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config::default();
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.db_path, "engram.db");
        assert_eq!(loaded.context_topic, "general");
        assert_eq!(loaded.top_k, 3);
        assert_eq!(loaded.minimum_confidence_threshold, 0.6);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "context_topic = \"trivia\"\n").unwrap();

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.context_topic, "trivia");
        assert_eq!(loaded.top_k, 3);
        assert_eq!(loaded.default_decay_rate, 0.05);
    }

    #[test]
    fn config_path_points_to_engram_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".engram"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        let result = load_from(&path).expect("no error");
        assert!(result.is_none());
    }

    #[test]
    fn apply_env_overrides_changes_db_path() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("ENGRAM_DB_PATH", "/var/lib/engram/engram.db") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.db_path, "/var/lib/engram/engram.db");
        unsafe { std::env::remove_var("ENGRAM_DB_PATH") };
    }

    #[test]
    fn apply_env_overrides_changes_context_topic() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("ENGRAM_CONTEXT_TOPIC", "lore") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.context_topic, "lore");
        unsafe { std::env::remove_var("ENGRAM_CONTEXT_TOPIC") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_top_k() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("ENGRAM_TOP_K", "not-a-number") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.top_k, 3);
        unsafe { std::env::remove_var("ENGRAM_TOP_K") };
    }
}
