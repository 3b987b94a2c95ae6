//! Configuration file parser for gleaner.toml.
//!
//! The config file is optional — a missing file yields `Config::default()`.
//! All values are loaded once at process start and handed to components by
//! reference; nothing reads configuration from ambient global state.
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("min_interval_secs ({min}) must not exceed max_interval_secs ({max})")]
    IntervalBounds { min: i64, max: i64 },
}

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be
/// specified. Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the SQLite database file.
    pub database_path: String,

    /// Lower bound for the adaptive fetch interval, in seconds.
    pub min_interval_secs: i64,

    /// Upper bound for the adaptive fetch interval, in seconds.
    pub max_interval_secs: i64,

    /// Interval assigned to a freshly created feed, in seconds.
    pub default_interval_secs: i64,

    /// Entries kept per feed; retention trims the oldest beyond this.
    pub max_entries_per_feed: i64,

    /// Age of an unresolved failure streak after which a feed is marked
    /// unavailable, in seconds.
    pub failure_threshold_secs: i64,

    /// Per-fetch HTTP timeout, in seconds.
    pub fetch_timeout_secs: u64,

    /// Hard cap on a response body, in bytes.
    pub max_response_bytes: usize,

    /// Maximum concurrently running refresh jobs.
    pub worker_count: usize,

    /// Scheduler tick period, in seconds.
    pub tick_secs: u64,

    /// Case-insensitive substrings; a feed URL containing one is rejected.
    pub blacklist: Vec<String>,

    /// Host suffix -> named fetch override (see `policy` for the registry).
    pub fetch_overrides: HashMap<String, String>,

    /// Host suffix -> named entry override.
    pub entry_overrides: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "gleaner.db".to_string(),
            min_interval_secs: 600,
            max_interval_secs: 86_400,
            default_interval_secs: 3_600,
            max_entries_per_feed: 500,
            failure_threshold_secs: 7 * 24 * 3_600,
            fetch_timeout_secs: 30,
            max_response_bytes: 10 * 1024 * 1024,
            worker_count: 10,
            tick_secs: 60,
            blacklist: Vec::new(),
            fetch_overrides: HashMap::new(),
            entry_overrides: HashMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse as a raw table first to warn about probable typos
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "database_path",
                "min_interval_secs",
                "max_interval_secs",
                "default_interval_secs",
                "max_entries_per_feed",
                "failure_threshold_secs",
                "fetch_timeout_secs",
                "max_response_bytes",
                "worker_count",
                "tick_secs",
                "blacklist",
                "fetch_overrides",
                "entry_overrides",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_interval_secs > self.max_interval_secs {
            return Err(ConfigError::IntervalBounds {
                min: self.min_interval_secs,
                max: self.max_interval_secs,
            });
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.min_interval_secs, 600);
        assert_eq!(config.max_interval_secs, 86_400);
        assert_eq!(config.default_interval_secs, 3_600);
        assert_eq!(config.max_entries_per_feed, 500);
        assert_eq!(config.failure_threshold_secs, 604_800);
        assert!(config.blacklist.is_empty());
        assert!(config.fetch_overrides.is_empty());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/gleaner_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.default_interval_secs, 3_600);
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let dir = std::env::temp_dir().join("gleaner_config_test_partial");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "min_interval_secs = 300\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.min_interval_secs, 300);
        assert_eq!(config.max_interval_secs, 86_400); // default

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let dir = std::env::temp_dir().join("gleaner_config_test_full");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let content = r#"
database_path = "/var/lib/gleaner/feeds.db"
min_interval_secs = 900
max_interval_secs = 43200
max_entries_per_feed = 200
blacklist = ["spam.example", "malware.example"]

[fetch_overrides]
"consent-wall.example" = "browser-headers"

[entry_overrides]
"rotating-guids.example" = "guid-from-url"
"#;
        std::fs::write(&path, content).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.database_path, "/var/lib/gleaner/feeds.db");
        assert_eq!(config.min_interval_secs, 900);
        assert_eq!(config.max_interval_secs, 43_200);
        assert_eq!(config.max_entries_per_feed, 200);
        assert_eq!(config.blacklist.len(), 2);
        assert_eq!(
            config
                .fetch_overrides
                .get("consent-wall.example")
                .map(String::as_str),
            Some("browser-headers")
        );
        assert_eq!(
            config
                .entry_overrides
                .get("rotating-guids.example")
                .map(String::as_str),
            Some("guid-from-url")
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let dir = std::env::temp_dir().join("gleaner_config_test_invalid");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "this is not [valid toml").unwrap();

        let result = Config::load(&path);
        assert!(matches!(result, Err(ConfigError::Parse(_))));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_inverted_interval_bounds_rejected() {
        let dir = std::env::temp_dir().join("gleaner_config_test_bounds");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "min_interval_secs = 7200\nmax_interval_secs = 3600\n").unwrap();

        let result = Config::load(&path);
        assert!(matches!(result, Err(ConfigError::IntervalBounds { .. })));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let dir = std::env::temp_dir().join("gleaner_config_test_unknown");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "totally_fake_key = \"should not fail\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.default_interval_secs, 3_600);

        std::fs::remove_dir_all(&dir).ok();
    }
}
