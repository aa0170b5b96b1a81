//! Hall configuration with validation and defaults
//!
//! Loaded from TOML, then overridden from `BINGOHALL_*` environment
//! variables, then validated as a whole.

use crate::errors::{BingoResult, ConfigurationError};
use crate::games::prizes::PrizeSchedule;
use crate::games::types::TieBreakPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HallConfig {
    pub rules: RulesConfig,
    pub prizes: PrizeSchedule,
    pub runtime: RuntimeConfig,
    pub storage: StorageConfig,
    pub api: ApiConfig,
    pub monitoring: MonitoringConfig,
}

/// Game rules shared by every game in the hall
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RulesConfig {
    /// Automatic draw cadence; 0 means draws are triggered manually
    pub draw_interval_ms: u64,
    /// How long co-winning bingo claims are accepted after the first one
    pub claim_window_ms: u64,
    /// A bingo completed at or before this call wins the jackpot
    pub jackpot_threshold: u32,
    pub tie_break: TieBreakPolicy,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            draw_interval_ms: 5_000,
            claim_window_ms: 3_000,
            jackpot_threshold: 40,
            tie_break: TieBreakPolicy::SplitEvenly,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Capacity of each game's command queue
    pub command_buffer: usize,
    /// Deadline for a claim to be answered by its game
    pub claim_timeout_ms: u64,
    pub settlement_queue_capacity: usize,
    /// Deadline for ledger and compliance calls
    pub collaborator_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            command_buffer: 1_024,
            claim_timeout_ms: 2_000,
            settlement_queue_capacity: 256,
            collaborator_timeout_ms: 1_000,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    RocksDb,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_directory: String,
    /// Whether to clear the database on startup (testing only!)
    pub clear_on_start: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::RocksDb,
            data_directory: "./DB/bingohall_data".to_string(),
            clear_on_start: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub request_timeout_secs: u64,
    /// Key for player session tokens on `/ws`. Unset means identities are
    /// taken as given and an authenticating gateway must sit in front.
    pub session_secret: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            allowed_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
            session_secret: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Default `tracing` filter when `RUST_LOG` is unset
    pub log_level: String,
    pub enable_metrics: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "bingohall=info,tower_http=info".to_string(),
            enable_metrics: true,
        }
    }
}

impl HallConfig {
    /// Persistent hall with automatic draws
    pub fn production() -> Self {
        Self {
            storage: StorageConfig {
                backend: StorageBackend::RocksDb,
                clear_on_start: false,
                ..Default::default()
            },
            api: ApiConfig {
                host: "0.0.0.0".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// In-memory hall with manual draws and short deadlines
    pub fn testing() -> Self {
        Self {
            rules: RulesConfig {
                draw_interval_ms: 0,
                claim_window_ms: 200,
                ..Default::default()
            },
            runtime: RuntimeConfig {
                command_buffer: 64,
                claim_timeout_ms: 500,
                settlement_queue_capacity: 16,
                collaborator_timeout_ms: 500,
            },
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                clear_on_start: true,
                ..Default::default()
            },
            monitoring: MonitoringConfig {
                enable_metrics: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.prizes.total_bps() != crate::games::prizes::TOTAL_BPS {
            return Err(ConfigurationError::InvalidValue {
                field: "prizes".to_string(),
                value: self.prizes.total_bps().to_string(),
                reason: "category shares must sum to 10000 bps".to_string(),
            });
        }

        if self.rules.jackpot_threshold == 0 || self.rules.jackpot_threshold > 90 {
            return Err(ConfigurationError::InvalidValue {
                field: "rules.jackpot_threshold".to_string(),
                value: self.rules.jackpot_threshold.to_string(),
                reason: "must be within 1..=90".to_string(),
            });
        }

        if self.runtime.command_buffer == 0 || self.runtime.settlement_queue_capacity == 0 {
            return Err(ConfigurationError::ValidationFailed(
                "runtime queues must have non-zero capacity".to_string(),
            ));
        }

        if self.runtime.claim_timeout_ms == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "runtime.claim_timeout_ms".to_string(),
                value: "0".to_string(),
                reason: "claims need a deadline".to_string(),
            });
        }

        if matches!(&self.api.session_secret, Some(secret) if secret.is_empty()) {
            return Err(ConfigurationError::InvalidValue {
                field: "api.session_secret".to_string(),
                value: String::new(),
                reason: "must not be empty when set".to_string(),
            });
        }

        if self.storage.backend == StorageBackend::RocksDb && self.storage.data_directory.is_empty() {
            return Err(ConfigurationError::ValidationFailed(
                "storage.data_directory is required for the rocksdb backend".to_string(),
            ));
        }

        Ok(())
    }

    pub fn draw_interval(&self) -> Option<Duration> {
        match self.rules.draw_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn claim_window(&self) -> Duration {
        Duration::from_millis(self.rules.claim_window_ms)
    }

    pub fn claim_timeout(&self) -> Duration {
        Duration::from_millis(self.runtime.claim_timeout_ms)
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.runtime.collaborator_timeout_ms)
    }
}

/// Configuration loader with environment variable support
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
}

fn parse_env<T: std::str::FromStr>(field: &str, value: String, reason: &str) -> Result<T, ConfigurationError> {
    value.parse().map_err(|_| ConfigurationError::InvalidValue {
        field: field.to_string(),
        value,
        reason: reason.to_string(),
    })
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> BingoResult<HallConfig> {
        let mut config = match self.config_path {
            Some(ref path) => Self::load_from_file(path)?,
            None => HallConfig::default(),
        };

        Self::apply_overrides(&mut config, |key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_file(path: &str) -> Result<HallConfig, ConfigurationError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;
        Ok(toml::from_str(&content)?)
    }

    /// Apply `BINGOHALL_*` overrides using `lookup` to read variables
    pub fn apply_overrides<F>(config: &mut HallConfig, lookup: F) -> Result<(), ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("BINGOHALL_HOST") {
            config.api.host = host;
        }
        if let Some(port) = lookup("BINGOHALL_PORT") {
            config.api.port = parse_env("BINGOHALL_PORT", port, "Invalid port number")?;
        }
        if let Some(secret) = lookup("BINGOHALL_SESSION_SECRET") {
            config.api.session_secret = Some(secret);
        }
        if let Some(path) = lookup("BINGOHALL_DB_PATH") {
            config.storage.data_directory = path;
        }
        if let Some(interval) = lookup("BINGOHALL_DRAW_INTERVAL_MS") {
            config.rules.draw_interval_ms =
                parse_env("BINGOHALL_DRAW_INTERVAL_MS", interval, "Invalid interval in milliseconds")?;
        }
        if let Some(threshold) = lookup("BINGOHALL_JACKPOT_THRESHOLD") {
            config.rules.jackpot_threshold =
                parse_env("BINGOHALL_JACKPOT_THRESHOLD", threshold, "Invalid call count")?;
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, config: &HallConfig, path: &str) -> BingoResult<()> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to write to {}: {}", path, e)).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_presets_are_valid() {
        assert!(HallConfig::default().validate().is_ok());
        assert!(HallConfig::production().validate().is_ok());
        assert!(HallConfig::testing().validate().is_ok());
        assert_eq!(HallConfig::testing().draw_interval(), None);
    }

    #[test]
    fn test_prize_shares_must_sum_to_total() {
        let mut config = HallConfig::default();
        config.prizes.platform_bps = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_jackpot_threshold_range() {
        let mut config = HallConfig::default();
        config.rules.jackpot_threshold = 91;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_takes_defaults() {
        let config: HallConfig = toml::from_str(
            r#"
            [rules]
            draw_interval_ms = 250
            tie_break = "first_submitter"

            [storage]
            backend = "memory"
            "#,
        )
        .unwrap();

        assert_eq!(config.rules.draw_interval_ms, 250);
        assert_eq!(config.rules.tie_break, TieBreakPolicy::FirstSubmitter);
        assert_eq!(config.rules.jackpot_threshold, 40);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.api.port, 8080);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("BINGOHALL_PORT", "9090"),
            ("BINGOHALL_DB_PATH", "/tmp/hall"),
            ("BINGOHALL_JACKPOT_THRESHOLD", "35"),
            ("BINGOHALL_SESSION_SECRET", "hall-key"),
        ]
        .into_iter()
        .collect();

        let mut config = HallConfig::default();
        ConfigLoader::apply_overrides(&mut config, |k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.api.port, 9090);
        assert_eq!(config.storage.data_directory, "/tmp/hall");
        assert_eq!(config.rules.jackpot_threshold, 35);
        assert_eq!(config.api.session_secret.as_deref(), Some("hall-key"));
    }

    #[test]
    fn test_empty_session_secret_is_rejected() {
        let mut config = HallConfig::default();
        config.api.session_secret = Some(String::new());
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { ref field, .. }) if field == "api.session_secret"
        ));
    }

    #[test]
    fn test_invalid_env_override_is_rejected() {
        let mut config = HallConfig::default();
        let err = ConfigLoader::apply_overrides(&mut config, |k| {
            (k == "BINGOHALL_PORT").then(|| "not-a-port".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hall.toml");
        let path = path.to_string_lossy().to_string();

        let mut config = HallConfig::testing();
        config.rules.jackpot_threshold = 33;
        ConfigLoader::new().save(&config, &path).unwrap();

        let loaded = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
