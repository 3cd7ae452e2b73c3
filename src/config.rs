//! Configuration management for Gatekeeper.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{GatekeeperError, Result};
use crate::ratelimit::{TierDefaults, TierLimits, WindowStore};

/// Environment variable prefix for configuration overrides.
///
/// Nested keys are separated by `__`, e.g.
/// `GATEKEEPER__TIERS__ANONYMOUS__PER_MINUTE=30`.
pub const ENV_PREFIX: &str = "GATEKEEPER";

/// Main configuration for Gatekeeper.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Default limits per tier
    #[serde(default)]
    pub tiers: TierDefaults,

    /// Per-key limits registered at startup
    #[serde(default)]
    pub custom_limits: Vec<CustomLimitConfig>,

    /// Window store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Idle identity sweeper configuration
    #[serde(default)]
    pub sweeper: SweeperConfig,
}

/// An elevated limit granted to one API key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomLimitConfig {
    pub api_key: String,
    pub per_minute: u64,
    pub per_day: u64,
}

/// Window store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Number of lock shards, a power of two
    #[serde(default = "default_shards")]
    pub shards: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            shards: default_shards(),
        }
    }
}

fn default_shards() -> usize {
    WindowStore::DEFAULT_SHARDS
}

/// Sweeper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_sweeper_enabled")]
    pub enabled: bool,

    /// How often idle identities are evicted, in seconds
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweeper_enabled(),
            interval_secs: default_sweep_interval(),
        }
    }
}

fn default_sweeper_enabled() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    300
}

impl GatekeeperConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GatekeeperConfig = serde_yaml::from_str(yaml)
            .map_err(|e| GatekeeperError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional YAML file layered with
    /// `GATEKEEPER__*` environment variables.
    ///
    /// Sources are merged over the built-in defaults, so a single variable
    /// can override one limit without restating its siblings.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, Self::env_source())
    }

    fn env_source() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }

    fn load_with_env(path: Option<&Path>, env: config::Environment) -> Result<Self> {
        let defaults = config::Config::try_from(&GatekeeperConfig::default())
            .map_err(|e| GatekeeperError::Config(e.to_string()))?;

        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }
        builder = builder.add_source(env);

        let config: GatekeeperConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| GatekeeperError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every limit and tuning value.
    pub fn validate(&self) -> Result<()> {
        self.tiers.validate()?;
        for custom in &self.custom_limits {
            if custom.api_key.is_empty() {
                return Err(GatekeeperError::InvalidConfiguration(
                    "custom limit has an empty api_key".to_string(),
                ));
            }
            TierLimits::new(custom.per_minute, custom.per_day).map_err(|e| {
                GatekeeperError::InvalidConfiguration(format!("api_key {}: {}", custom.api_key, e))
            })?;
        }
        if self.store.shards < 2 || !self.store.shards.is_power_of_two() {
            return Err(GatekeeperError::InvalidConfiguration(format!(
                "store.shards must be a power of two greater than one, got {}",
                self.store.shards
            )));
        }
        if self.sweeper.enabled && self.sweeper.interval_secs == 0 {
            return Err(GatekeeperError::InvalidConfiguration(
                "sweeper.interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// How often the sweeper runs.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweeper.interval_secs)
    }
}
