//! Ad Slot Configuration
//!
//! One `AdSlotConfig` describes a single placement: how long each bid may take
//! to load, how often the slot refreshes and where settlement notices go.
//! Loaded from TOML, then optionally overridden from the environment.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Smallest refresh cadence accepted for a visible slot
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Main configuration for one ad slot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdSlotConfig {
    /// Placement identity and gating
    pub placement: PlacementConfig,

    /// Waterfall loading policy
    pub waterfall: WaterfallConfig,

    /// Refresh cadence
    pub refresh: RefreshConfig,

    /// Win/loss notification transport
    pub settlement: SettlementConfig,
}

/// Placement identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Server-side placement id
    pub id: String,
    /// Human-readable name used in logs
    pub name: String,
    /// Wait for the host surface to be foregrounded before each load attempt
    pub foreground_bound: bool,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            id: "default-banner".into(),
            name: "banner".into(),
            foreground_bound: true,
        }
    }
}

/// Waterfall loading policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaterfallConfig {
    /// Time box for each candidate's load attempt
    #[serde(with = "duration_serde")]
    pub bid_load_timeout: Duration,
}

impl Default for WaterfallConfig {
    fn default() -> Self {
        Self {
            bid_load_timeout: Duration::from_secs(10),
        }
    }
}

/// Refresh cadence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Time between refresh rounds while the slot is visible
    #[serde(with = "duration_serde")]
    pub interval: Duration,
    /// Start the cadence as soon as the orchestrator is spawned
    pub auto_start: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            auto_start: true,
        }
    }
}

/// Settlement transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Endpoint receiving JSON win/loss payloads (none = disabled)
    pub endpoint: Option<String>,
    /// Hit each bid's own notice URL (LURL for losers, NURL for the winner)
    pub fire_notice_urls: bool,
    /// Per-notification HTTP timeout
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            fire_notice_urls: true,
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config: {}", e),
            Self::Parse(e) => write!(f, "failed to parse config: {}", e),
            Self::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
            Self::Invalid(_) => None,
        }
    }
}

impl AdSlotConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file as written, without environment overrides
    pub fn read_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&content).map_err(ConfigError::Parse)
    }

    /// Read a TOML file and apply environment overrides on top of it
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::read_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Environment overrides. Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ADSLOT_BID_TIMEOUT_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                self.waterfall.bid_load_timeout = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = std::env::var("ADSLOT_REFRESH_INTERVAL_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                self.refresh.interval = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = std::env::var("ADSLOT_SETTLEMENT_ENDPOINT") {
            let v = v.trim();
            if !v.is_empty() {
                self.settlement.endpoint = Some(v.to_string());
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.placement.id.trim().is_empty() {
            return Err(ConfigError::Invalid("placement.id must not be empty".into()));
        }
        if self.waterfall.bid_load_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "waterfall.bid_load_timeout must be positive".into(),
            ));
        }
        if self.refresh.interval < MIN_REFRESH_INTERVAL {
            return Err(ConfigError::Invalid(format!(
                "refresh.interval must be >= {}ms (got {}ms)",
                MIN_REFRESH_INTERVAL.as_millis(),
                self.refresh.interval.as_millis()
            )));
        }
        Ok(())
    }
}

// Durations are written as integer milliseconds in TOML
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
