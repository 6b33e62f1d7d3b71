/// Service configuration.
///
/// Loaded from a TOML file (`wqmon.toml` by default). Every key is
/// optional; missing sections and keys fall back to the defaults below, so
/// an empty or absent file gives a working daemon. The database URL is not
/// part of the file: it comes from `DATABASE_URL`, after `.env` is loaded.
///
/// Scoring weights, breakpoints and status thresholds are compiled in and
/// deliberately not configurable here.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::simulate::PropagationSettings;

pub const DEFAULT_CONFIG_PATH: &str = "wqmon.toml";

/// Upper bound for every interval and duration setting.
pub const MAX_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("cannot parse {path}: {source}")]
    Parse { path: String, source: toml::de::Error },
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("DATABASE_URL is not set (export it or add it to .env)")]
    MissingDatabaseUrl,
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    pub interval_secs: u64,
    pub stale_after_secs: u64,
    pub store_timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self { interval_secs: 5, stale_after_secs: 60, store_timeout_secs: 10 }
    }
}

impl AnalysisConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        bounded_seconds(self.stale_after_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    pub interval_secs: u64,
    pub trigger_probability: f64,
    pub transit_delay_secs: u64,
    pub active_window_secs: u64,
    pub glitch_probability: f64,
    /// Fixed RNG seed; a fresh random seed is drawn when absent.
    pub seed: Option<u64>,
    /// Network file to use instead of the database node directory.
    pub network: Option<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            trigger_probability: 0.02,
            transit_delay_secs: 10,
            active_window_secs: 30,
            glitch_probability: 0.005,
            seed: None,
            network: None,
        }
    }
}

impl SimulationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Simulated time between two ticks.
    pub fn step(&self) -> chrono::Duration {
        bounded_seconds(self.interval_secs)
    }

    pub fn propagation(&self) -> PropagationSettings {
        PropagationSettings {
            trigger_probability: self.trigger_probability,
            transit_delay: bounded_seconds(self.transit_delay_secs),
            active_window: bounded_seconds(self.active_window_secs),
        }
    }
}

// Clamped to the cap so an unvalidated config still converts.
fn bounded_seconds(secs: u64) -> chrono::Duration {
    let secs = secs.min(MAX_DURATION_SECS) as i64;
    chrono::Duration::try_seconds(secs).unwrap_or(chrono::Duration::MAX)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), file: None }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub analysis: AnalysisConfig,
    pub simulation: SimulationConfig,
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Loading and validation
// ---------------------------------------------------------------------------

impl ServiceConfig {
    pub fn parse(contents: &str, path: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = toml::from_str(contents)
            .map_err(|source| ConfigError::Parse { path: path.to_string(), source })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, or `wqmon.toml` if it exists, or the defaults.
    ///
    /// An explicitly given path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Path::new(DEFAULT_CONFIG_PATH),
            None => return Ok(Self::default()),
        };
        let display = path.display().to_string();
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: display.clone(), source })?;
        Self::parse(&contents, &display)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.analysis.interval_secs == 0 {
            return invalid("analysis.interval_secs must be at least 1");
        }
        if self.analysis.store_timeout_secs == 0 {
            return invalid("analysis.store_timeout_secs must be at least 1");
        }
        if self.simulation.interval_secs == 0 {
            return invalid("simulation.interval_secs must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.simulation.trigger_probability) {
            return invalid("simulation.trigger_probability must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.simulation.glitch_probability) {
            return invalid("simulation.glitch_probability must be within [0, 1]");
        }
        if self.simulation.active_window_secs == 0 {
            return invalid("simulation.active_window_secs must be at least 1");
        }

        let bounded = [
            ("analysis.interval_secs", self.analysis.interval_secs),
            ("analysis.stale_after_secs", self.analysis.stale_after_secs),
            ("analysis.store_timeout_secs", self.analysis.store_timeout_secs),
            ("simulation.interval_secs", self.simulation.interval_secs),
            ("simulation.transit_delay_secs", self.simulation.transit_delay_secs),
            ("simulation.active_window_secs", self.simulation.active_window_secs),
        ];
        for (key, secs) in bounded {
            if secs > MAX_DURATION_SECS {
                return Err(ConfigError::Invalid(format!(
                    "{} must be at most {} (one week), got {}",
                    key, MAX_DURATION_SECS, secs
                )));
            }
        }
        Ok(())
    }
}

/// `DATABASE_URL`, after loading `.env` if present.
pub fn database_url() -> Result<String, ConfigError> {
    dotenv::dotenv().ok();
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}
