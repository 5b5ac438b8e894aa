/*!
 * Configuration types for Locus
 */

use crate::error::{LocusError, Result};
use locus_core_failover::{FailoverConfig, LocationParams};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Main configuration for a Locus session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocusConfig {
    /// Logging level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stderr)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,

    /// Treat a service-backed provider still connecting after this many
    /// milliseconds as failed (0 or absent = wait forever)
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,

    /// Initialize the first provider as soon as a control is built
    #[serde(default = "default_true")]
    pub pre_initialize: bool,

    /// Location params used when the caller does not pick any
    #[serde(default)]
    pub preset: Preset,

    /// Session name, used to key persisted readings
    #[serde(default = "default_session")]
    pub session: String,

    /// Preferences file for persisted readings (None = in memory)
    #[serde(default)]
    pub store_file: Option<PathBuf>,

    /// Ordered provider chain; the first entry has the highest priority
    #[serde(default)]
    pub providers: Vec<ProviderSpec>,
}

impl Default for LocusConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
            connect_timeout_ms: None,
            pre_initialize: true,
            preset: Preset::default(),
            session: default_session(),
            store_file: None,
            providers: Vec::new(),
        }
    }
}

/// Named location params presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    Navigation,
    #[default]
    BestEffort,
    Lazy,
}

impl Preset {
    pub fn params(&self) -> LocationParams {
        match self {
            Preset::Navigation => LocationParams::NAVIGATION,
            Preset::BestEffort => LocationParams::BEST_EFFORT,
            Preset::Lazy => LocationParams::LAZY,
        }
    }
}

impl std::str::FromStr for Preset {
    type Err = LocusError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "navigation" => Ok(Preset::Navigation),
            "best_effort" => Ok(Preset::BestEffort),
            "lazy" => Ok(Preset::Lazy),
            other => Err(LocusError::Config(format!("Unknown preset '{}'", other))),
        }
    }
}

/// Declarative description of one provider in the chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// Stable identity, also the key for persisted readings
    pub name: String,

    /// Registered factory kind ("simulated", "replay", or a custom kind)
    pub kind: String,

    /// Whether the provider reports connection events
    #[serde(default)]
    pub service_backed: bool,

    /// Whether the provider can serve single-shot requests
    #[serde(default = "default_true")]
    pub single_shot: bool,

    /// Simulated: report connected after this many milliseconds
    #[serde(default)]
    pub connect_after_ms: Option<u64>,

    /// Simulated: report failed after this many milliseconds
    #[serde(default)]
    pub fail_after_ms: Option<u64>,

    /// Simulated: emit readings around this [latitude, longitude]
    #[serde(default)]
    pub origin: Option<[f64; 2]>,

    /// Replay: JSON track file, relative paths resolve against the config file
    #[serde(default)]
    pub track: Option<PathBuf>,
}

impl ProviderSpec {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            service_backed: false,
            single_shot: true,
            connect_after_ms: None,
            fail_after_ms: None,
            origin: None,
            track: None,
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_session() -> String {
    "default".to_string()
}

impl LocusConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LocusError::NotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        let mut config: LocusConfig = toml::from_str(&contents)?;

        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        for spec in &mut self.providers {
            if let Some(track) = spec.track.as_mut() {
                if track.is_relative() {
                    *track = base.join(&*track);
                }
            }
        }
        if let Some(store) = self.store_file.as_mut() {
            if store.is_relative() {
                *store = base.join(&*store);
            }
        }
    }

    /// Check the provider chain can be built
    pub fn validate(&self) -> Result<()> {
        if self.providers.is_empty() {
            return Err(LocusError::Config(
                "at least one provider must be configured".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for spec in &self.providers {
            if spec.name.trim().is_empty() {
                return Err(LocusError::Config("provider name is empty".to_string()));
            }
            // Same-named providers share persisted readings
            if !seen.insert(spec.name.as_str()) {
                warn!(provider = %spec.name, "Duplicate provider name in chain");
            }
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn failover_config(&self) -> FailoverConfig {
        FailoverConfig {
            connect_timeout: self.connect_timeout(),
        }
    }

    /// Configuration with a short connect timeout, for flaky service backends
    pub fn impatient_preset() -> Self {
        Self {
            connect_timeout_ms: Some(3_000),
            preset: Preset::Navigation,
            ..Default::default()
        }
    }

    /// Configuration that favours battery over freshness
    pub fn low_power_preset() -> Self {
        Self {
            preset: Preset::Lazy,
            pre_initialize: false,
            ..Default::default()
        }
    }
}
