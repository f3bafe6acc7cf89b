//! # Simulator Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     INVSIM_STORE, INVSIM_POOL, INVSIM_SYSTEM_COUNT, INVSIM_SETUP,      │
//! │     INVSIM_BOOTSTRAP, INVSIM_TICKRATE                                  │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     path given on the command line, or                                 │
//! │     ~/.config/invsim/simulator.toml (Linux)                            │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # simulator.toml
//! store = "computers"          # .computer files
//! pool = "component_pool"      # <pool>/<module type>/<component>.json
//! system_count = 5
//! setup = 1                    # 1 fresh | 2 top up | 3 load only
//! bootstrap = "invconfig.json" # copied to every new device as invconf
//! tickrate = 0.3               # seconds between ticks
//! report_interval_secs = 5
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{FleetError, FleetResult};

// =============================================================================
// Setup Mode
// =============================================================================

/// How the fleet is assembled at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SetupMode {
    /// Wipe the store and create `system_count` new devices.
    #[default]
    Fresh,
    /// Load up to `system_count` saved devices, create the rest.
    TopUp,
    /// Load every saved device, create none.
    LoadAll,
}

impl TryFrom<u8> for SetupMode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(SetupMode::Fresh),
            2 => Ok(SetupMode::TopUp),
            3 => Ok(SetupMode::LoadAll),
            other => Err(format!("setup must be 1, 2 or 3, got {other}")),
        }
    }
}

impl From<SetupMode> for u8 {
    fn from(mode: SetupMode) -> Self {
        match mode {
            SetupMode::Fresh => 1,
            SetupMode::TopUp => 2,
            SetupMode::LoadAll => 3,
        }
    }
}

impl fmt::Display for SetupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

// =============================================================================
// Simulator Config
// =============================================================================

fn default_store() -> PathBuf {
    PathBuf::from("computers")
}

fn default_pool() -> PathBuf {
    PathBuf::from("component_pool")
}

fn default_system_count() -> usize {
    5
}

fn default_bootstrap() -> PathBuf {
    PathBuf::from("invconfig.json")
}

fn default_tickrate() -> f64 {
    0.3
}

fn default_report_interval() -> u64 {
    5
}

/// Fleet configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    #[serde(default = "default_store")]
    pub store: PathBuf,

    #[serde(default = "default_pool")]
    pub pool: PathBuf,

    #[serde(default = "default_system_count")]
    pub system_count: usize,

    #[serde(default)]
    pub setup: SetupMode,

    /// Agent bootstrap configuration given to new devices.
    #[serde(default = "default_bootstrap")]
    pub bootstrap: PathBuf,

    /// Seconds slept after every tick.
    #[serde(default = "default_tickrate")]
    pub tickrate: f64,

    /// Seconds between status reports.
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            store: default_store(),
            pool: default_pool(),
            system_count: default_system_count(),
            setup: SetupMode::default(),
            bootstrap: default_bootstrap(),
            tickrate: default_tickrate(),
            report_interval_secs: default_report_interval(),
        }
    }
}

impl SimulatorConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> FleetResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading simulator config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = Self::from_toml(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> FleetResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> FleetResult<()> {
        if self.store.as_os_str().is_empty() {
            return Err(FleetError::InvalidConfig("store must not be empty".into()));
        }
        if self.pool.as_os_str().is_empty() {
            return Err(FleetError::InvalidConfig("pool must not be empty".into()));
        }
        if !self.tickrate.is_finite() || self.tickrate < 0.0 {
            return Err(FleetError::InvalidConfig(format!(
                "tickrate must be a non-negative number of seconds, got {}",
                self.tickrate
            )));
        }
        if self.report_interval_secs == 0 {
            return Err(FleetError::InvalidConfig(
                "report_interval_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Pause between two ticks of one device.
    pub fn tick_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.tickrate).unwrap_or_default()
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(store) = std::env::var("INVSIM_STORE") {
            debug!(store = %store, "Overriding store from environment");
            self.store = PathBuf::from(store);
        }

        if let Ok(pool) = std::env::var("INVSIM_POOL") {
            self.pool = PathBuf::from(pool);
        }

        if let Ok(count) = std::env::var("INVSIM_SYSTEM_COUNT") {
            match count.parse() {
                Ok(n) => self.system_count = n,
                Err(_) => warn!(value = %count, "Ignoring invalid INVSIM_SYSTEM_COUNT"),
            }
        }

        if let Ok(setup) = std::env::var("INVSIM_SETUP") {
            match setup.parse::<u8>().map_err(|e| e.to_string()).and_then(SetupMode::try_from) {
                Ok(mode) => self.setup = mode,
                Err(e) => warn!(value = %setup, error = %e, "Ignoring invalid INVSIM_SETUP"),
            }
        }

        if let Ok(bootstrap) = std::env::var("INVSIM_BOOTSTRAP") {
            self.bootstrap = PathBuf::from(bootstrap);
        }

        if let Ok(tickrate) = std::env::var("INVSIM_TICKRATE") {
            match tickrate.parse() {
                Ok(t) => self.tickrate = t,
                Err(_) => warn!(value = %tickrate, "Ignoring invalid INVSIM_TICKRATE"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "invsim", "invsim")
            .map(|dirs| dirs.config_dir().join("simulator.toml"))
    }
}
