//! # Bootstrap Configuration
//!
//! The agent reads its first configuration from the `invconf` file of the
//! device file store.
//!
//! ## Example `invconf`
//! ```json
//! {
//!     "api": "inventory.example.com",
//!     "keypub": "PUBLIC-KEY",
//!     "hbt": 30,
//!     "backoff": 2,
//!     "forceHTTPS": false,
//!     "sqlstore": "/var/lib/invsim/db",
//!     "logfile": "invsys.log",
//!     "loglevel": 3
//! }
//! ```
//!
//! ## Rules
//! - `api` is a bare host; the transport owns the scheme
//! - `sqlstore` is required (datastore directory)
//! - `hbt`, `backoff`, `loglevel` get defaults when absent

use invsim_core::files::BOOTSTRAP_FILE;
use invsim_core::settings::keys;
use invsim_core::validation::validate_api_host;
use invsim_core::{FileStore, Settings};
use serde_json::{json, Value};

use crate::error::{AgentError, AgentResult};
use crate::journal::DEFAULT_LOGLEVEL;

/// Heartbeat interval used when none is configured, in seconds.
pub const DEFAULT_HEARTBEAT_SECS: i64 = 60;

/// Base re-registration delay used when none is configured, in seconds.
pub const DEFAULT_BACKOFF_SECS: i64 = 1;

/// Reads and validates the bootstrap file.
pub fn load_bootstrap(files: &FileStore) -> AgentResult<Settings> {
    let text = files.get(BOOTSTRAP_FILE).ok_or_else(|| {
        AgentError::Configuration(format!("bootstrap file '{BOOTSTRAP_FILE}' is missing"))
    })?;
    parse_bootstrap(text)
}

/// Parses bootstrap JSON into typed settings.
pub fn parse_bootstrap(text: &str) -> AgentResult<Settings> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(map) = value else {
        return Err(AgentError::Configuration(
            "bootstrap configuration must be a JSON object".to_string(),
        ));
    };

    let mut settings = Settings::from_json(map)?;

    let api = settings
        .api()
        .ok_or_else(|| AgentError::Configuration("'api' is required".to_string()))?;
    validate_api_host(api).map_err(|e| AgentError::Configuration(e.to_string()))?;

    if settings.sqlstore().filter(|s| !s.is_empty()).is_none() {
        return Err(AgentError::Configuration("'sqlstore' is required".to_string()));
    }

    if settings.hbt().is_none() {
        settings.set(keys::HBT, json!(DEFAULT_HEARTBEAT_SECS));
    }
    if settings.backoff().is_none() {
        settings.set(keys::BACKOFF, json!(DEFAULT_BACKOFF_SECS));
    }
    if settings.loglevel().is_none() {
        settings.set(keys::LOGLEVEL, json!(DEFAULT_LOGLEVEL));
    }

    Ok(settings)
}
