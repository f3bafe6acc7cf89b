//! # Fleet Error Types
//!
//! Errors of the device runtime and the fleet manager. Program failures
//! are not errors here: a crashed program is evicted from its device and
//! the fleet keeps running. Only process-fatal failures surface.

use invsim_agent::AgentError;
use invsim_core::CoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for fleet operations.
pub type FleetResult<T> = Result<T, FleetError>;

/// Fleet error type.
#[derive(Debug, Error)]
pub enum FleetError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid simulator configuration.
    #[error("Invalid simulator configuration: {0}")]
    InvalidConfig(String),

    /// Failed to parse the TOML configuration file.
    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // =========================================================================
    // Machine Errors
    // =========================================================================
    /// Component pool is unusable.
    #[error("Component pool error at {path}: {reason}")]
    Pool { path: PathBuf, reason: String },

    /// A machine could not be built or loaded.
    #[error("Invalid machine: {0}")]
    Machine(#[from] CoreError),

    /// Nothing to simulate.
    #[error("No systems loaded or created to simulate")]
    NoSystems,

    // =========================================================================
    // Runtime Errors
    // =========================================================================
    /// Program construction failed.
    #[error("Program error: {0}")]
    Program(#[from] AgentError),

    /// A device hit a failure that stops the whole process.
    #[error("Fatal failure on device {serial}: {message}")]
    ProcessFatal { serial: String, message: String },

    // =========================================================================
    // I/O
    // =========================================================================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FleetError {
    /// Returns true if the binary must exit with a failure status.
    pub fn is_process_fatal(&self) -> bool {
        matches!(self, FleetError::ProcessFatal { .. })
    }

    pub(crate) fn pool(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        FleetError::Pool {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
