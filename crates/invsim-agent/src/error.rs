//! # Agent Error Types
//!
//! Error taxonomy of the inventory agent.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Agent Error Categories                            │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │  Connectivity   │  │  Server                 │ │
//! │  │  bad invconf    │  │  404, no route  │  │  5xx                    │ │
//! │  │  → program dies │  │  → fallback,    │  │  → program dies         │ │
//! │  │                 │  │    then fails   │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Application    │  │ TransportTrust  │  │  Persistence            │ │
//! │  │  0x0003 retry   │  │  bad cert       │  │  broker failure         │ │
//! │  │  others fatal   │  │  → PROCESS dies │  │  → program dies         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use invsim_core::CoreError;
use invsim_db::DbError;
use thiserror::Error;

use crate::protocol::{ApiErrorEntry, ApiResponse};

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Agent error type.
#[derive(Debug, Error)]
pub enum AgentError {
    // =========================================================================
    // Local
    // =========================================================================
    /// Malformed bootstrap configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Local datastore failure. The broker has already closed its connection.
    #[error("Persistence error: {0}")]
    Persistence(#[from] DbError),

    // =========================================================================
    // Transport
    // =========================================================================
    /// The service could not be reached, or answered 404.
    #[error("Could not connect to API: {message}")]
    Connectivity {
        status: Option<u16>,
        message: String,
    },

    /// The service's certificate failed validation.
    #[error("API does not have a valid TLS certificate: {0}")]
    TransportTrust(String),

    // =========================================================================
    // Remote
    // =========================================================================
    /// The service answered with a 5xx status.
    #[error("Server error {status}: {body}")]
    Server { status: u16, body: String },

    /// The service answered with a structured error code.
    #[error("Application error {}", .0.first().map(ToString::to_string).unwrap_or_default())]
    Application(Vec<ApiErrorEntry>),

    /// Non-200 answer that carries no structured error.
    #[error("Request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// A 200 answer missing a field the protocol requires.
    #[error("Malformed response: {0}")]
    Protocol(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for AgentError {
    fn from(err: CoreError) -> Self {
        AgentError::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Configuration(err.to_string())
    }
}

impl From<url::ParseError> for AgentError {
    fn from(err: url::ParseError) -> Self {
        AgentError::Configuration(format!("invalid API endpoint: {err}"))
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl AgentError {
    /// Returns true if this error must stop the whole process, not only the
    /// program that hit it.
    pub fn is_process_fatal(&self) -> bool {
        matches!(self, AgentError::TransportTrust(_))
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(self, AgentError::Configuration(_))
    }

    /// Classifies a non-200 response.
    ///
    /// ```text
    /// 404            → Connectivity
    /// 5xx            → Server
    /// errors[...]    → Application
    /// anything else  → Rejected
    /// ```
    pub fn from_response(response: &ApiResponse) -> Self {
        if response.status == 404 {
            return AgentError::Connectivity {
                status: Some(404),
                message: response.body.to_string(),
            };
        }
        if response.is_server_error() {
            return AgentError::Server {
                status: response.status,
                body: response.body.to_string(),
            };
        }
        let entries = response.errors();
        if entries.is_empty() {
            AgentError::Rejected {
                status: response.status,
                body: response.body.to_string(),
            }
        } else {
            AgentError::Application(entries)
        }
    }

    /// Structured error entries carried by this error, if any.
    pub fn entries(&self) -> &[ApiErrorEntry] {
        match self {
            AgentError::Application(entries) => entries,
            _ => &[],
        }
    }
}
