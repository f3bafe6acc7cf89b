//! # Validation Module
//!
//! Input validation shared by every layer of the simulator.
//!
//! ## Where Validation Happens
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Points                                  │
//! │                                                                         │
//! │  Pool loader / .computer files                                         │
//! │  └── validate_module_type  (directory and map keys)                    │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Agent start (invconf)                                                 │
//! │  └── validate_api_host     (bare host, no scheme)                      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Broker (SQLite)                                                       │
//! │  └── module table names come ONLY from validated ModuleType values     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use invsim_core::validation::{validate_api_host, validate_module_type};
//!
//! assert!(validate_module_type("cpu").is_ok());
//! assert!(validate_module_type("cpu; DROP TABLE config").is_err());
//! assert!(validate_api_host("inventory.example.com").is_ok());
//! assert!(validate_api_host("https://inventory.example.com").is_err());
//! ```

use crate::error::ValidationError;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest accepted module type name.
pub const MAX_MODULE_TYPE_LEN: usize = 64;

// =============================================================================
// Module Types
// =============================================================================

/// Validates a module type name.
///
/// Module type names end up as SQLite table names, so the allow-list is
/// strict.
///
/// ## Rules
/// - Must not be empty
/// - At most 64 characters
/// - First character is a lowercase ASCII letter
/// - Remaining characters are lowercase ASCII letters, digits or `_`
pub fn validate_module_type(name: &str) -> ValidationResult<()> {
    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "module type".to_string(),
        });
    }

    if name.len() > MAX_MODULE_TYPE_LEN {
        return Err(ValidationError::TooLong {
            field: "module type".to_string(),
            max: MAX_MODULE_TYPE_LEN,
        });
    }

    let mut chars = name.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_lowercase());
    let rest_ok = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if !first_ok || !rest_ok {
        return Err(ValidationError::InvalidFormat {
            field: "module type".to_string(),
            reason: "must match [a-z][a-z0-9_]*".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Endpoint
// =============================================================================

/// Validates the `api` endpoint from the bootstrap configuration.
///
/// The endpoint is a bare host (optionally with port and path prefix). The
/// transport picks the scheme, so a value carrying one is rejected.
pub fn validate_api_host(api: &str) -> ValidationResult<()> {
    let api = api.trim();

    if api.is_empty() {
        return Err(ValidationError::Required {
            field: "api".to_string(),
        });
    }

    if api.contains("://") {
        return Err(ValidationError::InvalidFormat {
            field: "api".to_string(),
            reason: "must be a bare host without a scheme".to_string(),
        });
    }

    if api.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidFormat {
            field: "api".to_string(),
            reason: "must not contain whitespace".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Serials
// =============================================================================

/// Validates a machine serial.
///
/// Serials name the per-device datastore and machine files, so only ASCII
/// alphanumerics are accepted.
pub fn validate_serial(serial: &str) -> ValidationResult<()> {
    if serial.is_empty() {
        return Err(ValidationError::Required {
            field: "serial".to_string(),
        });
    }

    if !serial.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ValidationError::InvalidFormat {
            field: "serial".to_string(),
            reason: "must contain only ASCII letters and digits".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
