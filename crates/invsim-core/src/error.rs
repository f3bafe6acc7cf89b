//! # Error Types
//!
//! Domain-specific error types for invsim-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  invsim-core errors (this file)                                        │
//! │  ├── CoreError        - Machine invariants, settings typing            │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  invsim-db errors (separate crate)                                     │
//! │  └── DbError          - Persistence failures                           │
//! │                                                                         │
//! │  invsim-agent errors (separate crate)                                  │
//! │  └── AgentError       - Protocol taxonomy (config, server, trust...)   │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError/AgentError → crash        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Domain errors raised while building or mutating a machine.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The machine has no identity (`bios`) component.
    #[error("Machine has no identity component")]
    MissingIdentity,

    /// The machine has more than one identity component.
    #[error("Machine has {count} identity components, expected exactly one")]
    DuplicateIdentity { count: usize },

    /// The identity component carries no usable serial.
    #[error("Identity component has no serial")]
    MissingSerial,

    /// A component record is not a JSON object.
    #[error("Component in module '{module}' is not an attribute map")]
    MalformedComponent { module: String },

    /// A typed settings field holds a value that cannot be converted.
    ///
    /// ## When This Occurs
    /// - `hbt` persisted as `"abc"`
    /// - `lastupdate` that is not a number
    #[error("Setting '{field}' cannot be read as {expected}: {value}")]
    InvalidSetting {
        field: String,
        expected: String,
        value: String,
    },

    /// File already exists in the virtual file store.
    #[error("File already exists: {0}")]
    FileExists(String),

    /// File does not exist in the virtual file store.
    #[error("File does not exist: {0}")]
    FileNotFound(String),

    /// Every identifier drawn was already taken.
    #[error("No free identifier of length {len} after {attempts} attempts")]
    IdentifiersExhausted { len: usize, attempts: usize },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Invalid format.
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
