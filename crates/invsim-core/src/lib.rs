//! # invsim-core: Pure Domain Model for the Inventory Simulator
//!
//! This crate describes a simulated computer and the contract for the
//! software installed on it. Everything here is deterministic data
//! manipulation with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Inventory Simulator Layers                         │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              invsim-fleet (device runtime, runners)             │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              invsim-agent (sync engine, transport)              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ invsim-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ settings  │  │  flatten  │  │  program  │  │   │
//! │  │   │  Machine  │  │  typing   │  │  dotted   │  │  Program  │  │   │
//! │  │   │ Component │  │  rules    │  │  paths    │  │  Liveness │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Machine, module types and component records
//! - [`files`] - Virtual per-device file store
//! - [`settings`] - Agent configuration map with strict field typing
//! - [`flatten`] - Nested attribute maps to dotted scalar properties
//! - [`ident`] - Random identifier generation
//! - [`program`] - Contract implemented by installed device software
//! - [`validation`] - Validation rules shared by all layers
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use invsim_core::flatten::flatten;
//! use serde_json::json;
//!
//! let attrs = json!({"vendor": "Intel", "cache": {"l2": 256}});
//! let flat = flatten(attrs.as_object().unwrap());
//!
//! assert_eq!(flat.get("cache.l2"), Some(&json!(256)));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod files;
pub mod flatten;
pub mod ident;
pub mod program;
pub mod settings;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use files::FileStore;
pub use program::{Liveness, Program};
pub use settings::{FieldType, Settings};
pub use types::{Component, Machine, ModuleType, Modules};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Module type holding the identity component of every machine.
pub const IDENTITY_MODULE: &str = "bios";

/// Attribute carrying the locally generated component identifier.
pub const CID_ATTRIBUTE: &str = "cid";

/// Attribute carrying the serial number of a component.
pub const SERIAL_ATTRIBUTE: &str = "serial";

/// Length of a generated component identifier.
pub const CID_LENGTH: usize = 3;

/// Length of a generated machine serial.
pub const SERIAL_LENGTH: usize = 6;
