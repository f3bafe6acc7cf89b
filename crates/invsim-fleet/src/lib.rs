//! # invsim-fleet: Device Runtime and Fleet Manager
//!
//! Runs a fleet of simulated computers, each with the inventory agent
//! installed, one tokio task per device.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Inventory Simulator Layers                         │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │               ★ invsim-fleet (THIS CRATE) ★                     │   │
//! │  │   FleetManager → run_device → Device → Program                  │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              invsim-agent (sync engine, transport)              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │     invsim-core (domain)    │    invsim-db (local datastore)    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`device`] - Device lifecycle, status and program eviction
//! - [`runner`] - Per-device task loop with stop signal
//! - [`manager`] - Pool loader, `.computer` files, fleet run
//! - [`config`] - Simulator configuration (TOML + environment)
//! - [`error`] - Fleet errors

pub mod config;
pub mod device;
pub mod error;
pub mod manager;
pub mod runner;

pub use config::{SetupMode, SimulatorConfig};
pub use device::{Device, DeviceHandle, DeviceStatus};
pub use error::{FleetError, FleetResult};
pub use manager::{FleetManager, FleetReport, ProgramFactory};
pub use runner::{run_device, RunOutcome, RunReport};
