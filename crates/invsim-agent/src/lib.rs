//! # invsim-agent: Inventory Agent for Simulated Devices
//!
//! The program every simulated device runs. It talks to the remote
//! inventory service and keeps a per-device SQLite datastore through the
//! `invsim-db` broker.
//!
//! ## Data Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Agent Data Flow                                  │
//! │                                                                         │
//! │   invconf ──► Settings ──► InventoryAgent ──► Transport ──► service     │
//! │                               │      ▲           │                      │
//! │                               │      └───────────┘ 200 / errors[]       │
//! │                               ▼                                         │
//! │                            Broker (config, modules, mod_<type>)         │
//! │                                                                         │
//! │   Every step also writes the device-local journal (logfile).            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`agent`] - Engine state machine and the [`invsim_core::Program`] impl
//! - [`registration`] - `init` with bounded re-registration
//! - [`inventory`] - Inventory capture and server id reconciliation
//! - [`transport`] - Envelope dispatch and scheme fallback
//! - [`protocol`] - Wire types
//! - [`config`] - Bootstrap configuration
//! - [`journal`] - Device-local log
//! - [`error`] - Error taxonomy

pub mod agent;
pub mod config;
pub mod error;
pub mod inventory;
pub mod journal;
pub mod protocol;
pub mod registration;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use agent::{
    AgentHandle, AgentPhase, AgentStatus, InventoryAgent, InventoryAgentBuilder, Ram, PROGRAM_NAME,
};
pub use error::{AgentError, AgentResult};
pub use protocol::{Action, ApiErrorEntry, ApiResponse, ConfigEntry, Envelope};
pub use registration::MAX_REGISTRATION_ATTEMPTS;
pub use transport::{Dispatch, HttpConfig, ReqwestDispatch, Scheme, Transport};
