//! # invsim-db: Local Persistence Broker
//!
//! Embedded SQLite store for one simulated device.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          invsim-db                                      │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  Broker                                                         │   │
//! │  │  ├── one SqliteConnection at a time (open/close per operation)  │   │
//! │  │  ├── create_schema()  → embedded migration                      │   │
//! │  │  └── config / dump_config / capture / assign_sid ...            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                              │                                          │
//! │  ┌───────────────────────────▼─────────────────────────────────────┐   │
//! │  │  Repositories                                                   │   │
//! │  │  ├── ConfigRepository  (config table)                           │   │
//! │  │  └── ModuleRepository  (modules registry + mod_<type> tables)   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                              │                                          │
//! │                              ▼                                          │
//! │                   <sqlstore>/<serial>.db3                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! use invsim_db::Broker;
//!
//! let mut broker = Broker::for_device("/var/lib/invsim", "ABC123");
//! if !broker.exists() {
//!     broker.create_schema().await?;
//! }
//! let settings = broker.config().await?;
//! ```

pub mod broker;
pub mod error;
pub mod migrations;
pub mod repository;

pub use broker::{Broker, STORE_EXTENSION};
pub use error::{DbError, DbResult};
pub use repository::ModuleRow;
