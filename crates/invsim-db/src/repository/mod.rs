//! # Repository Module
//!
//! SQL for the local store, one repository per table family.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Broker (owns the single connection, opens/commits/closes)             │
//! │       │                                                                 │
//! │       │  ConfigRepository::new(&mut tx).dump(&settings, now)           │
//! │       ▼                                                                 │
//! │  ConfigRepository                 ModuleRepository                     │
//! │  ├── load()                       ├── ensure_table(module)             │
//! │  ├── dump(settings, now)          ├── capture(module, components, now) │
//! │  └── delete(keys)                 ├── assign_sid(module, cid, sid)     │
//! │                                   └── rows(module)                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite file  <serial>.db3                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Repositories borrow a connection (or a transaction deref'd to one) and
//! never commit on their own.

pub mod config;
pub mod module;

pub use config::ConfigRepository;
pub use module::{ModuleRepository, ModuleRow};
