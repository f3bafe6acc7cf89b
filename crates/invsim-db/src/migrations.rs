//! # Schema Migrations
//!
//! The fixed part of the local store (`config`, `modules`) is an embedded
//! migration. Module property tables are dynamic and live in
//! [`crate::repository::module`].
//!
//! ## How Schema Creation Works
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Broker::create_schema()                                               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Check _sqlx_migrations table ── missing? create it                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  0001_local_store.sql  (config, modules)                               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Record in _sqlx_migrations                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Running it twice is a no-op.

use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::DbResult;

/// Embedded migrations from the crate's `migrations` directory.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Runs all pending migrations on an open connection.
pub async fn run_migrations(conn: &mut SqliteConnection) -> DbResult<()> {
    debug!("Applying local store migrations");
    MIGRATOR.run_direct(conn).await?;
    Ok(())
}
