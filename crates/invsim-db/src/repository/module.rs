//! # Module Repository
//!
//! One property table per module type, registered in `modules`.
//!
//! ## Table Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  "mod_<type>"                                                          │
//! │  ───────────────────────────────────────────────────────────────────── │
//! │  property    TEXT  ┐ primary key                                       │
//! │  cid         TEXT  ┘                                                   │
//! │  sid         TEXT  ← set by reconciliation                             │
//! │  value       TEXT                                                      │
//! │  updated_at  TEXT                                                      │
//! │  sync_date   TEXT  ← set by reconciliation                             │
//! │  sync_key    TEXT                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Table Names
//! Table names cannot be bound as parameters. They are built only from
//! [`ModuleType`] values, which are validated against `[a-z][a-z0-9_]*` at
//! construction, and carry a `mod_` prefix so no module type can shadow
//! `config` or `modules`. Every value goes through a bind.

use chrono::{DateTime, Utc};
use invsim_core::flatten::{flatten, value_to_text};
use invsim_core::{Component, ModuleType, CID_ATTRIBUTE};
use sqlx::{FromRow, SqliteConnection};
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};

/// Prefix of every module property table.
pub const TABLE_PREFIX: &str = "mod_";

/// Quoted table name for a module type.
pub fn table_name(module: &ModuleType) -> String {
    format!("\"{TABLE_PREFIX}{}\"", module.as_str())
}

/// One stored property of one component.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ModuleRow {
    pub property: String,
    pub cid: String,
    pub sid: Option<String>,
    pub value: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub sync_date: Option<DateTime<Utc>>,
    pub sync_key: Option<String>,
}

/// Repository for module registry and property tables.
#[derive(Debug)]
pub struct ModuleRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> ModuleRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        ModuleRepository { conn }
    }

    /// True if the module type is in the registry.
    pub async fn is_registered(&mut self, module: &ModuleType) -> DbResult<bool> {
        let found: Option<String> = sqlx::query_scalar("SELECT module FROM modules WHERE module = ?1")
            .bind(module.as_str())
            .fetch_optional(&mut *self.conn)
            .await?;
        Ok(found.is_some())
    }

    /// Creates the property table for `module` unless the registry already
    /// lists it. Returns `true` if the table was created.
    pub async fn ensure_table(&mut self, module: &ModuleType) -> DbResult<bool> {
        if self.is_registered(module).await? {
            return Ok(false);
        }

        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                property   TEXT NOT NULL,
                cid        TEXT NOT NULL,
                sid        TEXT,
                value      TEXT,
                updated_at TEXT,
                sync_date  TEXT,
                sync_key   TEXT,
                PRIMARY KEY (property, cid)
            )",
            table_name(module)
        );
        sqlx::query(&ddl).execute(&mut *self.conn).await?;

        sqlx::query("INSERT INTO modules (module) VALUES (?1)")
            .bind(module.as_str())
            .execute(&mut *self.conn)
            .await?;

        debug!(module = %module, "Module table created");
        Ok(true)
    }

    /// Inserts the flattened properties of each component that are not yet
    /// stored for its cid. The `cid` attribute itself is not a property.
    ///
    /// Returns the number of new rows.
    pub async fn capture(
        &mut self,
        module: &ModuleType,
        components: &[Component],
        now: DateTime<Utc>,
    ) -> DbResult<u64> {
        let sql = format!(
            "INSERT OR IGNORE INTO {} (property, cid, value, updated_at) VALUES (?1, ?2, ?3, ?4)",
            table_name(module)
        );

        let mut inserted = 0;
        for component in components {
            let Some(cid) = component.cid() else {
                warn!(module = %module, "Component without cid skipped");
                continue;
            };

            for (property, value) in flatten(component.attributes()) {
                if property == CID_ATTRIBUTE {
                    continue;
                }
                inserted += sqlx::query(&sql)
                    .bind(&property)
                    .bind(cid)
                    .bind(value_to_text(&value))
                    .bind(now)
                    .execute(&mut *self.conn)
                    .await?
                    .rows_affected();
            }
        }

        Ok(inserted)
    }

    /// Writes the server-assigned sid on every row of `cid` and stamps
    /// `sync_date`. Returns the number of rows touched.
    pub async fn assign_sid(
        &mut self,
        module: &ModuleType,
        cid: &str,
        sid: &str,
        now: DateTime<Utc>,
    ) -> DbResult<u64> {
        if !self.is_registered(module).await? {
            return Err(DbError::not_found("module table", module.as_str()));
        }

        let sql = format!(
            "UPDATE {} SET sid = ?1, sync_date = ?2 WHERE cid = ?3",
            table_name(module)
        );
        let result = sqlx::query(&sql)
            .bind(sid)
            .bind(now)
            .bind(cid)
            .execute(&mut *self.conn)
            .await?;

        Ok(result.rows_affected())
    }

    /// All rows of a module table ordered by cid then property.
    pub async fn rows(&mut self, module: &ModuleType) -> DbResult<Vec<ModuleRow>> {
        if !self.is_registered(module).await? {
            return Err(DbError::not_found("module table", module.as_str()));
        }

        let sql = format!(
            "SELECT property, cid, sid, value, updated_at, sync_date, sync_key
             FROM {} ORDER BY cid, property",
            table_name(module)
        );
        let rows = sqlx::query_as::<_, ModuleRow>(&sql)
            .fetch_all(&mut *self.conn)
            .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_is_prefixed_and_quoted() {
        let module = ModuleType::new("cpu").unwrap();
        assert_eq!(table_name(&module), "\"mod_cpu\"");

        let config_like = ModuleType::new("config").unwrap();
        assert_eq!(table_name(&config_like), "\"mod_config\"");
    }
}
