//! # Config Repository
//!
//! `config(property PRIMARY KEY, value)` rows. Values are TEXT; typing is
//! applied by [`Settings::from_rows`] on every read.

use chrono::{DateTime, Utc};
use invsim_core::settings::keys;
use invsim_core::Settings;
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::DbResult;

/// Repository for the config table.
#[derive(Debug)]
pub struct ConfigRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> ConfigRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        ConfigRepository { conn }
    }

    /// Reads every row and applies field typing.
    pub async fn load(&mut self) -> DbResult<Settings> {
        let rows: Vec<(String, Option<String>)> =
            sqlx::query_as("SELECT property, value FROM config")
                .fetch_all(&mut *self.conn)
                .await?;

        let settings = Settings::from_rows(
            rows.into_iter()
                .filter_map(|(property, value)| value.map(|v| (property, v))),
        )?;

        Ok(settings)
    }

    /// Writes every setting (insert or replace) plus the `lastupdate` row.
    pub async fn dump(&mut self, settings: &Settings, now: DateTime<Utc>) -> DbResult<usize> {
        let rows = settings.to_rows();
        let mut written = 0;

        for (property, value) in rows.iter().filter(|(p, _)| p != keys::LASTUPDATE) {
            sqlx::query("INSERT OR REPLACE INTO config (property, value) VALUES (?1, ?2)")
                .bind(property)
                .bind(value)
                .execute(&mut *self.conn)
                .await?;
            written += 1;
        }

        let stamp = now.timestamp_millis() as f64 / 1000.0;
        sqlx::query("INSERT OR REPLACE INTO config (property, value) VALUES (?1, ?2)")
            .bind(keys::LASTUPDATE)
            .bind(stamp.to_string())
            .execute(&mut *self.conn)
            .await?;

        debug!(rows = written + 1, "Config dumped");
        Ok(written + 1)
    }

    /// Deletes the given properties. Missing ones are ignored.
    pub async fn delete(&mut self, properties: &[&str]) -> DbResult<u64> {
        let mut removed = 0;
        for property in properties {
            removed += sqlx::query("DELETE FROM config WHERE property = ?1")
                .bind(property)
                .execute(&mut *self.conn)
                .await?
                .rows_affected();
        }
        Ok(removed)
    }
}
