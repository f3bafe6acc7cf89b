//! # Persistence Broker
//!
//! One SQLite file per device, at most one open connection at a time.
//!
//! ## Connection Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Broker write path                                  │
//! │                                                                         │
//! │  Broker::new("<sqlstore>/<serial>.db3")   (nothing touches disk yet)   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  open()   ← idempotent, creates the file if missing                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  BEGIN ── repository calls ── COMMIT                                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  close()  ← always, success or failure                                 │
//! │                                                                         │
//! │  Any failure: connection is closed first, then the error propagates.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ownership
//! The broker owns its file exclusively. It is `!Sync` in practice (all
//! operations take `&mut self`), which matches one device task per broker.

use chrono::{DateTime, Utc};
use invsim_core::{ModuleType, Modules, Settings};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{ConnectOptions, Connection, SqliteConnection};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::{ConfigRepository, ModuleRepository, ModuleRow};

/// Extension of device datastore files.
pub const STORE_EXTENSION: &str = "db3";

/// Local persistence broker for one device.
#[derive(Debug)]
pub struct Broker {
    path: PathBuf,
    conn: Option<SqliteConnection>,
}

impl Broker {
    /// Creates a broker for `path`. Does not open or create the file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Broker {
            path: path.into(),
            conn: None,
        }
    }

    /// Broker for `<store_dir>/<serial>.db3`.
    pub fn for_device(store_dir: impl AsRef<Path>, serial: &str) -> Self {
        Self::new(
            store_dir
                .as_ref()
                .join(format!("{serial}.{STORE_EXTENSION}")),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if the datastore file exists on disk.
    ///
    /// Check this before the first `open()`, which creates the file.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Opens the connection if it is not open yet.
    pub async fn open(&mut self) -> DbResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        let conn = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Delete)
            .connect()
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        debug!(path = %self.path.display(), "Broker connection opened");
        self.conn = Some(conn);
        Ok(())
    }

    /// Closes the connection if open.
    pub async fn close(&mut self) -> DbResult<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().await?;
            debug!(path = %self.path.display(), "Broker connection closed");
        }
        Ok(())
    }

    async fn connection(&mut self) -> DbResult<&mut SqliteConnection> {
        self.open().await?;
        self.conn
            .as_mut()
            .ok_or_else(|| DbError::ConnectionFailed("connection not open".to_string()))
    }

    /// Closes the connection and hands back `result`.
    ///
    /// A close failure only surfaces when the operation itself succeeded.
    async fn finish<T>(&mut self, result: DbResult<T>) -> DbResult<T> {
        let closed = self.close().await;
        match (result, closed) {
            (Err(e), Err(close_err)) => {
                warn!(error = %close_err, "Close failed after error");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(_), Err(close_err)) => Err(close_err),
            (Ok(v), Ok(())) => Ok(v),
        }
    }

    /// Runs raw SQL. On failure the connection is closed before the error
    /// is returned; on success it stays open.
    pub async fn execute(&mut self, sql: &str) -> DbResult<u64> {
        let result: DbResult<u64> = async {
            let conn = self.connection().await?;
            let done = sqlx::raw_sql(sql).execute(conn).await?;
            Ok(done.rows_affected())
        }
        .await;

        if let Err(e) = &result {
            warn!(error = %e, "Statement failed, closing connection");
            if let Err(close_err) = self.close().await {
                warn!(error = %close_err, "Close failed after statement error");
            }
        }
        result
    }

    // =========================================================================
    // Schema
    // =========================================================================

    /// Creates the fixed schema (`config`, `modules`).
    pub async fn create_schema(&mut self) -> DbResult<()> {
        let result: DbResult<()> = async {
            let conn = self.connection().await?;
            migrations::run_migrations(conn).await
        }
        .await;

        if result.is_ok() {
            info!(path = %self.path.display(), "Local store created");
        }
        self.finish(result).await
    }

    /// True once the fixed schema is in place.
    ///
    /// A datastore file left empty or half written reports `false`, so the
    /// caller can create the schema again.
    pub async fn has_schema(&mut self) -> DbResult<bool> {
        if !self.exists() {
            return Ok(false);
        }

        let result: DbResult<bool> = async {
            let conn = self.connection().await?;
            let tables: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM sqlite_master
                 WHERE type = 'table' AND name IN ('config', 'modules')",
            )
            .fetch_one(&mut *conn)
            .await?;
            Ok(tables == 2)
        }
        .await;
        self.finish(result).await
    }

    /// Creates the property table for `module` once.
    pub async fn ensure_module_table(&mut self, module: &ModuleType) -> DbResult<bool> {
        let result: DbResult<bool> = async {
            let conn = self.connection().await?;
            let mut tx = conn.begin().await?;
            let created = ModuleRepository::new(&mut tx).ensure_table(module).await?;
            tx.commit().await?;
            Ok(created)
        }
        .await;
        self.finish(result).await
    }

    // =========================================================================
    // Config
    // =========================================================================

    /// Reads all config rows with field typing applied.
    pub async fn config(&mut self) -> DbResult<Settings> {
        let result: DbResult<Settings> = async {
            let conn = self.connection().await?;
            ConfigRepository::new(conn).load().await
        }
        .await;
        self.finish(result).await
    }

    /// Persists the whole settings map and stamps `lastupdate`.
    pub async fn dump_config(&mut self, settings: &Settings, now: DateTime<Utc>) -> DbResult<()> {
        let result: DbResult<()> = async {
            let conn = self.connection().await?;
            let mut tx = conn.begin().await?;
            ConfigRepository::new(&mut tx).dump(settings, now).await?;
            tx.commit().await?;
            Ok(())
        }
        .await;
        self.finish(result).await
    }

    /// Deletes config rows.
    pub async fn delete_config(&mut self, properties: &[&str]) -> DbResult<u64> {
        let result: DbResult<u64> = async {
            let conn = self.connection().await?;
            let mut tx = conn.begin().await?;
            let removed = ConfigRepository::new(&mut tx).delete(properties).await?;
            tx.commit().await?;
            Ok(removed)
        }
        .await;
        self.finish(result).await
    }

    // =========================================================================
    // Inventory
    // =========================================================================

    /// Stores the machine inventory, one transaction per module type.
    ///
    /// Already stored `(property, cid)` pairs are left untouched, so running
    /// this on every boot only adds what is new. Returns the number of new
    /// rows.
    pub async fn capture(&mut self, modules: &Modules, now: DateTime<Utc>) -> DbResult<u64> {
        let result: DbResult<u64> = async {
            let conn = self.connection().await?;
            let mut total = 0;

            for (module, components) in modules {
                let mut tx = conn.begin().await?;
                let mut repo = ModuleRepository::new(&mut tx);
                repo.ensure_table(module).await?;
                let inserted = repo.capture(module, components, now).await?;
                tx.commit().await?;

                debug!(module = %module, inserted, "Module captured");
                total += inserted;
            }

            Ok(total)
        }
        .await;
        self.finish(result).await
    }

    /// Writes the server id of one component.
    pub async fn assign_sid(
        &mut self,
        module: &ModuleType,
        cid: &str,
        sid: &str,
        now: DateTime<Utc>,
    ) -> DbResult<u64> {
        let result: DbResult<u64> = async {
            let conn = self.connection().await?;
            let mut tx = conn.begin().await?;
            let touched = ModuleRepository::new(&mut tx)
                .assign_sid(module, cid, sid, now)
                .await?;
            tx.commit().await?;
            Ok(touched)
        }
        .await;
        self.finish(result).await
    }

    /// Rows of one module table.
    pub async fn module_rows(&mut self, module: &ModuleType) -> DbResult<Vec<ModuleRow>> {
        let result: DbResult<Vec<ModuleRow>> = async {
            let conn = self.connection().await?;
            ModuleRepository::new(conn).rows(module).await
        }
        .await;
        self.finish(result).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use invsim_core::Component;
    use serde_json::json;
    use tempfile::TempDir;

    fn modules() -> Modules {
        let mut modules = Modules::new();
        let mut cpu = Component::new(
            json!({"model": "i7", "cache": {"l2": 256}})
                .as_object()
                .cloned()
                .unwrap(),
        );
        cpu.set_cid("C01");
        modules.insert(ModuleType::new("cpu").unwrap(), vec![cpu]);
        modules
    }

    async fn fresh() -> (TempDir, Broker) {
        let dir = TempDir::new().unwrap();
        let mut broker = Broker::for_device(dir.path(), "ABC123");
        broker.create_schema().await.unwrap();
        (dir, broker)
    }

    #[tokio::test]
    async fn test_exists_only_after_open() {
        let dir = TempDir::new().unwrap();
        let mut broker = Broker::for_device(dir.path(), "ABC123");

        assert!(!broker.exists());
        broker.open().await.unwrap();
        broker.open().await.unwrap();
        assert!(broker.exists());
        assert!(broker.is_open());

        broker.close().await.unwrap();
        assert!(!broker.is_open());
        assert!(broker.path().ends_with("ABC123.db3"));
    }

    #[tokio::test]
    async fn test_has_schema() {
        let dir = TempDir::new().unwrap();
        let mut broker = Broker::for_device(dir.path(), "ABC123");
        assert!(!broker.has_schema().await.unwrap());
        assert!(!broker.exists());

        std::fs::write(broker.path(), b"").unwrap();
        assert!(!broker.has_schema().await.unwrap());
        assert!(!broker.is_open());

        broker.create_schema().await.unwrap();
        assert!(broker.has_schema().await.unwrap());

        // schema creation is idempotent
        broker.create_schema().await.unwrap();
        assert!(broker.has_schema().await.unwrap());
    }

    fn require_send<F: std::future::Future + Send>(future: F) -> F {
        future
    }

    #[tokio::test]
    async fn test_schema_futures_are_send() {
        let dir = TempDir::new().unwrap();
        let mut broker = Broker::for_device(dir.path(), "ABC123");

        require_send(broker.create_schema()).await.unwrap();
        assert!(require_send(broker.has_schema()).await.unwrap());
    }

    #[tokio::test]
    async fn test_write_paths_close_connection() {
        let (_dir, mut broker) = fresh().await;
        assert!(!broker.is_open());

        broker.dump_config(&Settings::new(), Utc::now()).await.unwrap();
        assert!(!broker.is_open());
    }

    #[tokio::test]
    async fn test_execute_failure_closes_connection() {
        let (_dir, mut broker) = fresh().await;

        broker.execute("SELECT 1").await.unwrap();
        assert!(broker.is_open());

        assert!(broker.execute("NOT VALID SQL").await.is_err());
        assert!(!broker.is_open());
    }

    #[tokio::test]
    async fn test_config_round_trip_typed() {
        let (_dir, mut broker) = fresh().await;

        let mut settings = Settings::new();
        settings.set("hbt", json!(30));
        settings.set("forceHTTPS", json!(false));
        settings.set("api", json!("inv.example.com"));
        broker.dump_config(&settings, Utc::now()).await.unwrap();

        let loaded = broker.config().await.unwrap();
        assert_eq!(loaded.hbt(), Some(30));
        assert!(!loaded.force_https());
        assert_eq!(loaded.api(), Some("inv.example.com"));
        assert!(loaded.lastupdate().is_some());
    }

    #[tokio::test]
    async fn test_config_bad_type_is_error() {
        let (_dir, mut broker) = fresh().await;
        broker
            .execute("INSERT INTO config (property, value) VALUES ('hbt', 'later')")
            .await
            .unwrap();
        broker.close().await.unwrap();

        let err = broker.config().await.unwrap_err();
        assert!(matches!(err, DbError::InvalidData(_)));
        assert!(!broker.is_open());
    }

    #[tokio::test]
    async fn test_delete_config() {
        let (_dir, mut broker) = fresh().await;

        let mut settings = Settings::new();
        settings.set("client_id", json!("X"));
        settings.set("apikey", json!("K"));
        settings.set("hbt", json!(30));
        broker.dump_config(&settings, Utc::now()).await.unwrap();

        let removed = broker.delete_config(&["client_id", "apikey"]).await.unwrap();
        assert_eq!(removed, 2);

        let loaded = broker.config().await.unwrap();
        assert!(loaded.client_id().is_none());
        assert_eq!(loaded.hbt(), Some(30));
    }

    #[tokio::test]
    async fn test_module_table_created_once() {
        let (_dir, mut broker) = fresh().await;
        let cpu = ModuleType::new("cpu").unwrap();

        assert!(broker.ensure_module_table(&cpu).await.unwrap());
        assert!(!broker.ensure_module_table(&cpu).await.unwrap());
        assert!(broker.module_rows(&cpu).await.unwrap().is_empty());

        let gpu = ModuleType::new("gpu").unwrap();
        assert!(broker.module_rows(&gpu).await.is_err());
    }

    #[tokio::test]
    async fn test_capture_is_additive() {
        let (_dir, mut broker) = fresh().await;
        let cpu = ModuleType::new("cpu").unwrap();

        let inserted = broker.capture(&modules(), Utc::now()).await.unwrap();
        assert_eq!(inserted, 2);

        let again = broker.capture(&modules(), Utc::now()).await.unwrap();
        assert_eq!(again, 0);

        let rows = broker.module_rows(&cpu).await.unwrap();
        let props: Vec<&str> = rows.iter().map(|r| r.property.as_str()).collect();
        assert_eq!(props, vec!["cache.l2", "model"]);
        assert!(rows.iter().all(|r| r.cid == "C01" && r.sid.is_none()));
    }

    #[tokio::test]
    async fn test_assign_sid() {
        let (_dir, mut broker) = fresh().await;
        let cpu = ModuleType::new("cpu").unwrap();
        broker.capture(&modules(), Utc::now()).await.unwrap();

        let touched = broker.assign_sid(&cpu, "C01", "S-9", Utc::now()).await.unwrap();
        assert_eq!(touched, 2);

        let rows = broker.module_rows(&cpu).await.unwrap();
        assert!(rows
            .iter()
            .all(|r| r.sid.as_deref() == Some("S-9") && r.sync_date.is_some()));

        let gpu = ModuleType::new("gpu").unwrap();
        let err = broker.assign_sid(&gpu, "G01", "S-1", Utc::now()).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }
}
