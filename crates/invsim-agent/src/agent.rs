//! # Inventory Agent
//!
//! The program installed on every simulated device. It registers the
//! device with the inventory service, keeps its local datastore in step
//! and sends periodic heartbeats.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Agent Lifecycle                                  │
//! │                                                                         │
//! │   Uninitialized ──start()──► Bootstrapping   invconf, journal, broker   │
//! │                                   │                                     │
//! │                                   ▼                                     │
//! │                              Registering     capture + init             │
//! │                                   │                                     │
//! │                                   ▼                                     │
//! │                              Registered      post → sid reconcile       │
//! │                                   │                                     │
//! │                                   ▼                                     │
//! │                              SteadySync ◄──┐ tick(): heartbeat when     │
//! │                                   │        │ now >= last_hb + hbt       │
//! │                                   └────────┘                            │
//! │                                                                         │
//! │   Any error ──► Crashed   (journal FATAL, broker closed)                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Observing an Agent
//! The agent is owned by its device. Observers use an [`AgentHandle`],
//! which reads a status snapshot published after every transition.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use invsim_core::settings::keys;
use invsim_core::{Liveness, Machine, Program, Settings};
use invsim_db::Broker;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{load_bootstrap, DEFAULT_HEARTBEAT_SECS};
use crate::error::{AgentError, AgentResult};
use crate::journal::{Journal, Level};
use crate::protocol::{ApiResponse, ConfigEntry};
use crate::transport::{Dispatch, HttpConfig, ReqwestDispatch, Scheme, Transport};

/// Name the agent registers under on a device.
pub const PROGRAM_NAME: &str = "InventoryAgent";

// =============================================================================
// Status
// =============================================================================

/// Engine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentPhase {
    #[default]
    Uninitialized,
    Bootstrapping,
    Registering,
    Registered,
    SteadySync,
    Crashed,
}

impl fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentPhase::Uninitialized => "uninitialized",
            AgentPhase::Bootstrapping => "bootstrapping",
            AgentPhase::Registering => "registering",
            AgentPhase::Registered => "registered",
            AgentPhase::SteadySync => "steady-sync",
            AgentPhase::Crashed => "crashed",
        };
        f.write_str(name)
    }
}

/// Snapshot published for observers.
#[derive(Debug, Clone, Default)]
pub struct AgentStatus {
    pub phase: AgentPhase,
    pub client_id: Option<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub heartbeats: u64,
    pub last_error: Option<String>,
}

/// Volatile runtime state. Lost on restart.
#[derive(Debug, Clone, Default)]
pub struct Ram {
    pub last_hb: Option<DateTime<Utc>>,
    pub heartbeats: u64,
}

/// Read-only view of a running agent.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    status: Arc<RwLock<AgentStatus>>,
}

impl AgentHandle {
    pub async fn status(&self) -> AgentStatus {
        self.status.read().await.clone()
    }
}

// =============================================================================
// Agent
// =============================================================================

/// The synchronization engine.
pub struct InventoryAgent {
    pub(crate) transport: Transport,
    pub(crate) config: Settings,
    pub(crate) ram: Ram,
    pub(crate) broker: Option<Broker>,
    pub(crate) journal: Journal,
    pub(crate) serial: String,
    started: bool,
    initialized: bool,
    phase: AgentPhase,
    status: Arc<RwLock<AgentStatus>>,
}

impl fmt::Debug for InventoryAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InventoryAgent")
            .field("serial", &self.serial)
            .field("phase", &self.phase)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

impl InventoryAgent {
    pub fn new(transport: Transport) -> Self {
        InventoryAgent {
            transport,
            config: Settings::new(),
            ram: Ram::default(),
            broker: None,
            journal: Journal::detached(""),
            serial: String::new(),
            started: false,
            initialized: false,
            phase: AgentPhase::Uninitialized,
            status: Arc::new(RwLock::new(AgentStatus::default())),
        }
    }

    pub fn builder() -> InventoryAgentBuilder {
        InventoryAgentBuilder::new()
    }

    pub fn handle(&self) -> AgentHandle {
        AgentHandle {
            status: Arc::clone(&self.status),
        }
    }

    pub fn config(&self) -> &Settings {
        &self.config
    }

    pub fn ram(&self) -> &Ram {
        &self.ram
    }

    pub fn phase(&self) -> AgentPhase {
        self.phase
    }

    pub fn scheme(&self) -> Scheme {
        self.transport.scheme()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    // =========================================================================
    // Boot
    // =========================================================================

    /// Loads `invconf`, opens the journal and prepares the broker, then
    /// initializes.
    async fn bootstrap(&mut self, machine: &mut Machine, now: DateTime<Utc>) -> AgentResult<()> {
        self.serial = machine.serial().to_string();
        self.journal = Journal::detached(self.serial.clone());
        self.set_phase(AgentPhase::Bootstrapping).await;

        let mut config = load_bootstrap(machine.files())?;
        config.set(keys::LASTUPDATE, json!(0.0));

        self.journal = Journal::open(self.serial.clone(), &config, machine.files_mut());

        let store_dir = config
            .sqlstore()
            .ok_or_else(|| AgentError::Configuration("'sqlstore' is required".to_string()))?
            .to_string();
        tokio::fs::create_dir_all(&store_dir).await.map_err(|e| {
            AgentError::Configuration(format!("cannot create datastore directory {store_dir}: {e}"))
        })?;

        self.broker = Some(Broker::for_device(&store_dir, &self.serial));
        self.config = config;
        self.started = true;
        info!(serial = %self.serial, api = ?self.config.api(), "Agent started");

        self.initialize(machine, now).await
    }

    /// Brings the agent to steady sync. Calling it again once initialized
    /// does nothing.
    pub async fn initialize(&mut self, machine: &mut Machine, now: DateTime<Utc>) -> AgentResult<()> {
        if self.initialized {
            return Ok(());
        }
        if !self.started {
            return Err(not_started());
        }
        self.log(machine, Level::Notice, "Initializing");

        if !broker(&mut self.broker)?.has_schema().await? {
            self.log(machine, Level::Info, "Creating local datastore");
            broker(&mut self.broker)?.create_schema().await?;
            self.update_config(machine, None, now).await?;
        }

        self.load_local_config().await?;

        self.set_phase(AgentPhase::Registering).await;
        self.capture_inventory(machine, now).await?;
        self.initialized = true;
        self.set_phase(AgentPhase::Registered).await;

        self.reconcile(machine, now).await?;

        self.ram.last_hb = Some(now);
        self.set_phase(AgentPhase::SteadySync).await;
        self.log(machine, Level::Notice, "Initialized");
        Ok(())
    }

    /// Stored rows win over the bootstrap values.
    async fn load_local_config(&mut self) -> AgentResult<()> {
        let stored = broker(&mut self.broker)?.config().await?;
        for (property, value) in stored.iter() {
            self.config.set(property.clone(), value.clone());
        }
        self.config.apply_field_types()?;
        debug!(serial = %self.serial, rows = stored.len(), "Local configuration loaded");
        Ok(())
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Merges `{attribute, value}` rows into the config and persists it.
    ///
    /// Without rows, the remote configuration is fetched first.
    pub async fn update_config(
        &mut self,
        machine: &mut Machine,
        rows: Option<Vec<ConfigEntry>>,
        now: DateTime<Utc>,
    ) -> AgentResult<()> {
        let rows = match rows {
            Some(rows) => rows,
            None => self.fetch_remote_config(machine).await?,
        };

        self.log(machine, Level::Info, "Updating configuration");
        for row in rows {
            self.config.set(row.attribute, row.value);
        }
        self.config.set(keys::LASTUPDATE, json!(epoch_secs(now)));

        broker(&mut self.broker)?
            .dump_config(&self.config, now)
            .await?;
        self.config.apply_field_types()?;
        Ok(())
    }

    async fn fetch_remote_config(&mut self, machine: &mut Machine) -> AgentResult<Vec<ConfigEntry>> {
        self.log(machine, Level::Info, "Getting remote configuration");
        let response = self.transport.rconf(&self.config, &self.serial).await?;
        let response = require_success(response)?;
        config_rows(&response)
    }

    // =========================================================================
    // Heartbeat
    // =========================================================================

    /// True once `hbt` seconds have passed since the last heartbeat.
    pub fn heartbeat_due(&self, now: DateTime<Utc>) -> bool {
        let Some(last) = self.ram.last_hb else {
            return true;
        };
        let hbt = self.config.hbt().unwrap_or(DEFAULT_HEARTBEAT_SECS);
        match TimeDelta::try_seconds(hbt).and_then(|d| last.checked_add_signed(d)) {
            Some(due) => now >= due,
            None => false,
        }
    }

    /// Sends one heartbeat and applies the configuration it returns.
    pub async fn heartbeat(&mut self, machine: &mut Machine, now: DateTime<Utc>) -> AgentResult<()> {
        let response = self.transport.heartbeat(&self.config, &self.serial).await?;
        let response = require_success(response)?;
        let rows = config_rows(&response)?;

        let who = self.config.client_id().unwrap_or("N/A").to_string();
        self.log(machine, Level::Info, &format!("Heartbeat as {who}"));

        self.update_config(machine, Some(rows), now).await?;
        self.ram.last_hb = Some(now);
        self.ram.heartbeats += 1;
        self.publish().await;
        Ok(())
    }

    // =========================================================================
    // Failure
    // =========================================================================

    /// Records the failure and turns it into a liveness signal.
    async fn crash(&mut self, machine: &mut Machine, err: AgentError) -> Liveness {
        self.log(machine, Level::Fatal, "CRASHED");
        if err.entries().is_empty() {
            self.log(machine, Level::Fatal, &err.to_string());
        }
        for entry in err.entries() {
            self.journal
                .log_api_error(machine.files_mut(), Level::Fatal, entry);
        }

        self.started = false;
        self.close_broker().await;
        self.set_phase(AgentPhase::Crashed).await;
        self.status.write().await.last_error = Some(err.to_string());

        if err.is_process_fatal() {
            Liveness::Fatal(err.to_string())
        } else {
            Liveness::Crashed(err.to_string())
        }
    }

    async fn close_broker(&mut self) {
        if let Some(broker) = self.broker.as_mut() {
            if let Err(e) = broker.close().await {
                warn!(serial = %self.serial, error = %e, "Failed to close datastore");
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    pub(crate) fn log(&self, machine: &mut Machine, level: Level, message: &str) {
        self.journal.log(machine.files_mut(), level, message);
    }

    async fn set_phase(&mut self, phase: AgentPhase) {
        self.phase = phase;
        self.publish().await;
    }

    pub(crate) async fn publish(&mut self) {
        let mut status = self.status.write().await;
        status.phase = self.phase;
        status.client_id = self.config.client_id().map(str::to_string);
        status.last_heartbeat = self.ram.last_hb;
        status.heartbeats = self.ram.heartbeats;
    }
}

#[async_trait]
impl Program for InventoryAgent {
    fn name(&self) -> &str {
        PROGRAM_NAME
    }

    async fn start(&mut self, machine: &mut Machine, now: DateTime<Utc>) -> Liveness {
        match self.bootstrap(machine, now).await {
            Ok(()) => Liveness::Alive,
            Err(e) => self.crash(machine, e).await,
        }
    }

    async fn tick(
        &mut self,
        machine: &mut Machine,
        now: DateTime<Utc>,
        _elapsed: std::time::Duration,
    ) -> Liveness {
        if !self.started || !self.initialized {
            return Liveness::Crashed(format!("{PROGRAM_NAME} is not running"));
        }

        if self.heartbeat_due(now) {
            if let Err(e) = self.heartbeat(machine, now).await {
                return self.crash(machine, e).await;
            }
        }
        Liveness::Alive
    }

    async fn stop(&mut self, machine: &mut Machine) {
        if self.started {
            self.log(machine, Level::Notice, "Stopping");
        }
        self.started = false;
        self.close_broker().await;
        self.publish().await;
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`InventoryAgent`].
#[derive(Default)]
pub struct InventoryAgentBuilder {
    dispatch: Option<Arc<dyn Dispatch>>,
    http: HttpConfig,
    scheme: Option<Scheme>,
}

impl InventoryAgentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the HTTP dispatcher.
    pub fn with_dispatch(mut self, dispatch: Arc<dyn Dispatch>) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    pub fn with_http_config(mut self, http: HttpConfig) -> Self {
        self.http = http;
        self
    }

    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = Some(scheme);
        self
    }

    pub fn build(self) -> AgentResult<InventoryAgent> {
        let dispatch: Arc<dyn Dispatch> = match self.dispatch {
            Some(dispatch) => dispatch,
            None => Arc::new(ReqwestDispatch::new(self.http)?),
        };
        let mut transport = Transport::new(dispatch);
        if let Some(scheme) = self.scheme {
            transport = transport.with_scheme(scheme);
        }
        Ok(InventoryAgent::new(transport))
    }
}

// =============================================================================
// Free helpers
// =============================================================================

pub(crate) fn broker(slot: &mut Option<Broker>) -> AgentResult<&mut Broker> {
    slot.as_mut().ok_or_else(not_started)
}

fn not_started() -> AgentError {
    AgentError::Configuration(format!("{PROGRAM_NAME} has not been started"))
}

/// Passes a 200 through, classifies anything else.
pub(crate) fn require_success(response: ApiResponse) -> AgentResult<ApiResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(AgentError::from_response(&response))
    }
}

fn config_rows(response: &ApiResponse) -> AgentResult<Vec<ConfigEntry>> {
    response
        .config_entries()
        .ok_or_else(|| AgentError::Protocol("response has no data.config block".to_string()))
}

fn epoch_secs(now: DateTime<Utc>) -> f64 {
    now.timestamp_millis() as f64 / 1000.0
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{api_error, ok, ScriptedDispatch};
    use chrono::TimeZone;
    use invsim_core::files::BOOTSTRAP_FILE;
    use invsim_core::{Component, FileStore, ModuleType, Modules};
    use serde_json::Value;
    use std::time::Duration;
    use tempfile::TempDir;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn component(value: Value) -> Component {
        Component::new(value.as_object().cloned().unwrap())
    }

    fn machine(dir: &TempDir, hbt: i64) -> Machine {
        let mut modules = Modules::new();
        modules.insert(
            ModuleType::identity(),
            vec![component(json!({"serial": "ABC123", "vendor": "AMI"}))],
        );
        modules.insert(
            ModuleType::new("cpu").unwrap(),
            vec![component(json!({"model": "i7", "cache": {"l2": 256}}))],
        );

        let mut files = FileStore::new();
        let invconf = json!({
            "api": "inv.example.com",
            "keypub": "PUB",
            "hbt": hbt,
            "backoff": 0,
            "sqlstore": dir.path().to_string_lossy(),
            "logfile": "invsys.log",
            "loglevel": 4,
        });
        files.put(BOOTSTRAP_FILE, invconf.to_string());
        Machine::new(modules, files).unwrap()
    }

    fn agent(dispatch: &Arc<ScriptedDispatch>) -> InventoryAgent {
        InventoryAgent::builder()
            .with_dispatch(Arc::clone(dispatch) as Arc<dyn Dispatch>)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_start_registers_and_persists_identifiers() {
        let dir = TempDir::new().unwrap();
        let mut machine = machine(&dir, 60);
        let dispatch = Arc::new(ScriptedDispatch::standard("C1", "KEY"));
        let mut agent = agent(&dispatch);

        assert_eq!(agent.start(&mut machine, t0()).await, Liveness::Alive);
        assert_eq!(agent.phase(), AgentPhase::SteadySync);
        assert_eq!(agent.config().client_id(), Some("C1"));
        assert_eq!(agent.ram().last_hb, Some(t0()));

        // rconf only for a fresh datastore, then init and post
        assert_eq!(dispatch.count("rconf"), 1);
        assert_eq!(dispatch.count("init"), 1);
        assert_eq!(dispatch.count("post"), 1);

        let init = &dispatch.calls()[1];
        assert_eq!(init.envelope.meta.apikey.as_deref(), Some("PUB"));
        assert!(init.envelope.data["computer"]["modules"]["cpu"].is_array());

        let mut broker = Broker::for_device(dir.path(), "ABC123");
        let stored = broker.config().await.unwrap();
        assert_eq!(stored.client_id(), Some("C1"));
        assert_eq!(stored.apikey(), Some("KEY"));

        let status = agent.handle().status().await;
        assert_eq!(status.phase, AgentPhase::SteadySync);
        assert_eq!(status.client_id.as_deref(), Some("C1"));

        let log = machine.files().get("invsys.log").unwrap();
        assert!(log.contains("Notice| Initializing"));
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut machine = machine(&dir, 60);
        let dispatch = Arc::new(ScriptedDispatch::standard("C1", "KEY"));
        let mut agent = agent(&dispatch);

        agent.start(&mut machine, t0()).await;
        agent.initialize(&mut machine, t0()).await.unwrap();
        assert_eq!(dispatch.count("init"), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_timing() {
        let dir = TempDir::new().unwrap();
        let mut machine = machine(&dir, 60);
        let dispatch = Arc::new(ScriptedDispatch::standard("C1", "KEY"));
        let mut agent = agent(&dispatch);
        agent.start(&mut machine, t0()).await;

        let early = t0() + TimeDelta::seconds(59);
        assert_eq!(
            agent.tick(&mut machine, early, Duration::ZERO).await,
            Liveness::Alive
        );
        assert_eq!(dispatch.count("hbt"), 0);

        let due = t0() + TimeDelta::seconds(60);
        agent.tick(&mut machine, due, Duration::ZERO).await;
        assert_eq!(dispatch.count("hbt"), 1);
        assert_eq!(agent.ram().last_hb, Some(due));
        assert_eq!(agent.ram().heartbeats, 1);

        let hb = dispatch.calls().into_iter().last().unwrap();
        assert_eq!(hb.envelope.meta.client_id.as_deref(), Some("C1"));
        assert_eq!(hb.envelope.meta.apikey.as_deref(), Some("KEY"));
        assert!(hb.envelope.data.is_null());

        agent
            .tick(&mut machine, due + TimeDelta::seconds(1), Duration::ZERO)
            .await;
        assert_eq!(dispatch.count("hbt"), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_config_merge_is_last_write_wins() {
        let dir = TempDir::new().unwrap();
        let mut machine = machine(&dir, 30);
        let dispatch = Arc::new(ScriptedDispatch::standard("C1", "KEY"));
        dispatch.push(
            "hbt",
            ok(json!({"config": [{"attribute": "hbt", "value": "45"}]})),
        );
        let mut agent = agent(&dispatch);
        agent.start(&mut machine, t0()).await;
        assert_eq!(agent.config().hbt(), Some(30));

        let due = t0() + TimeDelta::seconds(30);
        agent.tick(&mut machine, due, Duration::ZERO).await;
        assert_eq!(agent.config().hbt(), Some(45));
        assert!(agent.config().lastupdate().unwrap() > 0.0);

        // the next heartbeat follows the new interval
        agent
            .tick(&mut machine, due + TimeDelta::seconds(30), Duration::ZERO)
            .await;
        assert_eq!(dispatch.count("hbt"), 1);
        agent
            .tick(&mut machine, due + TimeDelta::seconds(45), Duration::ZERO)
            .await;
        assert_eq!(dispatch.count("hbt"), 2);
    }

    #[tokio::test]
    async fn test_heartbeat_server_error_crashes() {
        let dir = TempDir::new().unwrap();
        let mut machine = machine(&dir, 10);
        let dispatch = Arc::new(ScriptedDispatch::standard("C1", "KEY"));
        dispatch.push("hbt", ApiResponse::json(503, json!({})));
        let mut agent = agent(&dispatch);
        agent.start(&mut machine, t0()).await;

        let liveness = agent
            .tick(&mut machine, t0() + TimeDelta::seconds(10), Duration::ZERO)
            .await;
        assert!(matches!(liveness, Liveness::Crashed(_)));
        assert_eq!(agent.phase(), AgentPhase::Crashed);
        assert!(!agent.is_started());

        let log = machine.files().get("invsys.log").unwrap();
        assert!(log.contains("FATAL| CRASHED"));

        let status = agent.handle().status().await;
        assert!(status.last_error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_missing_bootstrap_crashes_start() {
        let mut machine = Machine::new(
            {
                let mut modules = Modules::new();
                modules.insert(
                    ModuleType::identity(),
                    vec![component(json!({"serial": "ABC123"}))],
                );
                modules
            },
            FileStore::new(),
        )
        .unwrap();
        let dispatch = Arc::new(ScriptedDispatch::standard("C1", "KEY"));
        let mut agent = agent(&dispatch);

        let liveness = agent.start(&mut machine, t0()).await;
        assert!(matches!(liveness, Liveness::Crashed(_)));
        assert!(dispatch.calls().is_empty());
    }

    #[tokio::test]
    async fn test_certificate_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut machine = machine(&dir, 60);
        let dispatch = Arc::new(ScriptedDispatch::standard("C1", "KEY"));
        dispatch.push_error(
            "rconf",
            AgentError::TransportTrust("invalid peer certificate".into()),
        );
        let mut agent = agent(&dispatch);

        let liveness = agent.start(&mut machine, t0()).await;
        assert!(liveness.is_fatal());
    }

    #[tokio::test]
    async fn test_registration_internal_error_crashes() {
        let dir = TempDir::new().unwrap();
        let mut machine = machine(&dir, 60);
        let dispatch = Arc::new(ScriptedDispatch::standard("C1", "KEY"));
        dispatch.push("init", api_error(500, "0x0001", "Internal", None));
        let mut agent = agent(&dispatch);

        let liveness = agent.start(&mut machine, t0()).await;
        assert!(matches!(liveness, Liveness::Crashed(_)));
        assert_eq!(dispatch.count("init"), 1);
        assert_eq!(dispatch.count("post"), 0);
    }

    #[tokio::test]
    async fn test_empty_datastore_file_is_initialized() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("ABC123.db3"), b"").unwrap();
        let mut machine = machine(&dir, 60);
        let dispatch = Arc::new(ScriptedDispatch::standard("C1", "KEY"));
        let mut agent = agent(&dispatch);

        assert_eq!(agent.start(&mut machine, t0()).await, Liveness::Alive);
        assert_eq!(dispatch.count("rconf"), 1);
        assert_eq!(dispatch.count("init"), 1);

        let mut broker = Broker::for_device(dir.path(), "ABC123");
        assert!(broker.has_schema().await.unwrap());
        assert_eq!(broker.config().await.unwrap().client_id(), Some("C1"));
    }

    #[tokio::test]
    async fn test_tick_before_start_is_not_alive() {
        let dispatch = Arc::new(ScriptedDispatch::standard("C1", "KEY"));
        let dir = TempDir::new().unwrap();
        let mut machine = machine(&dir, 60);
        let mut agent = agent(&dispatch);

        let liveness = agent.tick(&mut machine, t0(), Duration::ZERO).await;
        assert!(!liveness.is_alive());
    }

    #[tokio::test]
    async fn test_restart_reuses_stored_configuration() {
        let dir = TempDir::new().unwrap();
        let dispatch = Arc::new(ScriptedDispatch::standard("C1", "KEY"));

        let mut first = machine(&dir, 60);
        let mut agent_a = agent(&dispatch);
        agent_a.start(&mut first, t0()).await;
        agent_a.stop(&mut first).await;

        let mut second = machine(&dir, 60);
        let mut agent_b = agent(&dispatch);
        assert_eq!(agent_b.start(&mut second, t0()).await, Liveness::Alive);

        // datastore already existed: no second rconf
        assert_eq!(dispatch.count("rconf"), 1);
        let second_init = dispatch
            .calls()
            .into_iter()
            .filter(|c| c.action == "init")
            .nth(1)
            .unwrap();
        assert_eq!(second_init.envelope.meta.client_id.as_deref(), Some("C1"));
    }

    #[test]
    fn test_heartbeat_due_without_history() {
        let dispatch = Arc::new(ScriptedDispatch::new());
        let agent = agent(&dispatch);
        assert!(agent.heartbeat_due(t0()));
    }
}
