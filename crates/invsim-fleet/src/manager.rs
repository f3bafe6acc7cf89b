//! # Fleet Manager
//!
//! Assembles the fleet, runs one task per device and persists machines.
//!
//! ## Store Layout
//! ```text
//! <store>/
//! ├── ABC123.computer     {"modules": {...}, "filesystem": {...}}
//! └── K9Q2ZX.computer
//!
//! <pool>/
//! ├── bios/               one file picked at random
//! ├── cpu/                one file picked at random
//! └── partitions/         every file loaded
//! ```
//!
//! ## Run
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  shutdown future ──► stop signal (watch) ◄── fatal device outcome      │
//! │                           │                                             │
//! │           ┌───────────────┼───────────────┐                             │
//! │           ▼               ▼               ▼                             │
//! │     run_device(A)   run_device(B)   report_status (low priority)       │
//! │           │               │                                             │
//! │           └──────► machines saved after the run ◄────┘                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use invsim_agent::{AgentResult, Dispatch, InventoryAgent};
use invsim_core::files::BOOTSTRAP_FILE;
use invsim_core::ident::{generate_identifier, generate_unique, UPPER_ALPHANUMERIC};
use invsim_core::{
    Component, FileStore, Machine, ModuleType, Modules, Program, SERIAL_ATTRIBUTE, SERIAL_LENGTH,
};
use rand::Rng;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{SetupMode, SimulatorConfig};
use crate::device::{Device, DeviceHandle};
use crate::error::{FleetError, FleetResult};
use crate::runner::{run_device, RunOutcome};

/// Extension of saved machine files.
pub const MACHINE_EXTENSION: &str = "computer";

/// Pool directory whose files are all installed, not one picked at random.
pub const MULTI_COMPONENT_MODULE: &str = "partitions";

/// Placeholder serial in pool files, replaced per device.
pub const GENERATED_SERIAL: &str = "GEN";

/// Length of serials generated for `GEN` placeholders.
pub const COMPONENT_SERIAL_LENGTH: usize = 7;

/// Builds the program installed on a device.
pub type ProgramFactory = Arc<dyn Fn(&Machine) -> AgentResult<Box<dyn Program>> + Send + Sync>;

/// Outcome of a finished run, per device serial.
#[derive(Debug, Default)]
pub struct FleetReport {
    pub outcomes: BTreeMap<String, RunOutcome>,
}

pub struct FleetManager {
    config: SimulatorConfig,
    machines: BTreeMap<String, Machine>,
    factory: ProgramFactory,
}

impl fmt::Debug for FleetManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FleetManager")
            .field("config", &self.config)
            .field("devices", &self.machines.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl FleetManager {
    /// Assembles the fleet according to the setup mode and saves it.
    pub fn build(config: SimulatorConfig) -> FleetResult<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.store)?;

        let mut manager = FleetManager {
            config,
            machines: BTreeMap::new(),
            factory: default_factory(),
        };

        match manager.config.setup {
            SetupMode::Fresh => manager.wipe_store()?,
            SetupMode::TopUp => manager.load_saved(Some(manager.config.system_count))?,
            SetupMode::LoadAll => manager.load_saved(None)?,
        }

        let missing = manager
            .config
            .system_count
            .saturating_sub(manager.machines.len());
        if manager.config.setup != SetupMode::LoadAll && missing > 0 {
            let invconf = std::fs::read_to_string(&manager.config.bootstrap)?;
            for _ in 0..missing {
                let machine = manager.create_machine(&invconf)?;
                info!(serial = %machine.serial(), "Machine created");
                manager.machines.insert(machine.serial().to_string(), machine);
            }
        }

        if manager.machines.is_empty() {
            return Err(FleetError::NoSystems);
        }

        manager.save_all()?;
        info!(
            devices = manager.machines.len(),
            setup = %manager.config.setup,
            "Fleet assembled"
        );
        Ok(manager)
    }

    /// Replaces the program installed on every device.
    pub fn with_factory(mut self, factory: ProgramFactory) -> Self {
        self.factory = factory;
        self
    }

    /// Installs agents that talk through `dispatch`.
    pub fn with_dispatch(self, dispatch: Arc<dyn Dispatch>) -> Self {
        self.with_factory(Arc::new(move |_machine: &Machine| {
            let agent = InventoryAgent::builder()
                .with_dispatch(Arc::clone(&dispatch))
                .build()?;
            Ok(Box::new(agent) as Box<dyn Program>)
        }))
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn machines(&self) -> &BTreeMap<String, Machine> {
        &self.machines
    }

    // =========================================================================
    // Machines
    // =========================================================================

    /// Builds a new machine from the component pool.
    ///
    /// The serial is unique within the fleet; the `bios` component carries
    /// it and `invconf` is placed in the file store.
    pub fn create_machine(&self, invconf: &str) -> FleetResult<Machine> {
        let serial = generate_unique(SERIAL_LENGTH, UPPER_ALPHANUMERIC, |s| {
            self.machines.contains_key(s)
        })?;

        let mut modules = Modules::new();
        for (module, path) in pool_modules(&self.config.pool)? {
            let files = sorted_entries(&path, |p| p.is_file())?;
            if files.is_empty() {
                warn!(module = %module, "Pool module has no components, skipped");
                continue;
            }

            let chosen = if module.as_str() == MULTI_COMPONENT_MODULE {
                files
            } else {
                let pick = rand::rng().random_range(0..files.len());
                vec![files[pick].clone()]
            };

            let mut components = Vec::with_capacity(chosen.len());
            for file in chosen {
                let mut component = read_component(&file)?;
                if component.get(SERIAL_ATTRIBUTE).and_then(Value::as_str) == Some(GENERATED_SERIAL)
                {
                    component.set(
                        SERIAL_ATTRIBUTE,
                        Value::String(generate_identifier(
                            COMPONENT_SERIAL_LENGTH,
                            UPPER_ALPHANUMERIC,
                        )),
                    );
                }
                if module.is_identity() {
                    component.set(SERIAL_ATTRIBUTE, Value::String(serial.clone()));
                }
                components.push(component);
            }
            modules.insert(module, components);
        }

        let mut files = FileStore::new();
        files.put(BOOTSTRAP_FILE, invconf);
        Ok(Machine::new(modules, files)?)
    }

    /// Loads a saved `.computer` file.
    pub fn load_machine(path: &Path) -> FleetResult<Machine> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Writes `<store>/<serial>.computer`.
    pub fn save_machine(&self, machine: &Machine) -> FleetResult<PathBuf> {
        let path = self
            .config
            .store
            .join(format!("{}.{MACHINE_EXTENSION}", machine.serial()));
        std::fs::write(&path, serde_json::to_string(machine)?)?;
        Ok(path)
    }

    pub fn save_all(&self) -> FleetResult<()> {
        for machine in self.machines.values() {
            self.save_machine(machine)?;
        }
        debug!(devices = self.machines.len(), "Machines saved");
        Ok(())
    }

    fn wipe_store(&self) -> FleetResult<()> {
        for file in sorted_entries(&self.config.store, |p| p.is_file())? {
            if let Err(e) = std::fs::remove_file(&file) {
                warn!(path = %file.display(), error = %e, "Cannot delete stored file");
            }
        }
        Ok(())
    }

    fn load_saved(&mut self, limit: Option<usize>) -> FleetResult<()> {
        let saved = sorted_entries(&self.config.store, |p| {
            p.is_file() && p.extension().is_some_and(|ext| ext == MACHINE_EXTENSION)
        })?;

        for path in saved {
            if limit.is_some_and(|max| self.machines.len() >= max) {
                break;
            }
            let machine = Self::load_machine(&path)?;
            debug!(serial = %machine.serial(), path = %path.display(), "Machine loaded");
            self.machines.insert(machine.serial().to_string(), machine);
        }
        Ok(())
    }

    // =========================================================================
    // Run
    // =========================================================================

    /// Runs every device until `shutdown` completes or a device fails
    /// fatally, then saves all machines.
    pub async fn run<F>(&mut self, shutdown: F) -> FleetResult<FleetReport>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let stop_tx = Arc::new(stop_tx);

        let mut programs = Vec::with_capacity(self.machines.len());
        for machine in self.machines.values() {
            programs.push((self.factory)(machine)?);
        }
        let devices: Vec<Device> = std::mem::take(&mut self.machines)
            .into_values()
            .zip(programs)
            .map(|(machine, program)| {
                let mut device = Device::new(machine);
                device.install(program);
                device
            })
            .collect();

        let watcher = {
            let stop_tx = Arc::clone(&stop_tx);
            tokio::spawn(async move {
                shutdown.await;
                info!("Stop requested");
                stop_tx.send_replace(true);
            })
        };

        let tick_interval = self.config.tick_interval();
        let handles: Vec<DeviceHandle> = devices.iter().map(Device::handle).collect();
        let mut tasks = JoinSet::new();
        let mut serials = HashMap::new();
        for device in devices {
            let serial = device.serial().to_string();
            let task = tasks.spawn(run_device(device, tick_interval, stop_rx.clone()));
            serials.insert(task.id(), serial);
        }
        let reporter = tokio::spawn(report_status(
            handles,
            self.config.report_interval(),
            stop_rx.clone(),
        ));

        let mut report = FleetReport::default();
        let mut fatal = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(run) => {
                    let machine = run.device.into_machine();
                    let serial = machine.serial().to_string();
                    if let RunOutcome::Fatal(message) = &run.outcome {
                        error!(serial = %serial, %message, "Stopping fleet");
                        stop_tx.send_replace(true);
                        fatal.get_or_insert_with(|| (serial.clone(), message.clone()));
                    }
                    report.outcomes.insert(serial.clone(), run.outcome);
                    self.machines.insert(serial, machine);
                }
                Err(e) => {
                    let serial = serials.get(&e.id()).map_or("unknown", String::as_str);
                    error!(
                        serial = %serial,
                        error = %e,
                        "Device task failed, its machine keeps the last saved state"
                    );
                }
            }
        }

        watcher.abort();
        stop_tx.send_replace(true);
        if let Err(e) = reporter.await {
            warn!(error = %e, "Status reporter failed");
        }

        self.save_all()?;
        match fatal {
            Some((serial, message)) => Err(FleetError::ProcessFatal { serial, message }),
            None => Ok(report),
        }
    }
}

/// Logs every device's status until stopped.
async fn report_status(
    handles: Vec<DeviceHandle>,
    every: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        if *stop.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {}
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
        for handle in &handles {
            let status = handle.status().await;
            info!(
                serial = %handle.serial(),
                status = %status.status,
                powered = status.powered,
                "Device status"
            );
        }
    }
}

fn default_factory() -> ProgramFactory {
    Arc::new(|_machine: &Machine| {
        let agent = InventoryAgent::builder().build()?;
        Ok(Box::new(agent) as Box<dyn Program>)
    })
}

/// Module type directories of the pool, in name order.
fn pool_modules(pool: &Path) -> FleetResult<Vec<(ModuleType, PathBuf)>> {
    if !pool.is_dir() {
        return Err(FleetError::pool(pool, "not a directory"));
    }

    let mut modules = Vec::new();
    for dir in sorted_entries(pool, |p| p.is_dir())? {
        let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match ModuleType::new(name) {
            Ok(module) => modules.push((module, dir)),
            Err(e) => warn!(dir = %dir.display(), error = %e, "Skipping pool directory"),
        }
    }
    Ok(modules)
}

fn read_component(path: &Path) -> FleetResult<Component> {
    let text = std::fs::read_to_string(path)?;
    match serde_json::from_str::<Value>(&text)? {
        Value::Object(attrs) => Ok(Component::new(attrs)),
        _ => Err(FleetError::pool(path, "component file must hold a JSON object")),
    }
}

fn sorted_entries(dir: &Path, keep: impl Fn(&Path) -> bool) -> FleetResult<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if keep(&path) {
            entries.push(path);
        }
    }
    entries.sort();
    Ok(entries)
}
