//! # Simulated Device
//!
//! A machine plus the programs installed on it.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Device Lifecycle                                 │
//! │                                                                         │
//! │   Off ──boot()──► Booting ──► Idle ⇄ Tick <program>                     │
//! │                                │                                        │
//! │                                ├── program crashed → evicted,           │
//! │                                │   "<program> crashed", still powered   │
//! │                                │                                        │
//! │                                └── shutdown() → Off | Crashed           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The status string is for observers only; nothing reads it back to
//! drive behaviour.

use chrono::{DateTime, Utc};
use invsim_core::{Liveness, Machine, Program};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::{FleetError, FleetResult};

pub const STATUS_OFF: &str = "Off";
pub const STATUS_BOOTING: &str = "Booting";
pub const STATUS_IDLE: &str = "Idle";
pub const STATUS_RUNNING: &str = "Running software";
pub const STATUS_CRASHED: &str = "Crashed";

// =============================================================================
// Status
// =============================================================================

/// Observable device state.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    pub status: String,
    pub powered: bool,
    pub last_tick: Option<DateTime<Utc>>,
    /// Programs still installed, in tick order.
    pub programs: Vec<String>,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self {
            status: STATUS_OFF.to_string(),
            powered: false,
            last_tick: None,
            programs: Vec::new(),
        }
    }
}

/// Read-only view of a device owned by another task.
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    serial: String,
    state: Arc<RwLock<DeviceStatus>>,
}

impl DeviceHandle {
    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub async fn status(&self) -> DeviceStatus {
        self.state.read().await.clone()
    }
}

// =============================================================================
// Device
// =============================================================================

pub struct Device {
    machine: Machine,
    programs: Vec<Box<dyn Program>>,
    powered: bool,
    last_tick: Option<DateTime<Utc>>,
    state: Arc<RwLock<DeviceStatus>>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("serial", &self.machine.serial())
            .field("powered", &self.powered)
            .field("programs", &self.program_names())
            .finish_non_exhaustive()
    }
}

impl Device {
    pub fn new(machine: Machine) -> Self {
        Device {
            machine,
            programs: Vec::new(),
            powered: false,
            last_tick: None,
            state: Arc::new(RwLock::new(DeviceStatus::default())),
        }
    }

    /// Adds a program. Programs start and tick in installation order.
    pub fn install(&mut self, program: Box<dyn Program>) {
        debug!(serial = %self.machine.serial(), program = program.name(), "Program installed");
        self.programs.push(program);
    }

    pub fn serial(&self) -> &str {
        self.machine.serial()
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn into_machine(self) -> Machine {
        self.machine
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    pub fn program_names(&self) -> Vec<String> {
        self.programs.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn handle(&self) -> DeviceHandle {
        DeviceHandle {
            serial: self.machine.serial().to_string(),
            state: Arc::clone(&self.state),
        }
    }

    pub async fn status(&self) -> DeviceStatus {
        self.state.read().await.clone()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Powers on and starts every installed program.
    ///
    /// A program whose start fails is evicted. A process-fatal failure is
    /// returned as an error.
    pub async fn boot(&mut self, now: DateTime<Utc>) -> FleetResult<()> {
        self.powered = true;
        self.set_status(STATUS_BOOTING).await;
        info!(serial = %self.serial(), "Booting");

        let mut crashed = None;
        let mut i = 0;
        while i < self.programs.len() {
            let name = self.programs[i].name().to_string();
            self.set_status(&format!("Starting {name}")).await;

            let liveness = self.programs[i].start(&mut self.machine, now).await;
            if liveness.is_alive() {
                i += 1;
                continue;
            }

            let evicted = self.evict(i, &liveness);
            if let Liveness::Fatal(message) = liveness {
                self.set_status(&format!("{evicted} crashed")).await;
                return Err(self.fatal(message));
            }
            crashed = Some(evicted);
        }

        let status = match crashed {
            Some(name) => format!("{name} crashed"),
            None => STATUS_IDLE.to_string(),
        };
        self.set_status(&status).await;
        Ok(())
    }

    /// Advances every program by one step.
    ///
    /// Does nothing while the device is off. A program that reports a crash
    /// is evicted and the others keep ticking.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> FleetResult<()> {
        let elapsed = self
            .last_tick
            .and_then(|last| (now - last).to_std().ok())
            .unwrap_or(Duration::ZERO);
        self.last_tick = Some(now);
        self.state.write().await.last_tick = Some(now);

        if !self.powered {
            return Ok(());
        }

        self.set_status(STATUS_RUNNING).await;

        let mut crashed = None;
        let mut i = 0;
        while i < self.programs.len() {
            let name = self.programs[i].name().to_string();
            self.set_status(&format!("Tick {name}")).await;

            let liveness = self.programs[i]
                .tick(&mut self.machine, now, elapsed)
                .await;
            if liveness.is_alive() {
                i += 1;
                continue;
            }

            let evicted = self.evict(i, &liveness);
            if let Liveness::Fatal(message) = liveness {
                self.set_status(&format!("{evicted} crashed")).await;
                return Err(self.fatal(message));
            }
            crashed = Some(evicted);
        }

        let status = match crashed {
            Some(name) => format!("{name} crashed"),
            None => STATUS_IDLE.to_string(),
        };
        self.set_status(&status).await;
        Ok(())
    }

    /// Stops every program and powers off.
    pub async fn shutdown(&mut self, crashed: bool) {
        for program in self.programs.iter_mut() {
            program.stop(&mut self.machine).await;
        }

        self.powered = false;
        let status = if crashed { STATUS_CRASHED } else { STATUS_OFF };
        self.set_status(status).await;
        info!(serial = %self.serial(), status, "Powered off");
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Removes the program at `index`, keeping the order of the rest.
    /// Returns the evicted program's name.
    fn evict(&mut self, index: usize, liveness: &Liveness) -> String {
        let program = self.programs.remove(index);
        let name = program.name().to_string();
        match liveness {
            Liveness::Fatal(reason) => {
                error!(serial = %self.serial(), program = %name, %reason, "Program failed fatally")
            }
            Liveness::Crashed(reason) => {
                warn!(serial = %self.serial(), program = %name, %reason, "Program crashed")
            }
            Liveness::Alive => {}
        }
        name
    }

    fn fatal(&self, message: String) -> FleetError {
        FleetError::ProcessFatal {
            serial: self.serial().to_string(),
            message,
        }
    }

    async fn set_status(&mut self, status: &str) {
        let mut state = self.state.write().await;
        state.status = status.to_string();
        state.powered = self.powered;
        state.programs = self.program_names();
    }
}
