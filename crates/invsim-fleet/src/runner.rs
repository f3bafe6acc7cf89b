//! Per-device runner task.
//!
//! ```text
//! boot ──► loop { stop? ─► tick ─► sleep(tickrate) } ──► shutdown
//!                                │
//!                                ├── fatal error  → shutdown(crashed)
//!                                └── panic        → shutdown(crashed)
//! ```
//!
//! The stop signal is advisory: it is checked between ticks and wakes the
//! sleep, but never interrupts a tick in flight.

use chrono::Utc;
use futures_util::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use crate::device::Device;
use crate::error::FleetResult;

/// How a runner ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Stop was requested.
    Stopped,
    /// The device panicked and was shut down as crashed.
    Crashed(String),
    /// A process-fatal failure; the whole fleet must stop.
    Fatal(String),
}

impl RunOutcome {
    pub fn is_fatal(&self) -> bool {
        matches!(self, RunOutcome::Fatal(_))
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Stopped => f.write_str("stopped"),
            RunOutcome::Crashed(reason) => write!(f, "crashed: {reason}"),
            RunOutcome::Fatal(reason) => write!(f, "fatal: {reason}"),
        }
    }
}

/// Device handed back by a finished runner.
#[derive(Debug)]
pub struct RunReport {
    pub device: Device,
    pub outcome: RunOutcome,
}

/// Runs one device until `stop` turns true or it fails fatally.
///
/// Shutdown is always reached, also after a panic inside a tick.
pub async fn run_device(
    mut device: Device,
    tick_interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> RunReport {
    let serial = device.serial().to_string();
    info!(serial = %serial, "Starting device");

    if let Some(outcome) = guarded(device.boot(Utc::now())).await {
        error!(serial = %serial, %outcome, "Boot failed");
        device.shutdown(true).await;
        return RunReport { device, outcome };
    }

    let outcome = loop {
        if *stop.borrow() {
            break RunOutcome::Stopped;
        }

        if let Some(outcome) = guarded(device.tick(Utc::now())).await {
            error!(serial = %serial, %outcome, "Device failed");
            break outcome;
        }

        tokio::select! {
            _ = tokio::time::sleep(tick_interval) => {}
            changed = stop.changed() => {
                if changed.is_err() {
                    break RunOutcome::Stopped;
                }
            }
        }
    };

    device
        .shutdown(!matches!(outcome, RunOutcome::Stopped))
        .await;
    info!(serial = %serial, %outcome, "Exiting device");
    RunReport { device, outcome }
}

/// Runs a lifecycle step, turning errors and panics into an outcome.
async fn guarded<F>(step: F) -> Option<RunOutcome>
where
    F: std::future::Future<Output = FleetResult<()>>,
{
    match AssertUnwindSafe(step).catch_unwind().await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(RunOutcome::Fatal(e.to_string())),
        Err(panic) => Some(RunOutcome::Crashed(panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use invsim_core::{Component, FileStore, Liveness, Machine, ModuleType, Modules, Program};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counter {
        ticks: Arc<AtomicUsize>,
        panic_at: Option<usize>,
        fatal_at: Option<usize>,
    }

    #[async_trait]
    impl Program for Counter {
        fn name(&self) -> &str {
            "Counter"
        }

        async fn start(&mut self, _machine: &mut Machine, _now: DateTime<Utc>) -> Liveness {
            Liveness::Alive
        }

        async fn tick(
            &mut self,
            _machine: &mut Machine,
            _now: DateTime<Utc>,
            _elapsed: Duration,
        ) -> Liveness {
            let n = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
            if self.panic_at == Some(n) {
                panic!("tick {n} exploded");
            }
            if self.fatal_at == Some(n) {
                return Liveness::Fatal("bad certificate".into());
            }
            Liveness::Alive
        }

        async fn stop(&mut self, _machine: &mut Machine) {}
    }

    fn device(panic_at: Option<usize>, fatal_at: Option<usize>) -> (Device, Arc<AtomicUsize>) {
        let mut modules = Modules::new();
        modules.insert(
            ModuleType::identity(),
            vec![Component::new(
                json!({"serial": "ABC123"}).as_object().cloned().unwrap(),
            )],
        );
        let mut device = Device::new(Machine::new(modules, FileStore::new()).unwrap());
        let ticks = Arc::new(AtomicUsize::new(0));
        device.install(Box::new(Counter {
            ticks: Arc::clone(&ticks),
            panic_at,
            fatal_at,
        }));
        (device, ticks)
    }

    #[tokio::test]
    async fn test_stop_signal_ends_loop() {
        let (device, ticks) = device(None, None);
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_device(device, Duration::from_millis(5), stop_rx));

        while ticks.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        stop_tx.send_replace(true);

        let report = task.await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Stopped);
        assert!(!report.device.is_powered());
        assert_eq!(report.device.status().await.status, "Off");
    }

    #[tokio::test]
    async fn test_panic_reaches_crash_shutdown() {
        let (device, _) = device(Some(2), None);
        let (_stop_tx, stop_rx) = watch::channel(false);

        let report = run_device(device, Duration::ZERO, stop_rx).await;
        assert!(matches!(&report.outcome, RunOutcome::Crashed(msg) if msg.contains("exploded")));
        assert_eq!(report.device.status().await.status, "Crashed");
    }

    #[tokio::test]
    async fn test_fatal_program_ends_runner() {
        let (device, ticks) = device(None, Some(1));
        let (_stop_tx, stop_rx) = watch::channel(false);

        let report = run_device(device, Duration::ZERO, stop_rx).await;
        assert!(report.outcome.is_fatal());
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        assert!(!report.device.is_powered());
    }
}
