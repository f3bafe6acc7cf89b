//! # Program Contract
//!
//! Software installed on a device implements [`Program`]. The device runtime
//! owns an ordered list of programs and drives them:
//!
//! ```text
//!   boot ──► start(machine, now)
//!              │
//!              ▼
//!   tick ──► tick(machine, now, elapsed) ──► Liveness
//!              │                              ├── Alive    keep ticking
//!              │                              ├── Crashed  evicted, device keeps running
//!              │                              └── Fatal    whole fleet stops
//!              ▼
//!   shutdown ► stop(machine)
//! ```
//!
//! Programs get `&mut Machine` for the duration of a call only; the device
//! owns the machine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::types::Machine;

/// Outcome of a program call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Liveness {
    /// The program keeps running.
    Alive,
    /// The program failed. Only this program is removed.
    Crashed(String),
    /// Failure that must stop the whole process.
    Fatal(String),
}

impl Liveness {
    pub fn is_alive(&self) -> bool {
        matches!(self, Liveness::Alive)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Liveness::Fatal(_))
    }
}

/// Software that runs on a simulated device.
#[async_trait]
pub trait Program: Send {
    /// Short name shown in device status strings.
    fn name(&self) -> &str;

    /// Called once when the device boots.
    async fn start(&mut self, machine: &mut Machine, now: DateTime<Utc>) -> Liveness;

    /// Called on every device tick. `elapsed` is zero on the first tick.
    async fn tick(&mut self, machine: &mut Machine, now: DateTime<Utc>, elapsed: Duration)
        -> Liveness;

    /// Called when the device shuts down. Must not delete persisted data.
    async fn stop(&mut self, machine: &mut Machine);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liveness_predicates() {
        assert!(Liveness::Alive.is_alive());
        assert!(!Liveness::Crashed("x".into()).is_alive());
        assert!(Liveness::Fatal("cert".into()).is_fatal());
        assert!(!Liveness::Crashed("x".into()).is_fatal());
    }
}
