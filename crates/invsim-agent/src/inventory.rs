//! Initial inventory capture and post-inventory reconciliation.

use chrono::{DateTime, Utc};
use invsim_core::flatten::value_to_text;
use invsim_core::{Machine, ModuleType};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::agent::{broker, require_success, InventoryAgent};
use crate::error::AgentResult;
use crate::journal::Level;

/// Full inventory as sent at registration: module type → attribute maps.
pub fn snapshot(machine: &Machine) -> Value {
    let modules: Map<String, Value> = machine
        .modules()
        .iter()
        .map(|(module, components)| {
            let list = components
                .iter()
                .map(|c| Value::Object(c.attributes().clone()))
                .collect();
            (module.to_string(), Value::Array(list))
        })
        .collect();
    Value::Object(modules)
}

impl InventoryAgent {
    /// Stores the machine inventory locally, registers it and persists the
    /// identifiers the service issued.
    pub async fn capture_inventory(
        &mut self,
        machine: &mut Machine,
        now: DateTime<Utc>,
    ) -> AgentResult<()> {
        self.log(machine, Level::Notice, "Gathering initial inventory");
        let inserted = broker(&mut self.broker)?
            .capture(machine.modules(), now)
            .await?;
        debug!(serial = %self.serial, inserted, "Inventory stored");

        let inventory = snapshot(machine);
        let identifiers = self.register(machine, inventory).await?;

        self.log(machine, Level::Info, "Storing identifiers");
        for (key, value) in identifiers {
            self.config.set(key, value);
        }
        self.config.apply_field_types()?;
        broker(&mut self.broker)?
            .dump_config(&self.config, now)
            .await?;
        self.publish().await;
        Ok(())
    }

    /// Writes the server ids the service reports for this device's
    /// components. Returns the number of rows updated.
    pub async fn reconcile(&mut self, machine: &mut Machine, now: DateTime<Utc>) -> AgentResult<u64> {
        self.log(machine, Level::Info, "Fetching post inventory");
        let response = self.transport.post(&self.config, &self.serial).await?;
        let response = require_success(response)?;

        let Some(modules) = response
            .data()
            .and_then(|d| d.pointer("/computer/modules"))
            .and_then(Value::as_object)
        else {
            debug!(serial = %self.serial, "Post inventory carries no modules");
            return Ok(0);
        };

        let mut touched = 0;
        for (name, entries) in modules {
            let module = match ModuleType::new(name.as_str()) {
                Ok(module) if machine.modules().contains_key(&module) => module,
                _ => {
                    warn!(serial = %self.serial, module = %name, "Unknown module in post inventory");
                    continue;
                }
            };

            for entry in entries.as_array().into_iter().flatten() {
                let cid = entry.get("cid").and_then(Value::as_str);
                let sid = entry.get("sid").filter(|s| !s.is_null());
                let (Some(cid), Some(sid)) = (cid, sid) else {
                    continue;
                };
                touched += broker(&mut self.broker)?
                    .assign_sid(&module, cid, &value_to_text(sid), now)
                    .await?;
            }
        }

        debug!(serial = %self.serial, touched, "Server ids reconciled");
        Ok(touched)
    }
}
