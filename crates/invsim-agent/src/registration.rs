//! Registration (`init`) and its error handling.
//!
//! ```text
//! 200                → identifiers adopted
//! 5xx                → crash
//! 0x0003             → drop credentials, wait, register again (bounded)
//! 0x000B             → already known, identifiers adopted
//! anything else      → crash
//! ```

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use invsim_core::settings::keys;
use invsim_core::Machine;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::agent::{broker, InventoryAgent};
use crate::config::DEFAULT_BACKOFF_SECS;
use crate::error::{AgentError, AgentResult};
use crate::journal::Level;
use crate::protocol::{codes, ApiResponse};

/// Registration attempts in total before a `0x0003` loop gives up.
pub const MAX_REGISTRATION_ATTEMPTS: u32 = 3;

/// Delay schedule between registration attempts, starting at `base_secs`.
pub(crate) fn registration_backoff(base_secs: i64) -> ExponentialBackoff {
    let base = Duration::from_secs(u64::try_from(base_secs).unwrap_or(0));
    ExponentialBackoff {
        current_interval: base,
        initial_interval: base,
        max_interval: base.saturating_mul(8),
        multiplier: 2.0,
        max_elapsed_time: None,
        ..Default::default()
    }
}

impl InventoryAgent {
    /// Registers `inventory` and returns the identifiers the service issued.
    pub async fn register(
        &mut self,
        machine: &mut Machine,
        inventory: Value,
    ) -> AgentResult<Map<String, Value>> {
        let payload = json!({ "computer": { "modules": inventory } });
        let mut delays =
            registration_backoff(self.config.backoff().unwrap_or(DEFAULT_BACKOFF_SECS));
        let mut attempt = 1;

        loop {
            self.log(machine, Level::Info, "Sending initial inventory");
            let response = self
                .transport
                .init(&self.config, &self.serial, payload.clone())
                .await?;

            if response.is_success() {
                self.log(machine, Level::Notice, "Registered");
                return identifiers(&response);
            }
            if response.is_server_error() {
                return Err(AgentError::from_response(&response));
            }

            let errors = response.errors();
            let handled = errors
                .iter()
                .find(|e| e.code == codes::UNAUTHORIZED_API || e.code == codes::EXISTS_INVENTORY)
                .cloned();

            match handled {
                Some(entry) if entry.code == codes::EXISTS_INVENTORY => {
                    self.log(
                        machine,
                        Level::Notice,
                        &format!("{}|{}", entry.kind, entry.message),
                    );
                    return identifiers(&response);
                }
                Some(entry) => {
                    self.journal
                        .log_api_error(machine.files_mut(), Level::Warning, &entry);
                    self.clear_credentials().await?;

                    if attempt >= MAX_REGISTRATION_ATTEMPTS {
                        warn!(serial = %self.serial, attempt, "Registration attempts exhausted");
                        return Err(AgentError::Application(errors));
                    }

                    let delay = delays.next_backoff().unwrap_or_default();
                    debug!(serial = %self.serial, attempt, ?delay, "Registering again");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(AgentError::from_response(&response)),
            }
        }
    }

    /// Forgets `client_id`/`apikey` in memory and in the datastore.
    pub async fn clear_credentials(&mut self) -> AgentResult<()> {
        self.config.remove(keys::CLIENT_ID);
        self.config.remove(keys::APIKEY);
        let removed = broker(&mut self.broker)?
            .delete_config(&[keys::CLIENT_ID, keys::APIKEY])
            .await?;
        info!(serial = %self.serial, removed, "Stored credentials cleared");
        self.publish().await;
        Ok(())
    }
}

fn identifiers(response: &ApiResponse) -> AgentResult<Map<String, Value>> {
    response
        .data()
        .and_then(|d| d.get("identifiers"))
        .and_then(Value::as_object)
        .cloned()
        .ok_or_else(|| AgentError::Protocol("registration answer has no identifiers".to_string()))
}
