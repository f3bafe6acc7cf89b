//! # Inventory Simulator
//!
//! Runs a fleet of simulated computers that register and heartbeat
//! against an inventory service.
//!
//! ## Startup Sequence
//! 1. Initialize tracing (logging)
//! 2. Load configuration (`invsim [config.toml]`, else the platform default)
//! 3. Assemble the fleet (fresh, top-up or load-all)
//! 4. Run every device until Ctrl+C / SIGTERM
//! 5. Save all machines and exit
//!
//! A process-fatal device failure (for example an untrusted server
//! certificate) stops the whole fleet and exits non-zero.

use anyhow::Context;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use invsim_fleet::{FleetManager, SimulatorConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting inventory simulator");

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = SimulatorConfig::load(config_path).context("loading simulator configuration")?;
    info!(
        store = %config.store.display(),
        pool = %config.pool.display(),
        systems = config.system_count,
        setup = %config.setup,
        "Configuration loaded"
    );

    let mut fleet = FleetManager::build(config).context("assembling the fleet")?;

    let report = match fleet.run(shutdown_signal()).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Fleet stopped");
            return Err(e.into());
        }
    };

    for (serial, outcome) in &report.outcomes {
        info!(serial = %serial, %outcome, "Device finished");
    }
    info!("Simulator shutdown complete");
    Ok(())
}

/// Initializes the tracing subscriber for structured logging.
///
/// `RUST_LOG` overrides the default filter.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,invsim=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Completes on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping devices...");
}
