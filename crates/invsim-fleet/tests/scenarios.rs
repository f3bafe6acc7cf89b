//! End-to-end device scenarios against a scripted inventory service.

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use invsim_agent::testing::{api_error, ok, ScriptedDispatch};
use invsim_agent::{AgentError, ApiResponse, Dispatch, InventoryAgent, PROGRAM_NAME};
use invsim_core::files::BOOTSTRAP_FILE;
use invsim_core::{Component, FileStore, Machine, ModuleType, Modules};
use invsim_db::Broker;
use invsim_fleet::{Device, FleetError, FleetManager, RunOutcome, SetupMode, SimulatorConfig};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn component(value: Value) -> Component {
    Component::new(value.as_object().cloned().unwrap())
}

fn invconf(sqlstore: &Path, hbt: i64) -> String {
    json!({
        "api": "inv.example.com",
        "keypub": "PUB",
        "hbt": hbt,
        "backoff": 0,
        "sqlstore": sqlstore.to_string_lossy(),
        "logfile": "invsys.log",
        "loglevel": 4,
    })
    .to_string()
}

fn machine(dir: &TempDir, hbt: i64) -> Machine {
    let mut modules = Modules::new();
    modules.insert(
        ModuleType::identity(),
        vec![component(json!({"serial": "ABC123", "vendor": "AMI"}))],
    );
    modules.insert(
        ModuleType::new("cpu").unwrap(),
        vec![component(json!({"model": "i7", "cores": 8}))],
    );

    let mut files = FileStore::new();
    files.put(BOOTSTRAP_FILE, invconf(dir.path(), hbt));
    Machine::new(modules, files).unwrap()
}

fn device(machine: Machine, dispatch: &Arc<ScriptedDispatch>) -> Device {
    let agent = InventoryAgent::builder()
        .with_dispatch(Arc::clone(dispatch) as Arc<dyn Dispatch>)
        .build()
        .unwrap();
    let mut device = Device::new(machine);
    device.install(Box::new(agent));
    device
}

#[tokio::test]
async fn test_boot_then_heartbeat_on_schedule() {
    let dir = TempDir::new().unwrap();
    let dispatch = Arc::new(ScriptedDispatch::standard("C1", "KEY"));
    let mut device = device(machine(&dir, 60), &dispatch);

    device.boot(t0()).await.unwrap();
    assert_eq!(device.program_names(), vec![PROGRAM_NAME.to_string()]);
    assert_eq!(dispatch.count("init"), 1);

    device.tick(t0() + TimeDelta::seconds(59)).await.unwrap();
    assert_eq!(dispatch.count("hbt"), 0);

    device.tick(t0() + TimeDelta::seconds(60)).await.unwrap();
    assert_eq!(dispatch.count("hbt"), 1);
    assert_eq!(device.status().await.status, "Idle");

    let mut broker = Broker::for_device(dir.path(), "ABC123");
    let stored = broker.config().await.unwrap();
    assert_eq!(stored.client_id(), Some("C1"));
}

#[tokio::test]
async fn test_existing_inventory_is_adopted_without_retry() {
    let dir = TempDir::new().unwrap();
    let dispatch = Arc::new(ScriptedDispatch::standard("C1", "KEY"));
    dispatch.push(
        "init",
        api_error(
            409,
            "0x000B",
            "ExistsInventory",
            Some(json!({"identifiers": {"client_id": "OLD", "apikey": "OLDKEY"}})),
        ),
    );
    let mut device = device(machine(&dir, 60), &dispatch);

    device.boot(t0()).await.unwrap();
    assert_eq!(dispatch.count("init"), 1);
    assert_eq!(device.program_names().len(), 1);

    device.tick(t0() + TimeDelta::seconds(60)).await.unwrap();
    let hb = dispatch.calls().into_iter().last().unwrap();
    assert_eq!(hb.action, "hbt");
    assert_eq!(hb.envelope.meta.client_id.as_deref(), Some("OLD"));
    assert_eq!(hb.envelope.meta.apikey.as_deref(), Some("OLDKEY"));
}

#[tokio::test]
async fn test_registration_server_error_evicts_agent() {
    let dir = TempDir::new().unwrap();
    let dispatch = Arc::new(ScriptedDispatch::standard("C1", "KEY"));
    dispatch.push("init", api_error(500, "0x0001", "Internal", None));
    let mut device = device(machine(&dir, 60), &dispatch);

    device.boot(t0()).await.unwrap();
    assert!(device.program_names().is_empty());
    assert!(device.is_powered());
    assert_eq!(
        device.status().await.status,
        format!("{PROGRAM_NAME} crashed")
    );

    // the device keeps ticking with nothing installed
    device.tick(t0() + TimeDelta::seconds(60)).await.unwrap();
    assert_eq!(dispatch.count("hbt"), 0);
    assert_eq!(device.status().await.status, "Idle");
}

#[tokio::test]
async fn test_scheme_fallback_fires_once() {
    let dir = TempDir::new().unwrap();
    let dispatch = Arc::new(ScriptedDispatch::standard("C1", "KEY"));
    dispatch.push("rconf", ApiResponse::json(404, json!({})));
    dispatch.push("rconf", ApiResponse::json(404, json!({})));
    let mut device = device(machine(&dir, 60), &dispatch);

    device.boot(t0()).await.unwrap();

    let urls = dispatch.urls();
    assert_eq!(urls.len(), 2);
    assert!(urls[0].starts_with("https://"));
    assert!(urls[1].starts_with("http://"));
    assert!(device.program_names().is_empty());
}

#[tokio::test]
async fn test_remote_heartbeat_interval_applies() {
    let dir = TempDir::new().unwrap();
    let dispatch = Arc::new(ScriptedDispatch::standard("C1", "KEY"));
    dispatch.push(
        "hbt",
        ok(json!({"config": [{"attribute": "hbt", "value": "45"}]})),
    );
    let mut device = device(machine(&dir, 30), &dispatch);
    device.boot(t0()).await.unwrap();

    let first = t0() + TimeDelta::seconds(30);
    device.tick(first).await.unwrap();
    assert_eq!(dispatch.count("hbt"), 1);

    device.tick(first + TimeDelta::seconds(44)).await.unwrap();
    assert_eq!(dispatch.count("hbt"), 1);

    device.tick(first + TimeDelta::seconds(45)).await.unwrap();
    assert_eq!(dispatch.count("hbt"), 2);

    let mut broker = Broker::for_device(dir.path(), "ABC123");
    assert_eq!(broker.config().await.unwrap().hbt(), Some(45));
}

fn fleet_config(dir: &TempDir, count: usize, setup: SetupMode) -> SimulatorConfig {
    let pool = dir.path().join("pool");
    for (file, value) in [
        ("bios/ami.json", json!({"vendor": "AMI", "serial": "X"})),
        ("cpu/i7.json", json!({"model": "i7", "serial": "GEN"})),
    ] {
        let path = pool.join(file);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, value.to_string()).unwrap();
    }

    let bootstrap = dir.path().join("invconfig.json");
    std::fs::write(&bootstrap, invconf(&dir.path().join("db"), 60)).unwrap();

    SimulatorConfig {
        store: dir.path().join("computers"),
        pool,
        system_count: count,
        setup,
        bootstrap,
        tickrate: 0.01,
        report_interval_secs: 1,
    }
}

#[tokio::test]
async fn test_serial_survives_save_and_load() {
    let dir = TempDir::new().unwrap();
    let first = FleetManager::build(fleet_config(&dir, 2, SetupMode::Fresh)).unwrap();
    let serials: Vec<String> = first.machines().keys().cloned().collect();

    let reloaded = FleetManager::build(fleet_config(&dir, 2, SetupMode::LoadAll)).unwrap();
    let again: Vec<String> = reloaded.machines().keys().cloned().collect();
    assert_eq!(serials, again);
    for serial in &serials {
        assert_eq!(reloaded.machines()[serial].serial(), serial);
    }
}

#[tokio::test]
async fn test_fleet_run_registers_and_saves_devices() {
    let dir = TempDir::new().unwrap();
    let dispatch = Arc::new(ScriptedDispatch::standard("C1", "KEY"));
    let mut manager = FleetManager::build(fleet_config(&dir, 2, SetupMode::Fresh))
        .unwrap()
        .with_dispatch(Arc::clone(&dispatch) as Arc<dyn Dispatch>);

    let report = manager
        .run(tokio::time::sleep(Duration::from_millis(200)))
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert!(report
        .outcomes
        .values()
        .all(|outcome| *outcome == RunOutcome::Stopped));
    assert_eq!(dispatch.count("init"), 2);
    assert_eq!(manager.machines().len(), 2);

    for (serial, machine) in manager.machines() {
        let saved = FleetManager::load_machine(
            &dir.path().join("computers").join(format!("{serial}.computer")),
        )
        .unwrap();
        assert_eq!(&saved, machine);
        assert!(saved.files().get("invsys.log").is_some());
        assert!(Broker::for_device(dir.path().join("db"), serial).exists());
    }
}

#[tokio::test]
async fn test_untrusted_certificate_stops_whole_fleet() {
    let dir = TempDir::new().unwrap();
    let dispatch = Arc::new(ScriptedDispatch::standard("C1", "KEY"));
    dispatch.push_error(
        "rconf",
        AgentError::TransportTrust("invalid peer certificate".into()),
    );
    let mut manager = FleetManager::build(fleet_config(&dir, 3, SetupMode::Fresh))
        .unwrap()
        .with_dispatch(Arc::clone(&dispatch) as Arc<dyn Dispatch>);

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        manager.run(tokio::time::sleep(Duration::from_secs(3600))),
    )
    .await
    .expect("fleet must stop without the shutdown signal");

    let err = result.unwrap_err();
    assert!(matches!(err, FleetError::ProcessFatal { .. }));
    assert!(err.is_process_fatal());

    assert_eq!(manager.machines().len(), 3);
    for serial in manager.machines().keys() {
        let path = dir.path().join("computers").join(format!("{serial}.computer"));
        assert!(path.is_file());
    }
}
