//! Shared fixtures for fleet BDD scenarios.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use fleetmesh::test_support::{ScriptedControl, ScriptedGateway};
use fleetmesh::topology::CONFIG_FILE_NAME;
use fleetmesh::{
    Backoff, Orchestrator, PipelineSettings, PollPolicy, PublicKey, RemoteOutput,
};
use rstest::fixture;
use serde_json::{Value, json};
use tempfile::TempDir;

/// Hosts the scripted doubles know how to answer for.
pub const KNOWN_HOSTS: u32 = 4;

#[derive(Clone, Debug)]
pub struct FleetContext {
    pub base: Utf8PathBuf,
    pub gateway: ScriptedGateway,
    pub control: ScriptedControl,
    _tmp: Arc<TempDir>,
}

impl FleetContext {
    pub fn orchestrator(&self) -> Orchestrator<ScriptedGateway, ScriptedControl> {
        Orchestrator::new(self.gateway.clone(), self.control.clone(), quick_settings())
    }

    pub fn stored(&self) -> Value {
        let path = self.base.join(CONFIG_FILE_NAME);
        let contents = std::fs::read_to_string(&path)
            .unwrap_or_else(|err| panic!("read {path}: {err}"));
        serde_json::from_str(&contents).unwrap_or_else(|err| panic!("parse {path}: {err}"))
    }
}

#[derive(Clone, Debug, Default)]
pub struct StartOutcome {
    pub error: Option<String>,
    pub failed_hosts: Vec<String>,
    pub unplaced: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LifecycleOutcome {
    /// Failed step count per host; zero for a clean host.
    pub failed_steps: BTreeMap<String, usize>,
}

/// Settings that keep every poll immediate.
fn quick_settings() -> PipelineSettings {
    let immediate = PollPolicy::attempts(3, Backoff::Fixed(Duration::ZERO));
    PipelineSettings {
        marker_poll: immediate,
        install_grace: Duration::ZERO,
        identity_poll: immediate,
        status_poll: immediate,
        ..PipelineSettings::default()
    }
}

pub fn node_key(index: u32) -> PublicKey {
    PublicKey::new(json!([1, format!("K{index}")]))
}

pub fn script_healthy_hosts(context: &FleetContext) {
    for index in 1..=KNOWN_HOSTS {
        let host = format!("mach{index}");
        context
            .gateway
            .respond(&format!("ip {host}"), RemoteOutput::success(format!("10.1.0.{index}\n")))
            .respond_on(
                &host,
                "show_validator",
                RemoteOutput::success(format!("[1,\"K{index}\"]")),
            );
        context
            .control
            .push_status(&format!("10.1.0.{index}:46657"), Ok(node_key(index)));
    }
}

#[fixture]
pub fn fleet_context() -> FleetContext {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("create temp directory: {err}"));
    let base = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp path should be UTF-8: {}", path.display()));
    FleetContext {
        base,
        gateway: ScriptedGateway::new(),
        control: ScriptedControl::new(),
        _tmp: Arc::new(tmp),
    }
}

#[fixture]
pub fn start_outcome() -> StartOutcome {
    StartOutcome::default()
}

#[fixture]
pub fn lifecycle_outcome() -> LifecycleOutcome {
    LifecycleOutcome::default()
}
