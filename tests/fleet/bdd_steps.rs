//! BDD step definitions for fleet provisioning and lifecycle commands.

use fleetmesh::topology::CONFIG_FILE_NAME;
use fleetmesh::{FleetFailure, RemoteOutput, StartRequest, resolve_hosts};
use rstest_bdd_macros::{given, then, when};
use serde_json::{Value, json};
use tokio::runtime::Runtime;

use super::test_helpers::{FleetContext, LifecycleOutcome, StartOutcome, script_healthy_hosts};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("setup failed: {0}")]
    Setup(String),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn runtime() -> Result<Runtime, StepError> {
    Runtime::new().map_err(|err| StepError::Setup(err.to_string()))
}

fn slot(fleet_context: &FleetContext, index: usize) -> Result<Value, StepError> {
    fleet_context
        .stored()
        .get("validators")
        .and_then(|validators| validators.get(index))
        .cloned()
        .ok_or_else(|| StepError::Assertion(format!("no validator slot {index}")))
}

#[given("a network configuration with {count} validator slots")]
fn network_configuration(fleet_context: &FleetContext, count: usize) -> Result<(), StepError> {
    let validators = (0..count)
        .map(|index| json!({"validator": {"id": format!("mach{}", index + 1)}, "index": index}))
        .collect::<Vec<_>>();
    let config = json!({"id": "", "val_set_id": "anon", "validators": validators});
    std::fs::write(fleet_context.base.join(CONFIG_FILE_NAME), config.to_string())
        .map_err(|err| StepError::Setup(err.to_string()))
}

#[given("every host answers normally")]
fn every_host_answers(fleet_context: &FleetContext) {
    script_healthy_hosts(fleet_context);
}

#[given("host \"{host}\" cannot launch its core")]
fn host_cannot_launch_core(fleet_context: &FleetContext, host: String) {
    fleet_context.gateway.respond_on(
        &host,
        "--name chain_core",
        RemoteOutput::failure("Cannot connect to the Docker daemon"),
    );
}

#[given("no host can launch its core")]
fn no_host_can_launch_core(fleet_context: &FleetContext) {
    fleet_context.gateway.respond(
        "--name chain_core",
        RemoteOutput::failure("Cannot connect to the Docker daemon"),
    );
}

#[given("host \"{host}\" cannot stop containers")]
fn host_cannot_stop(fleet_context: &FleetContext, host: String) {
    fleet_context
        .gateway
        .respond_on(&host, "docker stop", RemoteOutput::failure("no such container"));
}

#[when("I start the network \"{app}\" on \"{machines}\"")]
fn start_network(
    fleet_context: &FleetContext,
    app: String,
    machines: String,
) -> Result<StartOutcome, StepError> {
    let hosts = resolve_hosts(&machines).map_err(|err| StepError::Setup(err.to_string()))?;
    let request = StartRequest {
        app,
        base: fleet_context.base.clone(),
        machines: hosts,
        seed_machines: Vec::new(),
        no_app: false,
        publish_all: false,
    };
    let orchestrator = fleet_context.orchestrator();
    let result = runtime()?.block_on(async move { orchestrator.start(&request).await });
    Ok(match result {
        Ok(report) => StartOutcome {
            error: None,
            failed_hosts: report
                .provisioned
                .failures()
                .map(|(host, _)| host.to_string())
                .collect(),
            unplaced: report.unplaced.iter().map(ToString::to_string).collect(),
        },
        Err(err) => StartOutcome {
            error: Some(err.to_string()),
            ..StartOutcome::default()
        },
    })
}

#[when("I stop the network \"{app}\" on \"{machines}\"")]
fn stop_network(
    fleet_context: &FleetContext,
    app: String,
    machines: String,
) -> Result<LifecycleOutcome, StepError> {
    let hosts = resolve_hosts(&machines).map_err(|err| StepError::Setup(err.to_string()))?;
    let orchestrator = fleet_context.orchestrator();
    let report = runtime()?.block_on(async move { orchestrator.stop(&app, hosts, false).await });
    let failed_steps = report
        .outcomes()
        .iter()
        .map(|outcome| {
            let count = match &outcome.result {
                Ok(()) => 0,
                Err(FleetFailure::Failed(err)) => err.failures.len(),
                Err(_) => usize::MAX,
            };
            (outcome.host.to_string(), count)
        })
        .collect();
    Ok(LifecycleOutcome { failed_steps })
}

#[then("the start run succeeds")]
fn start_succeeds(start_outcome: &StartOutcome) -> Result<(), StepError> {
    if start_outcome.error.is_none()
        && start_outcome.failed_hosts.is_empty()
        && start_outcome.unplaced.is_empty()
    {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("degraded start: {start_outcome:?}")))
    }
}

#[then("the configuration id is \"{id}\"")]
fn configuration_id(fleet_context: &FleetContext, id: String) -> Result<(), StepError> {
    let stored = fleet_context.stored();
    if stored.get("id").and_then(Value::as_str) == Some(id.as_str()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("unexpected id in {stored}")))
    }
}

#[then("validator slot \"{index}\" is filled")]
fn slot_filled(fleet_context: &FleetContext, index: usize) -> Result<(), StepError> {
    let validator = slot(fleet_context, index)?;
    let has_key = validator.pointer("/validator/pub_key").is_some();
    let has_addr = validator
        .get("p2p_addr")
        .and_then(Value::as_str)
        .is_some_and(|addr| addr.ends_with(":46656"));
    if has_key && has_addr {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("slot {index} not filled: {validator}")))
    }
}

#[then("validator slot \"{index}\" is empty")]
fn slot_empty(fleet_context: &FleetContext, index: usize) -> Result<(), StepError> {
    let validator = slot(fleet_context, index)?;
    let addr = validator.get("p2p_addr").and_then(Value::as_str).unwrap_or_default();
    if addr.is_empty() && validator.pointer("/validator/pub_key").is_none() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("slot {index} was filled: {validator}")))
    }
}

fn expect_failed_hosts(start_outcome: &StartOutcome, count: usize) -> Result<(), StepError> {
    if start_outcome.failed_hosts.len() == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} failed hosts, got {:?}",
            start_outcome.failed_hosts
        )))
    }
}

#[then("\"{count}\" host is reported as failed")]
fn host_failed(start_outcome: &StartOutcome, count: usize) -> Result<(), StepError> {
    expect_failed_hosts(start_outcome, count)
}

#[then("\"{count}\" hosts are reported as failed")]
fn hosts_failed(start_outcome: &StartOutcome, count: usize) -> Result<(), StepError> {
    expect_failed_hosts(start_outcome, count)
}

#[then("host \"{host}\" is reported as unplaced")]
fn host_unplaced(start_outcome: &StartOutcome, host: String) -> Result<(), StepError> {
    if start_outcome.unplaced.iter().any(|line| line.contains(&host)) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "{host} missing from {:?}",
            start_outcome.unplaced
        )))
    }
}

fn expect_failed_steps(
    lifecycle_outcome: &LifecycleOutcome,
    host: &str,
    count: usize,
) -> Result<(), StepError> {
    match lifecycle_outcome.failed_steps.get(host) {
        Some(found) if *found == count => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected {count} failed steps on {host}, got {other:?}"
        ))),
    }
}

#[then("host \"{host}\" reports \"{count}\" failed steps")]
fn host_failed_steps(
    lifecycle_outcome: &LifecycleOutcome,
    host: String,
    count: usize,
) -> Result<(), StepError> {
    expect_failed_steps(lifecycle_outcome, &host, count)
}

#[then("host \"{host}\" stopped cleanly")]
fn host_stopped_cleanly(lifecycle_outcome: &LifecycleOutcome, host: String) -> Result<(), StepError> {
    expect_failed_steps(lifecycle_outcome, &host, 0)
}
