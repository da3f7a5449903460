//! BDD scenarios for fleet provisioning.

use rstest_bdd_macros::scenario;

use super::test_helpers::{
    FleetContext, LifecycleOutcome, StartOutcome, fleet_context, lifecycle_outcome,
    start_outcome,
};

#[scenario(
    path = "tests/features/fleet.feature",
    name = "Provision every host and record the topology"
)]
fn scenario_provision_every_host(fleet_context: FleetContext, start_outcome: StartOutcome) {
    drop((fleet_context, start_outcome));
}

#[scenario(
    path = "tests/features/fleet.feature",
    name = "A failing host does not stop its siblings"
)]
fn scenario_failing_host_isolated(fleet_context: FleetContext, start_outcome: StartOutcome) {
    drop((fleet_context, start_outcome));
}

#[scenario(
    path = "tests/features/fleet.feature",
    name = "A run where no host succeeds still records the configuration"
)]
fn scenario_no_host_succeeds(fleet_context: FleetContext, start_outcome: StartOutcome) {
    drop((fleet_context, start_outcome));
}

#[scenario(
    path = "tests/features/fleet.feature",
    name = "Hosts beyond the configured slots are reported"
)]
fn scenario_extra_hosts_reported(fleet_context: FleetContext, start_outcome: StartOutcome) {
    drop((fleet_context, start_outcome));
}

#[scenario(
    path = "tests/features/fleet.feature",
    name = "Stopping reports every failed step"
)]
fn scenario_stop_reports_steps(fleet_context: FleetContext, lifecycle_outcome: LifecycleOutcome) {
    drop((fleet_context, lifecycle_outcome));
}
