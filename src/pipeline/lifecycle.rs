//! Short per-host pipelines for containers that already exist.
//!
//! Unlike provisioning, these pipelines never poll and never stop early:
//! every step runs, and the host is reported as failed when any step failed.

use thiserror::Error;
use tracing::{debug, info};

use crate::gateway::Gateway;
use crate::hosts::HostName;

use super::commands::{self, ContainerSet};

/// A single step that did not succeed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StepFailure {
    /// Command (or machine-tool invocation) that failed.
    pub command: String,
    /// Diagnostic output.
    pub message: String,
}

/// Raised when one or more steps failed on a host.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{} of {attempted} steps failed on {host}: {}", .failures.len(), render(.failures))]
pub struct LifecycleError {
    /// Host the steps ran on.
    pub host: HostName,
    /// Number of steps attempted.
    pub attempted: usize,
    /// Every step that failed, in execution order.
    pub failures: Vec<StepFailure>,
}

fn render(failures: &[StepFailure]) -> String {
    failures
        .iter()
        .map(|failure| format!("`{}`: {}", failure.command, failure.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Runs each remote command in order, collecting stdout and failures.
///
/// # Errors
///
/// Returns [`LifecycleError`] listing every failed step.
pub async fn run_steps<G>(
    gateway: &G,
    host: &HostName,
    steps: &[String],
) -> Result<String, LifecycleError>
where
    G: Gateway + ?Sized,
{
    let mut stdout = String::new();
    let mut failures = Vec::new();
    for command in steps {
        debug!(host = %host, command = %command, "running step");
        let output = gateway.execute(host, command).await;
        if output.succeeded {
            stdout.push_str(&output.stdout);
        } else {
            failures.push(StepFailure {
                command: command.clone(),
                message: output.diagnostic(),
            });
        }
    }
    finish(host, steps.len(), failures, stdout)
}

/// Runs a machine-tool subcommand for `host`, appending the host name to
/// `args` the way `create`, `provision` and `rm` expect it.
///
/// # Errors
///
/// Returns [`LifecycleError`] when the invocation fails.
pub async fn run_machine<G>(
    gateway: &G,
    host: &HostName,
    args: &[String],
) -> Result<String, LifecycleError>
where
    G: Gateway + ?Sized,
{
    let mut full = args.to_vec();
    full.push(host.to_string());
    let output = gateway.machine(&full).await;
    let failures = if output.succeeded {
        Vec::new()
    } else {
        vec![StepFailure {
            command: full.join(" "),
            message: output.diagnostic(),
        }]
    };
    finish(host, 1, failures, output.stdout)
}

fn finish(
    host: &HostName,
    attempted: usize,
    failures: Vec<StepFailure>,
    stdout: String,
) -> Result<String, LifecycleError> {
    if failures.is_empty() {
        info!(host = %host, steps = attempted, "steps completed");
        return Ok(stdout);
    }
    Err(LifecycleError {
        host: host.clone(),
        attempted,
        failures,
    })
}

/// Starts the existing app (unless `no_app`) and core containers.
///
/// # Errors
///
/// Returns [`LifecycleError`] when any start failed.
pub async fn restart<G>(
    gateway: &G,
    host: &HostName,
    containers: &ContainerSet,
    no_app: bool,
) -> Result<(), LifecycleError>
where
    G: Gateway + ?Sized,
{
    let mut steps = Vec::with_capacity(2);
    if !no_app {
        steps.push(commands::start(&containers.app));
    }
    steps.push(commands::start(&containers.core));
    run_steps(gateway, host, &steps).await.map(drop)
}

/// Stops the core container, then the app container (unless `no_app`).
///
/// # Errors
///
/// Returns [`LifecycleError`] when any stop failed.
pub async fn stop<G>(
    gateway: &G,
    host: &HostName,
    containers: &ContainerSet,
    no_app: bool,
) -> Result<(), LifecycleError>
where
    G: Gateway + ?Sized,
{
    let mut steps = vec![commands::stop(&containers.core)];
    if !no_app {
        steps.push(commands::stop(&containers.app));
    }
    run_steps(gateway, host, &steps).await.map(drop)
}

/// Removes all four containers and their anonymous volumes.
///
/// With `force`, the data, core and app containers are stopped first; those
/// stops are best effort, since a container may already be stopped or may
/// never have been started in no-app mode.
///
/// # Errors
///
/// Returns [`LifecycleError`] when any removal failed.
pub async fn remove<G>(
    gateway: &G,
    host: &HostName,
    containers: &ContainerSet,
    force: bool,
) -> Result<(), LifecycleError>
where
    G: Gateway + ?Sized,
{
    if force {
        let stops = [
            commands::stop(&containers.data),
            commands::stop(&containers.core),
            commands::stop(&containers.app),
        ];
        if let Err(err) = run_steps(gateway, host, &stops).await {
            debug!(host = %host, error = %err, "force stop before removal was incomplete");
        }
    }
    let steps = [
        commands::remove(&containers.common),
        commands::remove(&containers.data),
        commands::remove(&containers.app),
        commands::remove(&containers.core),
    ];
    run_steps(gateway, host, &steps).await.map(drop)
}

/// Runs `docker ARGS` on the host and returns its output.
///
/// # Errors
///
/// Returns [`LifecycleError`] when the command failed.
pub async fn docker<G>(gateway: &G, host: &HostName, args: &[String]) -> Result<String, LifecycleError>
where
    G: Gateway + ?Sized,
{
    run_steps(gateway, host, &[commands::docker(args)]).await
}
