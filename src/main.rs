//! Binary entry point for the fleetmesh CLI.

use std::fmt::Display;
use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use fleetmesh::{
    ConfigError, ControlError, FleetConfig, FleetReport, HostRangeError,
    HttpControlClient, MachineGateway, Orchestrator, ProcessCommandRunner, StartError,
    StartReport, StartRequest, resolve_hosts,
};

mod cli;

use cli::{Cli, Selection, StartCommand};

type Fleetmesh = Orchestrator<MachineGateway<ProcessCommandRunner>, HttpControlClient>;

#[derive(Debug, Error)]
enum CliError {
    #[error("invalid host list: {0}")]
    Hosts(#[from] HostRangeError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("control client error: {0}")]
    Control(#[from] ControlError),
    #[error(transparent)]
    Start(#[from] StartError),
    #[error("{failed} of {total} hosts failed")]
    HostsFailed { failed: usize, total: usize },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Start(command) => run_start(command).await,
        Cli::Restart(command) => {
            let hosts = resolve_hosts(&command.selection.machines)?;
            let report = build()?.restart(&command.app, hosts, command.no_app).await;
            finish(&report, command.selection.require_all, |_| String::from("started"))
        }
        Cli::Stop(command) => {
            let hosts = resolve_hosts(&command.selection.machines)?;
            let report = build()?.stop(&command.app, hosts, command.no_app).await;
            finish(&report, command.selection.require_all, |_| String::from("stopped"))
        }
        Cli::Rm(command) => {
            let hosts = resolve_hosts(&command.selection.machines)?;
            let report = build()?.remove(&command.app, hosts, command.force).await;
            finish(&report, command.selection.require_all, |_| String::from("removed"))
        }
        Cli::Ports(command) => {
            let hosts = resolve_hosts(&command.selection.machines)?;
            let report = build()?.ports(&command.app, hosts).await;
            finish(&report, command.selection.require_all, |ports| {
                format!("\n{ports}").trim_end().to_owned()
            })
        }
        Cli::Docker(command) => {
            let hosts = resolve_hosts(&command.selection.machines)?;
            let report = build()?.docker(hosts, command.args).await;
            finish(&report, command.selection.require_all, |out| render_output(out))
        }
        Cli::Create(command) => {
            let hosts = resolve_hosts(&command.selection.machines)?;
            let report = build()?.create_machines(hosts, command.args).await;
            finish(&report, true, |out| render_output(out))
        }
        Cli::Provision(command) => {
            let hosts = resolve_hosts(&command.selection.machines)?;
            let report = build()?.provision_machines(hosts, command.args).await;
            finish(&report, true, |out| render_output(out))
        }
        Cli::Destroy(Selection {
            machines,
            require_all,
        }) => {
            let hosts = resolve_hosts(&machines)?;
            let report = build()?.destroy_machines(hosts).await;
            finish(&report, require_all, |_| String::from("removed"))
        }
    }
}

fn build() -> Result<Fleetmesh, CliError> {
    let config = FleetConfig::load_without_cli_args()?;
    let settings = config.pipeline_settings()?;
    let gateway = MachineGateway::with_process_runner(config.machine_bin.clone());
    let control = HttpControlClient::new(config.request_timeout())?;
    Ok(Orchestrator::new(gateway, control, settings).with_fleet(config.fleet()))
}

async fn run_start(command: StartCommand) -> Result<i32, CliError> {
    let machines = resolve_hosts(&command.selection.machines)?;
    let seed_machines = match command.seed_machines.as_deref() {
        Some(expression) => resolve_hosts(expression)?,
        None => Vec::new(),
    };
    let request = StartRequest {
        app: command.app,
        base: Utf8PathBuf::from(command.base),
        machines,
        seed_machines,
        no_app: command.no_app,
        publish_all: command.publish_all,
    };

    let report = build()?.start(&request).await?;
    write_start_report(io::stdout(), &request.app, &report);
    if command.selection.require_all && report.is_degraded() {
        return Err(CliError::HostsFailed {
            failed: report.provisioned.failure_count() + report.unplaced.len(),
            total: request.machines.len(),
        });
    }
    Ok(0)
}

fn render_output(stdout: &str) -> String {
    let trimmed = stdout.trim_end();
    if trimmed.is_empty() {
        String::from("ok")
    } else {
        format!("ok\n{trimmed}")
    }
}

fn finish<T, E: Display>(
    report: &FleetReport<T, E>,
    strict: bool,
    describe: impl Fn(&T) -> String,
) -> Result<i32, CliError> {
    write_report(io::stdout(), report, describe);
    let failed = report.failure_count();
    if strict && failed > 0 {
        return Err(CliError::HostsFailed {
            failed,
            total: report.len(),
        });
    }
    Ok(0)
}

fn write_report<T, E: Display>(
    mut target: impl Write,
    report: &FleetReport<T, E>,
    describe: impl Fn(&T) -> String,
) {
    let mut outcomes = report.outcomes().iter().collect::<Vec<_>>();
    outcomes.sort_by_key(|outcome| outcome.ordinal);
    for outcome in outcomes {
        let line = match &outcome.result {
            Ok(value) => describe(value),
            Err(err) => format!("FAILED: {err}"),
        };
        writeln!(target, "{}: {line}", outcome.host).ok();
    }
}

fn write_start_report(mut target: impl Write, app: &str, report: &StartReport) {
    write_report(&mut target, &report.provisioned, |node| {
        format!("p2p {} rpc {}", node.endpoint.p2p_addr, node.endpoint.rpc_addr)
    });
    for unplaced in &report.unplaced {
        writeln!(target, "not recorded: {unplaced}").ok();
    }
    writeln!(target, "wrote {}", report.config_path).ok();
    if let Some(dialed) = &report.dialed {
        for (host, err) in dialed.failures() {
            writeln!(target, "{host}: seed dial FAILED: {err}").ok();
        }
    }
    let verdict = if report.is_degraded() {
        "with failures"
    } else {
        "successfully"
    };
    writeln!(target, "launched network for {app} {verdict}").ok();
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
