//! Command-line interface definitions for the `fleetmesh` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level CLI for the `fleetmesh` binary.
#[derive(Debug, Parser)]
#[command(
    name = "fleetmesh",
    about = "Stand up multi-host test networks on docker-machine hosts",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Provision every host, record the topology and link the mesh.
    #[command(name = "start", about = "Provision hosts and record the network topology")]
    Start(StartCommand),
    /// Start the existing containers again.
    #[command(name = "restart", about = "Start existing app and core containers")]
    Restart(ServicesCommand),
    /// Stop the core and app containers.
    #[command(name = "stop", about = "Stop core and app containers")]
    Stop(ServicesCommand),
    /// Remove the application's containers and their volumes.
    #[command(name = "rm", about = "Remove an application's containers")]
    Rm(RmCommand),
    /// Show the published ports of each core container.
    #[command(name = "ports", about = "List published core ports on each host")]
    Ports(AppCommand),
    /// Run a docker command on every host.
    #[command(name = "docker", about = "Run a docker command on every host")]
    Docker(PassthroughCommand),
    /// Create one machine per host name.
    #[command(name = "create", about = "Create machines with docker-machine")]
    Create(PassthroughCommand),
    /// Re-provision existing machines.
    #[command(name = "provision", about = "Re-provision machines with docker-machine")]
    Provision(PassthroughCommand),
    /// Delete machines.
    #[command(name = "destroy", about = "Remove machines with docker-machine")]
    Destroy(Selection),
}

/// Host selection shared by every subcommand.
#[derive(Debug, Args)]
pub(crate) struct Selection {
    /// Host range expression, for example `mach[1-4]` or `a;b[0,3-5]`.
    #[arg(long, value_name = "HOSTS", default_value = "mach[1-4]")]
    pub(crate) machines: String,
    /// Exit with status 1 when any host fails.
    #[arg(long)]
    pub(crate) require_all: bool,
}

/// Arguments for `fleetmesh start`.
#[derive(Debug, Parser)]
pub(crate) struct StartCommand {
    /// Application name, used as the container prefix and network id.
    pub(crate) app: String,
    /// Base directory holding `chain_config.json` and the node files.
    pub(crate) base: String,
    /// Hosts whose addresses seed the mesh; defaults to `--machines`.
    #[arg(long, value_name = "HOSTS")]
    pub(crate) seed_machines: Option<String>,
    /// Let docker choose host ports, then have nodes dial each other.
    #[arg(short = 'P', long)]
    pub(crate) publish_all: bool,
    /// Skip the data and app services and run the core with a null app.
    #[arg(long)]
    pub(crate) no_app: bool,
    #[command(flatten)]
    pub(crate) selection: Selection,
}

/// Arguments for `fleetmesh restart` and `fleetmesh stop`.
#[derive(Debug, Parser)]
pub(crate) struct ServicesCommand {
    /// Application name.
    pub(crate) app: String,
    /// The network runs the core alone, without an app container.
    #[arg(long)]
    pub(crate) no_app: bool,
    #[command(flatten)]
    pub(crate) selection: Selection,
}

/// Arguments for subcommands that only need an application name.
#[derive(Debug, Parser)]
pub(crate) struct AppCommand {
    /// Application name.
    pub(crate) app: String,
    #[command(flatten)]
    pub(crate) selection: Selection,
}

/// Arguments for `fleetmesh rm`.
#[derive(Debug, Parser)]
pub(crate) struct RmCommand {
    /// Application name.
    pub(crate) app: String,
    /// Stop running containers before removing them.
    #[arg(long)]
    pub(crate) force: bool,
    #[command(flatten)]
    pub(crate) selection: Selection,
}

/// Arguments for subcommands forwarding extra arguments to a tool.
#[derive(Debug, Parser)]
pub(crate) struct PassthroughCommand {
    #[command(flatten)]
    pub(crate) selection: Selection,
    /// Arguments passed through unchanged (use -- to separate flags).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub(crate) args: Vec<String>,
}
