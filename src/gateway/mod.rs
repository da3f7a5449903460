//! Remote command gateway built on the `docker-machine` client.
//!
//! The gateway hides how commands reach a host. The provisioning pipeline
//! only needs two primitives: run a shell command on a host and run a
//! machine-tool subcommand locally. File pushes, address lookups and port
//! lookups are layered on top of those two primitives as provided methods,
//! so test doubles only have to script the primitives.

use std::ffi::OsString;
use std::future::Future;
use std::pin::Pin;

use camino::Utf8PathBuf;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::hosts::HostName;

mod ports;
mod runner;
pub mod shell;

pub use ports::PortMap;
pub use runner::{CommandOutput, CommandRunner, ProcessCommandRunner, RunnerError, RunnerFuture};
use shell::quote;

/// Default machine tool binary.
pub const DEFAULT_MACHINE_BIN: &str = "docker-machine";

/// Output of a command executed through the gateway.
///
/// Transport failures and non-zero exits are folded into `succeeded = false`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RemoteOutput {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error, or the transport error message.
    pub stderr: String,
    /// Whether the command ran and exited with status zero.
    pub succeeded: bool,
}

impl RemoteOutput {
    /// Builds a successful output carrying `stdout`.
    #[must_use]
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            succeeded: true,
        }
    }

    /// Builds a failed output carrying `stderr`.
    #[must_use]
    pub fn failure(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            succeeded: false,
        }
    }

    /// Returns the most useful diagnostic text for a failed command.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_owned()
        } else {
            stderr.to_owned()
        }
    }
}

/// Errors raised by the provided gateway operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum GatewayError {
    /// Raised when a command issued on behalf of an operation fails.
    #[error("{operation} failed on {host}: {message}")]
    Command {
        /// Host the command targeted.
        host: String,
        /// Short operation label (for example `docker cp`).
        operation: String,
        /// Diagnostic output from the command.
        message: String,
    },
    /// Raised when the machine tool reports an empty address.
    #[error("machine tool returned no address for {host}")]
    MissingAddress {
        /// Host whose address was requested.
        host: String,
    },
}

/// Future returned by gateway operations.
pub type GatewayFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Description of a local file or directory pushed into a host's shared
/// volume container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FilePush {
    /// Local source path.
    pub source: Utf8PathBuf,
    /// Destination path inside the volume container.
    pub destination: String,
    /// Copy the contents of `source` rather than the directory itself.
    pub contents_only: bool,
    /// Container holding the shared volumes.
    pub volume_container: String,
    /// Image used for the throwaway ownership-fixing container.
    pub image: String,
    /// User that must own the pushed files.
    pub owner: String,
}

/// Executes commands against fleet hosts.
pub trait Gateway: Send + Sync {
    /// Runs `command` through a remote shell on `host`.
    fn execute<'a>(&'a self, host: &'a HostName, command: &'a str) -> GatewayFuture<'a, RemoteOutput>;

    /// Runs a machine-tool subcommand such as `ip`, `scp` or `create`.
    fn machine<'a>(&'a self, args: &'a [String]) -> GatewayFuture<'a, RemoteOutput>;

    /// Pushes a local path into the host's volume container.
    ///
    /// The path is copied to a temporary location on the host, copied into
    /// the volume container, re-owned for the container user and finally
    /// removed from the host on a best-effort basis.
    fn copy<'a>(
        &'a self,
        host: &'a HostName,
        push: &'a FilePush,
    ) -> GatewayFuture<'a, Result<(), GatewayError>> {
        Box::pin(async move {
            let temp = format!("fleetmesh_upload_{}", Uuid::new_v4().simple());
            let scp_args = [
                String::from("scp"),
                String::from("-r"),
                push.source.to_string(),
                format!("{host}:{temp}"),
            ];
            let scp = self.machine(&scp_args).await;
            require_success(host, "scp", &scp)?;

            let staged = if push.contents_only {
                format!("{temp}/.")
            } else {
                temp.clone()
            };
            let destination = quote(&push.destination);
            let docker_cp = format!(
                "docker cp {staged} {}:{destination}",
                quote(&push.volume_container)
            );
            require_success(host, "docker cp", &self.execute(host, &docker_cp).await)?;

            let chown = format!(
                "docker run --rm --volumes-from {} -u root {} chown -R {owner}:{owner} {destination}",
                quote(&push.volume_container),
                quote(&push.image),
                owner = quote(&push.owner),
            );
            require_success(host, "chown", &self.execute(host, &chown).await)?;

            let cleanup = self.execute(host, &format!("rm -rf {temp}")).await;
            if !cleanup.succeeded {
                debug!(host = %host, temp = %temp, "temporary upload was not removed");
            }
            Ok(())
        })
    }

    /// Resolves the network address of `host`.
    fn address<'a>(&'a self, host: &'a HostName) -> GatewayFuture<'a, Result<String, GatewayError>> {
        Box::pin(async move {
            let args = [String::from("ip"), host.to_string()];
            let output = self.machine(&args).await;
            require_success(host, "address lookup", &output)?;
            let address = output.stdout.trim();
            if address.is_empty() {
                return Err(GatewayError::MissingAddress {
                    host: host.to_string(),
                });
            }
            Ok(address.to_owned())
        })
    }

    /// Lists the published ports of `container` on `host`.
    fn container_ports<'a>(
        &'a self,
        host: &'a HostName,
        container: &'a str,
    ) -> GatewayFuture<'a, Result<PortMap, GatewayError>> {
        Box::pin(async move {
            let command = format!("docker port {}", quote(container));
            let output = self.execute(host, &command).await;
            require_success(host, "docker port", &output)?;
            Ok(PortMap::parse(&output.stdout))
        })
    }
}

fn require_success(
    host: &HostName,
    operation: &str,
    output: &RemoteOutput,
) -> Result<(), GatewayError> {
    if output.succeeded {
        return Ok(());
    }
    Err(GatewayError::Command {
        host: host.to_string(),
        operation: operation.to_owned(),
        message: output.diagnostic(),
    })
}

/// Gateway that shells out to the machine tool (`docker-machine` by default).
#[derive(Clone, Debug)]
pub struct MachineGateway<R: CommandRunner> {
    machine_bin: String,
    runner: R,
}

impl MachineGateway<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    #[must_use]
    pub fn with_process_runner(machine_bin: impl Into<String>) -> Self {
        Self::new(machine_bin, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> MachineGateway<R> {
    /// Creates a gateway that invokes `machine_bin` through `runner`.
    #[must_use]
    pub fn new(machine_bin: impl Into<String>, runner: R) -> Self {
        Self {
            machine_bin: machine_bin.into(),
            runner,
        }
    }

    async fn invoke(&self, args: Vec<OsString>) -> RemoteOutput {
        debug!(program = %self.machine_bin, args = ?args, "running machine command");
        match self.runner.run(&self.machine_bin, &args).await {
            Ok(output) => RemoteOutput {
                succeeded: output.is_success(),
                stdout: output.stdout,
                stderr: output.stderr,
            },
            Err(err) => RemoteOutput::failure(err.to_string()),
        }
    }
}

impl<R: CommandRunner> Gateway for MachineGateway<R> {
    fn execute<'a>(&'a self, host: &'a HostName, command: &'a str) -> GatewayFuture<'a, RemoteOutput> {
        Box::pin(async move {
            let args = vec![
                OsString::from("ssh"),
                OsString::from(host.as_str()),
                OsString::from(command),
            ];
            self.invoke(args).await
        })
    }

    fn machine<'a>(&'a self, args: &'a [String]) -> GatewayFuture<'a, RemoteOutput> {
        Box::pin(async move { self.invoke(args.iter().map(OsString::from).collect()).await })
    }
}
