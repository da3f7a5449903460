//! Per-host provisioning pipeline.
//!
//! A host moves through [`Stage`]s strictly in order. Each stage is a short
//! sequence of gateway calls, some of which poll for readiness. The first
//! failing stage ends the pipeline for that host and is reported as a
//! [`HostFailure`]; sibling hosts are unaffected.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::control::ControlClient;
use crate::gateway::{FilePush, Gateway, GatewayError};
use crate::hosts::HostName;
use crate::poll::{Backoff, PollError, PollPolicy, poll_until, poll_until_ready};
use crate::topology::{NodeEndpoint, ProvisionedNode, PublicKey, ValidatorIdentity};

mod commands;
mod lifecycle;

pub use commands::{ContainerSet, NULL_APP};
pub use lifecycle::{
    LifecycleError, StepFailure, docker, remove, restart, run_machine, run_steps, stop,
};

/// Default container image.
pub const DEFAULT_IMAGE: &str = "tendermint/tmbase";
/// Default user owning files inside the containers.
pub const DEFAULT_CONTAINER_USER: &str = "tmuser";
/// Default root of the shared volume inside the containers.
pub const DEFAULT_REMOTE_ROOT: &str = "/data/tendermint";
/// Default command printing the node's public key inside the core container.
pub const DEFAULT_IDENTITY_COMMAND: &str = "tendermint show_validator --log_level=error";

/// Container ports used by the node processes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NodePorts {
    /// Peer-to-peer port.
    pub p2p: u16,
    /// Control/RPC port.
    pub rpc: u16,
    /// Port the application listens on for the core.
    pub app: u16,
}

impl Default for NodePorts {
    fn default() -> Self {
        Self {
            p2p: 46656,
            rpc: 46657,
            app: 46658,
        }
    }
}

/// Fleet-wide settings shared by every host pipeline.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PipelineSettings {
    /// Image used for every container.
    pub image: String,
    /// User that owns pushed files.
    pub container_user: String,
    /// Root of the shared volume.
    pub remote_root: String,
    /// Command run inside the core container to print its public key.
    pub identity_command: String,
    /// Container ports.
    pub ports: NodePorts,
    /// Readiness poll for the data-store socket.
    pub marker_poll: PollPolicy,
    /// Pause between launching the core and the first identity check.
    pub install_grace: Duration,
    /// Poll for the core's public key.
    pub identity_poll: PollPolicy,
    /// Poll confirming the key through the control endpoint.
    pub status_poll: PollPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_owned(),
            container_user: DEFAULT_CONTAINER_USER.to_owned(),
            remote_root: DEFAULT_REMOTE_ROOT.to_owned(),
            identity_command: DEFAULT_IDENTITY_COMMAND.to_owned(),
            ports: NodePorts::default(),
            marker_poll: PollPolicy::attempts(9, Backoff::Linear(Duration::from_secs(1))),
            install_grace: Duration::from_secs(10),
            identity_poll: PollPolicy::until(
                Duration::from_secs(300),
                Backoff::Retry(Duration::from_secs(5)),
            ),
            status_poll: PollPolicy::attempts(5, Backoff::Fixed(Duration::from_secs(1))),
        }
    }
}

/// What to bring up on each host during one start run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionPlan {
    /// Application name, used as the container name prefix.
    pub app: String,
    /// Local base directory holding `data`, `app`, `core` and per-host dirs.
    pub base: Utf8PathBuf,
    /// Seed addresses handed to every core.
    pub seeds: Vec<String>,
    /// Skip the data and app services and run the core with a null app.
    pub no_app: bool,
    /// Let the container runtime choose host ports.
    pub publish_all: bool,
}

/// Pipeline states, in the order a host passes through them.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Stage {
    /// Nothing has run yet.
    Start,
    /// The volume-owning container exists.
    CommonContainerReady,
    /// Configuration files were pushed into the shared volume.
    FilesCopied,
    /// The data store is running and its socket exists.
    DataServiceReady,
    /// The application service is running.
    AppServiceReady,
    /// The core container was launched.
    CoreServiceLaunched,
    /// The core printed its public key.
    IdentityDiscovered,
    /// Addresses are known and the control endpoint confirmed the key.
    EndpointResolved,
    /// The host is fully provisioned.
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Start => "start",
            Self::CommonContainerReady => "common container",
            Self::FilesCopied => "file copy",
            Self::DataServiceReady => "data service",
            Self::AppServiceReady => "app service",
            Self::CoreServiceLaunched => "core launch",
            Self::IdentityDiscovered => "identity discovery",
            Self::EndpointResolved => "endpoint resolution",
            Self::Done => "done",
        };
        f.write_str(label)
    }
}

/// Errors raised inside a single stage.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StageError {
    /// Raised when a remote command exits unsuccessfully.
    #[error("`{command}` failed: {message}")]
    Remote {
        /// Command that was run on the host.
        command: String,
        /// Diagnostic output.
        message: String,
    },
    /// Raised by file pushes, address lookups and port lookups.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    /// Raised when a readiness poll gives up.
    #[error("{check} never became ready: {source}")]
    Poll {
        /// What was being waited for.
        check: &'static str,
        /// Why polling stopped.
        source: PollError,
    },
    /// Raised when a published port is missing from the container's map.
    #[error("no host port is published for container port {port}")]
    PortMappingMissing {
        /// Container port without a mapping.
        port: u16,
    },
    /// Raised when the control endpoint never answered a status query.
    #[error("status at {endpoint} never confirmed the node identity: {source}")]
    IdentityUnconfirmed {
        /// Control endpoint queried.
        endpoint: String,
        /// Why polling stopped.
        source: PollError,
    },
    /// Raised when the control endpoint reports a different key.
    #[error("node reported key {reported} but discovery returned {discovered}")]
    IdentityMismatch {
        /// Key printed by the identity command.
        discovered: PublicKey,
        /// Key reported by the status endpoint.
        reported: PublicKey,
    },
}

/// Failure of a host pipeline, tagged with the stage being entered.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{host} failed during {stage}: {error}")]
pub struct HostFailure {
    /// Host whose pipeline failed.
    pub host: HostName,
    /// Stage the host was moving into.
    pub stage: Stage,
    /// Underlying error.
    #[source]
    pub error: StageError,
}

async fn enter<T, Fut>(host: &HostName, stage: Stage, work: Fut) -> Result<T, HostFailure>
where
    Fut: Future<Output = Result<T, StageError>>,
{
    debug!(host = %host, stage = %stage, "entering stage");
    work.await.map_err(|error| HostFailure {
        host: host.clone(),
        stage,
        error,
    })
}

/// Drives single hosts through provisioning.
#[derive(Debug)]
pub struct HostPipeline<G, C> {
    gateway: Arc<G>,
    control: Arc<C>,
    settings: PipelineSettings,
    plan: ProvisionPlan,
    containers: ContainerSet,
}

impl<G: Gateway, C: ControlClient> HostPipeline<G, C> {
    /// Creates a pipeline for one start run.
    #[must_use]
    pub fn new(
        gateway: Arc<G>,
        control: Arc<C>,
        settings: PipelineSettings,
        plan: ProvisionPlan,
    ) -> Self {
        let containers = ContainerSet::for_app(&plan.app);
        Self {
            gateway,
            control,
            settings,
            plan,
            containers,
        }
    }

    /// Container names used by this run.
    #[must_use]
    pub const fn containers(&self) -> &ContainerSet {
        &self.containers
    }

    /// Provisions `host` and returns its identity and endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`HostFailure`] naming the first stage that failed.
    pub async fn provision(&self, host: &HostName) -> Result<ProvisionedNode, HostFailure> {
        info!(host = %host, app = %self.plan.app, "provisioning host");
        enter(host, Stage::CommonContainerReady, self.start_common(host)).await?;
        enter(host, Stage::FilesCopied, self.copy_files(host)).await?;
        if self.plan.no_app {
            debug!(host = %host, "no-app mode: skipping data and app services");
        } else {
            enter(host, Stage::DataServiceReady, self.start_data(host)).await?;
            enter(host, Stage::AppServiceReady, self.start_app(host)).await?;
        }
        enter(host, Stage::CoreServiceLaunched, self.start_core(host)).await?;
        let discovered = enter(host, Stage::IdentityDiscovered, self.discover_identity(host)).await?;
        let node = enter(
            host,
            Stage::EndpointResolved,
            self.resolve_endpoint(host, discovered),
        )
        .await?;
        info!(
            host = %host,
            stage = %Stage::Done,
            p2p = %node.endpoint.p2p_addr,
            rpc = %node.endpoint.rpc_addr,
            "host provisioned"
        );
        Ok(node)
    }

    async fn run_remote(&self, host: &HostName, command: &str) -> Result<(), StageError> {
        let output = self.gateway.execute(host, command).await;
        if output.succeeded {
            return Ok(());
        }
        Err(StageError::Remote {
            command: command.to_owned(),
            message: output.diagnostic(),
        })
    }

    async fn start_common(&self, host: &HostName) -> Result<(), StageError> {
        let command = commands::run_common(&self.containers, &self.settings.image);
        self.run_remote(host, &command).await
    }

    async fn copy_files(&self, host: &HostName) -> Result<(), StageError> {
        let base = &self.plan.base;
        let sources = [
            (base.join("data"), "data"),
            (base.join("app"), "app"),
            (base.join("core"), "core"),
            (base.join(host.as_str()).join("core"), "core"),
        ];
        for (source, sub) in sources {
            let push = FilePush {
                source,
                destination: commands::remote_dir(&self.settings.remote_root, sub),
                contents_only: true,
                volume_container: self.containers.common.clone(),
                image: self.settings.image.clone(),
                owner: self.settings.container_user.clone(),
            };
            self.gateway.copy(host, &push).await?;
        }
        Ok(())
    }

    async fn start_data(&self, host: &HostName) -> Result<(), StageError> {
        self.run_remote(host, &commands::run_data(&self.containers, &self.settings))
            .await?;
        let marker = commands::data_marker(&self.containers, &self.settings);
        let check = marker.as_str();
        poll_until_ready(self.settings.marker_poll, move |_| async move {
            self.gateway.execute(host, check).await.succeeded
        })
        .await
        .map_err(|source| StageError::Poll {
            check: "data socket",
            source,
        })
    }

    async fn start_app(&self, host: &HostName) -> Result<(), StageError> {
        self.run_remote(host, &commands::run_app(&self.containers, &self.settings))
            .await
    }

    async fn start_core(&self, host: &HostName) -> Result<(), StageError> {
        let command = commands::run_core(&self.containers, &self.settings, &self.plan, host.as_str());
        self.run_remote(host, &command).await
    }

    async fn discover_identity(&self, host: &HostName) -> Result<PublicKey, StageError> {
        sleep(self.settings.install_grace).await;
        let command = commands::identity(&self.containers, &self.settings.identity_command);
        let check = command.as_str();
        let key = poll_until(self.settings.identity_poll, move |attempt| async move {
            let output = self.gateway.execute(host, check).await;
            let printed = output.stdout.trim();
            if output.succeeded && !printed.is_empty() {
                return Some(PublicKey::from_output(printed));
            }
            warn!(host = %host, attempt, "node identity not available yet; waiting");
            None
        })
        .await
        .map_err(|source| StageError::Poll {
            check: "node identity",
            source,
        })?;
        info!(host = %host, key = %key, "discovered node identity");
        Ok(key)
    }

    async fn resolve_endpoint(
        &self,
        host: &HostName,
        discovered: PublicKey,
    ) -> Result<ProvisionedNode, StageError> {
        let address = self.gateway.address(host).await?;
        let ports = self.settings.ports;
        let (p2p_port, rpc_port) = if self.plan.publish_all {
            let published = self
                .gateway
                .container_ports(host, &self.containers.core)
                .await?;
            let lookup = |port: u16| {
                published
                    .host_port(port)
                    .ok_or(StageError::PortMappingMissing { port })
            };
            (lookup(ports.p2p)?, lookup(ports.rpc)?)
        } else {
            (ports.p2p, ports.rpc)
        };
        let endpoint = NodeEndpoint {
            p2p_addr: format!("{address}:{p2p_port}"),
            rpc_addr: format!("{address}:{rpc_port}"),
        };

        let rpc = endpoint.rpc_addr.as_str();
        let status = poll_until(self.settings.status_poll, move |attempt| async move {
            match self.control.status(rpc).await {
                Ok(status) => Some(status),
                Err(err) => {
                    debug!(host = %host, attempt, error = %err, "status not available yet");
                    None
                }
            }
        })
        .await
        .map_err(|source| StageError::IdentityUnconfirmed {
            endpoint: rpc.to_owned(),
            source,
        })?;

        if status.pub_key != discovered {
            return Err(StageError::IdentityMismatch {
                discovered,
                reported: status.pub_key,
            });
        }

        Ok(ProvisionedNode {
            identity: ValidatorIdentity {
                id: host.to_string(),
                pub_key: Some(status.pub_key),
            },
            endpoint,
        })
    }
}
