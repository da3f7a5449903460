//! User-facing fleet operations.
//!
//! [`Orchestrator`] wires the host pipelines, the fleet coordinator and the
//! topology store together. Run-level problems (unreadable topology, a seed
//! host without an address, a failed write) abort the operation; per-host
//! problems are collected in the returned reports.

use std::sync::Arc;

use camino::Utf8PathBuf;
use thiserror::Error;
use tracing::{info, warn};

use crate::control::{ControlClient, ControlError};
use crate::fleet::{Fleet, FleetReport};
use crate::gateway::{Gateway, GatewayError, PortMap};
use crate::hosts::HostName;
use crate::pipeline::{
    self, ContainerSet, HostFailure, HostPipeline, LifecycleError, PipelineSettings, ProvisionPlan,
};
use crate::topology::{
    AssemblyError, ProvisionedNode, TopologyStore, TopologyStoreError, assemble, release,
};

/// Report of a short lifecycle operation across the fleet.
pub type LifecycleReport<T> = FleetReport<T, LifecycleError>;

/// Inputs of a start run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StartRequest {
    /// Application name; becomes the network id and container prefix.
    pub app: String,
    /// Base directory prepared by chain initialisation.
    pub base: Utf8PathBuf,
    /// Hosts to provision, in validator-slot order.
    pub machines: Vec<HostName>,
    /// Hosts whose addresses seed the mesh; empty means `machines`.
    pub seed_machines: Vec<HostName>,
    /// Run the core with a null application.
    pub no_app: bool,
    /// Let the container runtime pick host ports and dial seeds afterwards.
    pub publish_all: bool,
}

/// Run-level failures of a start run.
#[derive(Debug, Error)]
pub enum StartError {
    /// Raised when the existing topology cannot be loaded.
    #[error("failed to read network configuration: {0}")]
    ReadConfig(#[source] TopologyStoreError),
    /// Raised when a seed host's address cannot be resolved.
    #[error("failed to resolve seed address of {host}: {source}")]
    SeedAddress {
        /// Seed host.
        host: HostName,
        /// Underlying lookup failure.
        source: GatewayError,
    },
    /// Raised when the updated topology cannot be written.
    #[error("failed to persist network configuration: {0}")]
    Persist(#[source] TopologyStoreError),
}

/// Outcome of a start run that reached persistence.
#[derive(Debug)]
pub struct StartReport {
    /// Where the topology was written.
    pub config_path: Utf8PathBuf,
    /// Per-host provisioning outcomes, in receipt order.
    pub provisioned: FleetReport<ProvisionedNode, HostFailure>,
    /// Successful hosts that had no slot to land in.
    pub unplaced: Vec<AssemblyError>,
    /// Seed dialing outcomes when publish-all was requested.
    pub dialed: Option<FleetReport<(), ControlError>>,
}

impl StartReport {
    /// Returns `true` when any host failed or could not be recorded.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.provisioned.is_complete_success() || !self.unplaced.is_empty()
    }
}

/// Runs fleet operations through a gateway and control client.
#[derive(Debug)]
pub struct Orchestrator<G, C> {
    gateway: Arc<G>,
    control: Arc<C>,
    settings: PipelineSettings,
    fleet: Fleet,
}

impl<G, C> Orchestrator<G, C>
where
    G: Gateway + 'static,
    C: ControlClient + 'static,
{
    /// Creates an orchestrator without a per-host deadline.
    #[must_use]
    pub fn new(gateway: G, control: C, settings: PipelineSettings) -> Self {
        Self {
            gateway: Arc::new(gateway),
            control: Arc::new(control),
            settings,
            fleet: Fleet::new(),
        }
    }

    /// Replaces the fleet coordinator.
    #[must_use]
    pub fn with_fleet(self, fleet: Fleet) -> Self {
        Self { fleet, ..self }
    }

    /// Provisions every host, records the results and links the mesh.
    ///
    /// Hosts that fail are reported and skipped; their slots keep the
    /// previous contents. The topology is written even when some hosts
    /// failed.
    ///
    /// # Errors
    ///
    /// Returns [`StartError`] when the topology cannot be read or written,
    /// or when a seed address cannot be resolved.
    pub async fn start(&self, request: &StartRequest) -> Result<StartReport, StartError> {
        let store = TopologyStore::new(request.base.clone());
        let mut config = store.read().map_err(StartError::ReadConfig)?;
        config.id.clone_from(&request.app);

        let explicit_seeds = !request.seed_machines.is_empty();
        let seed_hosts = if explicit_seeds {
            &request.seed_machines
        } else {
            &request.machines
        };
        let seeds = self.seed_addresses(seed_hosts).await?;
        info!(
            app = %request.app,
            hosts = request.machines.len(),
            seeds = seeds.len(),
            "starting network"
        );

        let plan = ProvisionPlan {
            app: request.app.clone(),
            base: request.base.clone(),
            seeds: seeds.clone(),
            no_app: request.no_app,
            publish_all: request.publish_all,
        };
        let shared = Arc::new(HostPipeline::new(
            Arc::clone(&self.gateway),
            Arc::clone(&self.control),
            self.settings.clone(),
            plan,
        ));
        let provisioned = self
            .fleet
            .run(request.machines.clone(), move |host| {
                let worker = Arc::clone(&shared);
                async move { worker.provision(&host).await }
            })
            .await;
        for (host, failure) in provisioned.failures() {
            warn!(host = %host, error = %failure, "host was not provisioned");
        }

        let unplaced = assemble(
            &mut config,
            provisioned
                .successes()
                .map(|(outcome, node)| (outcome.ordinal, node.clone())),
        );
        for err in &unplaced {
            warn!(error = %err, "result was not recorded");
        }
        release(
            &mut config,
            provisioned
                .outcomes()
                .iter()
                .filter(|outcome| outcome.result.is_err())
                .map(|outcome| outcome.ordinal),
        );
        let config_path = store.write(&config).map_err(StartError::Persist)?;
        info!(path = %config_path, "wrote network configuration");

        let dialed = if request.publish_all {
            let fixed = explicit_seeds.then_some(seeds);
            Some(self.dial_seeds(&provisioned, fixed).await)
        } else {
            None
        };

        Ok(StartReport {
            config_path,
            provisioned,
            unplaced,
            dialed,
        })
    }

    async fn seed_addresses(&self, hosts: &[HostName]) -> Result<Vec<String>, StartError> {
        let mut seeds = Vec::with_capacity(hosts.len());
        for host in hosts {
            let address = self
                .gateway
                .address(host)
                .await
                .map_err(|source| StartError::SeedAddress {
                    host: host.clone(),
                    source,
                })?;
            seeds.push(format!("{address}:{}", self.settings.ports.p2p));
        }
        Ok(seeds)
    }

    /// Tells every provisioned node to dial the seed list.
    ///
    /// Without a fixed list, the seeds are the collected peer addresses in
    /// the order hosts finished.
    async fn dial_seeds(
        &self,
        provisioned: &FleetReport<ProvisionedNode, HostFailure>,
        fixed: Option<Vec<String>>,
    ) -> FleetReport<(), ControlError> {
        let seeds = Arc::new(fixed.unwrap_or_else(|| {
            provisioned
                .successes()
                .map(|(_, node)| node.endpoint.p2p_addr.clone())
                .collect()
        }));
        let jobs = provisioned
            .successes()
            .map(|(outcome, node)| (outcome.host.clone(), node.endpoint.rpc_addr.clone()))
            .collect();
        info!(seeds = seeds.len(), "instructing nodes to dial each other");

        let shared = Arc::clone(&self.control);
        let report = self
            .fleet
            .run_with(jobs, move |_, rpc_addr| {
                let client = Arc::clone(&shared);
                let list = Arc::clone(&seeds);
                async move { client.dial_seeds(&rpc_addr, &list).await }
            })
            .await;
        for (host, failure) in report.failures() {
            warn!(host = %host, error = %failure, "seed dial failed");
        }
        report
    }

    /// Starts the existing app and core containers on every host.
    pub async fn restart(&self, app: &str, hosts: Vec<HostName>, no_app: bool) -> LifecycleReport<()> {
        let containers = ContainerSet::for_app(app);
        let shared = Arc::clone(&self.gateway);
        self.fleet
            .run(hosts, move |host| {
                let gateway = Arc::clone(&shared);
                let names = containers.clone();
                async move { pipeline::restart(gateway.as_ref(), &host, &names, no_app).await }
            })
            .await
    }

    /// Stops the core and, unless `no_app`, the app containers on every host.
    pub async fn stop(&self, app: &str, hosts: Vec<HostName>, no_app: bool) -> LifecycleReport<()> {
        let containers = ContainerSet::for_app(app);
        let shared = Arc::clone(&self.gateway);
        self.fleet
            .run(hosts, move |host| {
                let gateway = Arc::clone(&shared);
                let names = containers.clone();
                async move { pipeline::stop(gateway.as_ref(), &host, &names, no_app).await }
            })
            .await
    }

    /// Removes the application's containers on every host.
    pub async fn remove(&self, app: &str, hosts: Vec<HostName>, force: bool) -> LifecycleReport<()> {
        let containers = ContainerSet::for_app(app);
        let shared = Arc::clone(&self.gateway);
        self.fleet
            .run(hosts, move |host| {
                let gateway = Arc::clone(&shared);
                let names = containers.clone();
                async move { pipeline::remove(gateway.as_ref(), &host, &names, force).await }
            })
            .await
    }

    /// Lists the published ports of the core container on every host.
    pub async fn ports(&self, app: &str, hosts: Vec<HostName>) -> FleetReport<PortMap, GatewayError> {
        let core = ContainerSet::for_app(app).core;
        let shared = Arc::clone(&self.gateway);
        self.fleet
            .run(hosts, move |host| {
                let gateway = Arc::clone(&shared);
                let container = core.clone();
                async move { gateway.container_ports(&host, &container).await }
            })
            .await
    }

    /// Runs `docker ARGS` on every host.
    pub async fn docker(&self, hosts: Vec<HostName>, args: Vec<String>) -> LifecycleReport<String> {
        let shared = Arc::clone(&self.gateway);
        let shared_args = Arc::new(args);
        self.fleet
            .run(hosts, move |host| {
                let gateway = Arc::clone(&shared);
                let docker_args = Arc::clone(&shared_args);
                async move { pipeline::docker(gateway.as_ref(), &host, &docker_args).await }
            })
            .await
    }

    /// Creates a machine per host with `create ARGS HOST`.
    pub async fn create_machines(&self, hosts: Vec<HostName>, args: Vec<String>) -> LifecycleReport<String> {
        self.machine_command(hosts, prefixed("create", args)).await
    }

    /// Re-provisions each machine with `provision ARGS HOST`.
    pub async fn provision_machines(
        &self,
        hosts: Vec<HostName>,
        args: Vec<String>,
    ) -> LifecycleReport<String> {
        self.machine_command(hosts, prefixed("provision", args)).await
    }

    /// Deletes each machine with `rm -f HOST`.
    pub async fn destroy_machines(&self, hosts: Vec<HostName>) -> LifecycleReport<String> {
        self.machine_command(hosts, vec![String::from("rm"), String::from("-f")])
            .await
    }

    async fn machine_command(&self, hosts: Vec<HostName>, args: Vec<String>) -> LifecycleReport<String> {
        let shared = Arc::clone(&self.gateway);
        let shared_args = Arc::new(args);
        self.fleet
            .run(hosts, move |host| {
                let gateway = Arc::clone(&shared);
                let machine_args = Arc::clone(&shared_args);
                async move { pipeline::run_machine(gateway.as_ref(), &host, &machine_args).await }
            })
            .await
    }
}

fn prefixed(subcommand: &str, args: Vec<String>) -> Vec<String> {
    std::iter::once(subcommand.to_owned()).chain(args).collect()
}

#[cfg(test)]
mod tests;
