//! Core library for the fleetmesh network launcher.
//!
//! The crate stands up a multi-host test network on docker-machine hosts:
//! host range expressions expand into machine names, every host runs the
//! container provisioning pipeline concurrently, and the discovered node
//! identities and endpoints are assembled into the shared network
//! configuration file (resolve → provision → assemble → persist → dial).

pub mod config;
pub mod control;
pub mod fleet;
pub mod gateway;
pub mod hosts;
pub mod orchestrator;
pub mod pipeline;
pub mod poll;
pub mod test_support;
pub mod topology;

pub use config::{ConfigError, FleetConfig};
pub use control::{ControlClient, ControlError, HttpControlClient, NodeStatus};
pub use fleet::{Fleet, FleetFailure, FleetReport, HostOutcome};
pub use gateway::{
    CommandOutput, CommandRunner, FilePush, Gateway, GatewayError, MachineGateway, PortMap,
    ProcessCommandRunner, RemoteOutput, RunnerError,
};
pub use hosts::{HostName, HostRangeError, resolve as resolve_hosts};
pub use orchestrator::{LifecycleReport, Orchestrator, StartError, StartReport, StartRequest};
pub use pipeline::{
    ContainerSet, HostFailure, HostPipeline, LifecycleError, NodePorts, PipelineSettings,
    ProvisionPlan, Stage, StageError,
};
pub use poll::{Backoff, PollError, PollPolicy, poll_until, poll_until_ready};
pub use topology::{
    AssemblyError, NetworkConfiguration, NodeEndpoint, ProvisionedNode, PublicKey,
    TopologyStore, TopologyStoreError, ValidatorIdentity, ValidatorSlot, assemble, release,
};
