//! Docker command lines issued on fleet hosts.

use crate::gateway::shell::{escape_double_quoted, quote};

use super::{NodePorts, PipelineSettings, ProvisionPlan};

/// Proxy application used when the core runs without an application layer.
pub const NULL_APP: &str = "nilapp";

/// Names of the containers making up one application on a host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContainerSet {
    /// Container that only owns the shared volumes.
    pub common: String,
    /// Data-store service container.
    pub data: String,
    /// Application service container.
    pub app: String,
    /// Consensus-core container.
    pub core: String,
}

impl ContainerSet {
    /// Derives the container names for `app`.
    #[must_use]
    pub fn for_app(app: &str) -> Self {
        Self {
            common: format!("{app}_common"),
            data: format!("{app}_data"),
            app: format!("{app}_app"),
            core: format!("{app}_core"),
        }
    }
}

/// Joins a sub-directory onto the remote root.
pub(crate) fn remote_dir(root: &str, sub: &str) -> String {
    format!("{}/{sub}", root.trim_end_matches('/'))
}

pub(crate) fn run_common(containers: &ContainerSet, image: &str) -> String {
    format!(
        "docker run --name {} --entrypoint true {}",
        quote(&containers.common),
        quote(image)
    )
}

fn run_service(name: &str, containers: &ContainerSet, image: &str, script: &str) -> String {
    format!(
        "docker run --name {} --volumes-from {} -d {} {}",
        quote(name),
        quote(&containers.common),
        quote(image),
        quote(script)
    )
}

pub(crate) fn run_data(containers: &ContainerSet, settings: &PipelineSettings) -> String {
    let script = format!("{}/init.sh", remote_dir(&settings.remote_root, "data"));
    run_service(&containers.data, containers, &settings.image, &script)
}

pub(crate) fn data_marker(containers: &ContainerSet, settings: &PipelineSettings) -> String {
    let socket = format!("{}/data.sock", remote_dir(&settings.remote_root, "data"));
    format!("docker exec {} ls {}", quote(&containers.data), quote(&socket))
}

pub(crate) fn run_app(containers: &ContainerSet, settings: &PipelineSettings) -> String {
    let script = format!("{}/init.sh", remote_dir(&settings.remote_root, "app"));
    run_service(&containers.app, containers, &settings.image, &script)
}

fn port_flags(ports: NodePorts, publish_all: bool) -> String {
    if publish_all {
        return String::from("--publish-all");
    }
    format!(
        "-p {p2p}:{p2p} -p {rpc}:{rpc}",
        p2p = ports.p2p,
        rpc = ports.rpc
    )
}

/// Launch line for the consensus core.
///
/// Environment values are wrapped in double quotes, so they go through
/// [`escape_double_quoted`] rather than single-quote escaping.
pub(crate) fn run_core(
    containers: &ContainerSet,
    settings: &PipelineSettings,
    plan: &ProvisionPlan,
    host: &str,
) -> String {
    let core_root = remote_dir(&settings.remote_root, "core");
    let (link, proxy_app) = if plan.no_app {
        (String::new(), String::from(NULL_APP))
    } else {
        (
            format!(" --link {}", quote(&containers.app)),
            format!("tcp://{}:{}", containers.app, settings.ports.app),
        )
    };
    format!(
        "docker run -d {ports} --name {core} --volumes-from {common}{link} \
         -e TMNAME=\"{name}\" -e TMSEEDS=\"{seeds}\" -e TMROOT=\"{root}\" -e PROXYAPP=\"{proxy}\" \
         {image} {script}",
        ports = port_flags(settings.ports, plan.publish_all),
        core = quote(&containers.core),
        common = quote(&containers.common),
        name = escape_double_quoted(host),
        seeds = escape_double_quoted(&plan.seeds.join(",")),
        root = escape_double_quoted(&core_root),
        proxy = escape_double_quoted(&proxy_app),
        image = quote(&settings.image),
        script = quote(&format!("{core_root}/init.sh")),
    )
}

pub(crate) fn identity(containers: &ContainerSet, identity_command: &str) -> String {
    format!("docker exec {} {identity_command}", quote(&containers.core))
}

pub(crate) fn start(container: &str) -> String {
    format!("docker start {}", quote(container))
}

pub(crate) fn stop(container: &str) -> String {
    format!("docker stop {}", quote(container))
}

pub(crate) fn remove(container: &str) -> String {
    format!("docker rm -v {}", quote(container))
}

/// Pass-through `docker` invocation with each argument quoted.
pub(crate) fn docker(args: &[String]) -> String {
    std::iter::once(String::from("docker"))
        .chain(args.iter().map(|arg| quote(arg).into_owned()))
        .collect::<Vec<_>>()
        .join(" ")
}
