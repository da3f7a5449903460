//! Parsing of `docker port` output into a container-to-host port map.

use std::collections::BTreeMap;
use std::fmt;

/// Published ports of a container keyed by container port.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PortMap(BTreeMap<u16, u16>);

impl PortMap {
    /// Parses lines of the form `46656/tcp -> 0.0.0.0:32769`.
    ///
    /// Lines that do not follow the format are ignored. IPv6 bindings such as
    /// `[::]:32769` resolve to the same host port.
    #[must_use]
    pub fn parse(output: &str) -> Self {
        let mut ports = BTreeMap::new();
        for line in output.lines() {
            let Some((container, binding)) = line.split_once("->") else {
                continue;
            };
            let container_port = container.split('/').next().unwrap_or_default().trim();
            let host_port = binding.rsplit(':').next().unwrap_or_default().trim();
            if let (Ok(container_port), Ok(host_port)) =
                (container_port.parse::<u16>(), host_port.parse::<u16>())
            {
                ports.insert(container_port, host_port);
            }
        }
        Self(ports)
    }

    /// Returns the host port published for `container_port`.
    #[must_use]
    pub fn host_port(&self, container_port: u16) -> Option<u16> {
        self.0.get(&container_port).copied()
    }

    /// Returns `true` when no published port was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PortMap {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (container, host) in &self.0 {
            writeln!(formatter, "{container} -> {host}")?;
        }
        Ok(())
    }
}
