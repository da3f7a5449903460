//! Merges provisioning results into the persisted topology.

use thiserror::Error;

use super::types::{NetworkConfiguration, ProvisionedNode};

/// A provisioned node that could not be placed in the topology.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AssemblyError {
    /// Raised when a host was submitted at a position with no slot.
    #[error("host {host} was submitted at position {ordinal} but only {slots} slots exist")]
    NoSlot {
        /// Host whose result was dropped.
        host: String,
        /// Submission position of the host.
        ordinal: usize,
        /// Number of slots in the configuration.
        slots: usize,
    },
}

/// Writes each result into the slot matching its submission position.
///
/// Hosts are submitted in the order their slots were declared at chain
/// initialisation, so `ordinal` selects the slot regardless of the order in
/// which results arrive. The slot index and the slot count never change.
/// Results without a slot are returned instead of being written; slots of
/// failed hosts are handled by [`release`].
pub fn assemble<I>(config: &mut NetworkConfiguration, results: I) -> Vec<AssemblyError>
where
    I: IntoIterator<Item = (usize, ProvisionedNode)>,
{
    let slots = config.validators.len();
    let mut unplaced = Vec::new();
    for (ordinal, node) in results {
        match config.validators.get_mut(ordinal) {
            Some(slot) => slot.fill(node),
            None => unplaced.push(AssemblyError::NoSlot {
                host: node.identity.id,
                ordinal,
                slots,
            }),
        }
    }
    unplaced
}

/// Resets the slots of hosts that failed this run to their placeholder.
///
/// A slot filled by an earlier run would otherwise keep advertising the
/// endpoint of a node that did not come back. Ordinals without a slot are
/// ignored.
pub fn release<I>(config: &mut NetworkConfiguration, failed: I)
where
    I: IntoIterator<Item = usize>,
{
    for ordinal in failed {
        if let Some(slot) = config.validators.get_mut(ordinal) {
            slot.clear_endpoint();
        }
    }
}
