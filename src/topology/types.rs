//! Network topology records persisted between runs.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Validator-set identifier used for sets without a name.
pub const ANONYMOUS_VALIDATOR_SET: &str = "anon";

/// Public key material as reported by a node.
///
/// The encoding belongs to the node software, so the key is kept as the JSON
/// value the node produced and compared structurally.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PublicKey(Value);

impl PublicKey {
    /// Wraps a JSON value reported by a node.
    #[must_use]
    pub const fn new(value: Value) -> Self {
        Self(value)
    }

    /// Interprets command output as a key: JSON when it parses, otherwise
    /// the trimmed text as a JSON string.
    #[must_use]
    pub fn from_output(output: &str) -> Self {
        let trimmed = output.trim();
        serde_json::from_str(trimmed).map_or_else(|_| Self(Value::String(trimmed.to_owned())), Self)
    }

    /// Returns the underlying JSON value.
    #[must_use]
    pub const fn as_value(&self) -> &Value {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable validator identity: host identifier plus public key.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ValidatorIdentity {
    /// Identifier of the validator, the host name once provisioned.
    pub id: String,
    /// Public key, absent until a node or the chain initialiser set it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pub_key: Option<PublicKey>,
}

/// Peer-to-peer and control addresses of a provisioned node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeEndpoint {
    /// Peer-to-peer address (`host:port`).
    pub p2p_addr: String,
    /// Control/RPC address (`host:port`).
    pub rpc_addr: String,
}

/// Everything a successfully provisioned host contributes to the topology.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionedNode {
    /// Identity confirmed by the node.
    pub identity: ValidatorIdentity,
    /// Addresses the node is reachable on.
    pub endpoint: NodeEndpoint,
}

/// A validator position fixed when the chain was initialised.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ValidatorSlot {
    /// Validator identity occupying the slot.
    pub validator: ValidatorIdentity,
    /// Peer-to-peer address, empty until provisioned.
    #[serde(default)]
    pub p2p_addr: String,
    /// Control/RPC address, empty until provisioned.
    #[serde(default)]
    pub rpc_addr: String,
    /// Slot index assigned at chain initialisation.
    #[serde(default)]
    pub index: u32,
}

impl ValidatorSlot {
    /// Returns `true` when a provisioned node has been written to the slot.
    #[must_use]
    pub fn is_filled(&self) -> bool {
        !self.p2p_addr.is_empty() && !self.rpc_addr.is_empty()
    }

    /// Drops the endpoint of a node that is no longer known to be running.
    ///
    /// The validator identity and index stay, as written at chain
    /// initialisation.
    pub fn clear_endpoint(&mut self) {
        self.p2p_addr.clear();
        self.rpc_addr.clear();
    }

    /// Overwrites the slot payload, keeping its index.
    pub fn fill(&mut self, node: ProvisionedNode) {
        self.validator = node.identity;
        self.p2p_addr = node.endpoint.p2p_addr;
        self.rpc_addr = node.endpoint.rpc_addr;
    }
}

/// Persisted topology of one network.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NetworkConfiguration {
    /// Network (application) identifier.
    pub id: String,
    /// Validator-set identifier, [`ANONYMOUS_VALIDATOR_SET`] when unnamed.
    pub val_set_id: String,
    /// Validator slots in chain-initialisation order.
    pub validators: Vec<ValidatorSlot>,
}

impl NetworkConfiguration {
    /// Returns `true` when the validator set has no name.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.val_set_id == ANONYMOUS_VALIDATOR_SET
    }
}
