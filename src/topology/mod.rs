//! Network topology model, slot assembly and persistence.

mod assemble;
mod store;
mod types;

pub use assemble::{AssemblyError, assemble, release};
pub use store::{CONFIG_FILE_NAME, TopologyStore, TopologyStoreError};
pub use types::{
    ANONYMOUS_VALIDATOR_SET, NetworkConfiguration, NodeEndpoint, ProvisionedNode, PublicKey,
    ValidatorIdentity, ValidatorSlot,
};
