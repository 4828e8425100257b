//! Peer value types.
//!
//! A `Peer` is an immutable snapshot of a known counterparty. It is
//! produced either from a live connection (capability and load as last
//! reported over that connection) or from a peer-exchange result, and is
//! never mutated afterwards. Identity is the address alone.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::address::{Address, TransportType};
use crate::clock;

/// Optional protocol features a node can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    InventoryHashSetFilter,
    AuthorizationHashCash,
    AuthorizationEquihash,
}

/// What a remote node told us about itself during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub address: Address,
    pub supported_transport_types: Vec<TransportType>,
    pub features: Vec<Feature>,
    pub version: u32,
}

impl Capability {
    pub fn new(address: Address, supported_transport_types: Vec<TransportType>) -> Self {
        Self {
            address,
            supported_transport_types,
            features: Vec::new(),
            version: 0,
        }
    }

    pub fn with_features(mut self, features: Vec<Feature>) -> Self {
        self.features = features;
        self
    }

    pub fn has_feature(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }
}

/// Load snapshot a peer reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkLoad {
    /// Utilisation in the range 0.0–1.0.
    pub load: f64,
    pub difficulty_adjustment_factor: f64,
}

impl Default for NetworkLoad {
    fn default() -> Self {
        Self {
            load: 0.0,
            difficulty_adjustment_factor: 1.0,
        }
    }
}

impl NetworkLoad {
    pub fn new(load: f64) -> Self {
        Self {
            load: load.clamp(0.0, 1.0),
            ..Self::default()
        }
    }
}

/// A known peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    capability: Capability,
    network_load: NetworkLoad,
    is_outbound_connection: bool,
    /// Milliseconds since the Unix epoch.
    created: u64,
}

impl Peer {
    /// Snapshot taken now.
    pub fn new(capability: Capability, network_load: NetworkLoad, is_outbound_connection: bool) -> Self {
        Self::with_created(
            capability,
            network_load,
            is_outbound_connection,
            clock::now_millis(),
        )
    }

    pub fn with_created(
        capability: Capability,
        network_load: NetworkLoad,
        is_outbound_connection: bool,
        created: u64,
    ) -> Self {
        Self {
            capability,
            network_load,
            is_outbound_connection,
            created,
        }
    }

    pub fn address(&self) -> &Address {
        &self.capability.address
    }

    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    pub fn network_load(&self) -> &NetworkLoad {
        &self.network_load
    }

    pub fn is_outbound_connection(&self) -> bool {
        self.is_outbound_connection
    }

    pub fn created(&self) -> u64 {
        self.created
    }

    /// Milliseconds since this snapshot was taken.
    pub fn age(&self) -> u64 {
        clock::millis_since(self.created)
    }

    /// Natural ordering of peers: newest first.
    pub fn newest_first(a: &Peer, b: &Peer) -> Ordering {
        b.created.cmp(&a.created)
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.address() == other.address()
    }
}

impl Eq for Peer {}

impl Hash for Peer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address().hash(state);
    }
}
