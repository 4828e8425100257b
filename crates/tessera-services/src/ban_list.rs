//! Ban list: addresses we refuse to stay connected to.
//!
//! Pure lookup table. Housekeeping force-closes connections to any
//! address found here; nothing in this module acts on its own.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tessera_core::{clock, Address};

/// Why an address was banned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanReason {
    /// The peer failed address validation.
    AddressValidationFailed,
    /// The peer sent an address validation request over a connection we dialed.
    AddressValidationRequestOnOutboundConnection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanEntry {
    pub reason: BanReason,
    /// Milliseconds since the Unix epoch.
    pub event_date: u64,
}

/// Banned addresses. Cloning shares the underlying table.
#[derive(Clone, Default)]
pub struct BanList {
    entries: Arc<DashMap<Address, BanEntry>>,
}

impl BanList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ban an address. A later ban overwrites an earlier one.
    pub fn add(&self, address: Address, reason: BanReason) {
        tracing::info!(peer = %address, ?reason, "address banned");
        self.entries.insert(
            address,
            BanEntry {
                reason,
                event_date: clock::now_millis(),
            },
        );
    }

    pub fn is_banned(&self, address: &Address) -> bool {
        self.entries.contains_key(address)
    }

    pub fn is_not_banned(&self, address: &Address) -> bool {
        !self.is_banned(address)
    }

    pub fn get(&self, address: &Address) -> Option<BanEntry> {
        self.entries.get(address).map(|e| *e.value())
    }

    pub fn remove(&self, address: &Address) -> Option<BanEntry> {
        self.entries.remove(address).map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
