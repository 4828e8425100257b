//! Peer group registry: which peers we know about, in which category,
//! and how many connections we aim for.
//!
//! Three collections, all owned here:
//! - seeds:     operator-provided bootstrap addresses, not persisted
//! - persisted: peers remembered across restarts (see `store`)
//! - reported:  peers learned from peer exchange this session
//!
//! Persisted and reported peers merge by recency: an offered peer only
//! replaces the entry for its address if it was created strictly later.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::{DashMap, DashSet};
use rand::seq::SliceRandom;
use rand::Rng;
use tessera_core::clock::{self, format_age};
use tessera_core::config::PeerGroupConfig;
use tessera_core::{Address, Peer};

use crate::ban_list::BanList;
use crate::node::{Connection, ConnectionRef, Node};
use crate::store::{merge_by_recency, PeerGroupStore};

const MIN_PRINT_INTERVAL_MS: u64 = 10 * 60 * 1000;
const LIVE_AGE_MS: u64 = 10 * 60 * 1000;
/// Upper bound of the random offset added to connection timestamps
/// before they are handed out as peers.
const CREATED_OBFUSCATION_MS: u64 = 3_000;

pub struct PeerGroupService {
    config: PeerGroupConfig,
    store: PeerGroupStore,
    seed_node_addresses: DashSet<Address>,
    ban_list: BanList,
    reported_peers_by_address: DashMap<Address, Peer>,
    last_report_ts: AtomicU64,
}

impl PeerGroupService {
    pub fn new(
        config: PeerGroupConfig,
        store: PeerGroupStore,
        seed_node_addresses: impl IntoIterator<Item = Address>,
        ban_list: BanList,
    ) -> Self {
        Self {
            config,
            store,
            seed_node_addresses: seed_node_addresses.into_iter().collect(),
            ban_list,
            reported_peers_by_address: DashMap::new(),
            last_report_ts: AtomicU64::new(0),
        }
    }

    // ── Persisted peers ───────────────────────────────────────────────────────

    pub fn persisted_peers(&self) -> Vec<Peer> {
        self.store
            .peers_by_address()
            .iter()
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn add_persisted_peer(&self, peer: Peer) -> bool {
        let changed = merge_by_recency(self.store.peers_by_address(), peer);
        if changed {
            self.store.persist();
        }
        changed
    }

    pub fn add_persisted_peers(&self, peers: impl IntoIterator<Item = Peer>) -> bool {
        let mut changed = false;
        for peer in peers {
            changed |= merge_by_recency(self.store.peers_by_address(), peer);
        }
        if changed {
            self.maybe_log_peers(self.store.peers_by_address(), "Persisted");
            self.store.persist();
        }
        changed
    }

    pub fn remove_persisted_peers(&self, peers: &[Peer]) {
        for peer in peers {
            self.store.peers_by_address().remove(peer.address());
        }
        if !peers.is_empty() {
            self.store.persist();
        }
    }

    pub fn clear_persisted_peers(&self) {
        self.store.peers_by_address().clear();
        self.store.persist();
    }

    // ── Reported peers ────────────────────────────────────────────────────────

    pub fn reported_peers(&self) -> Vec<Peer> {
        self.reported_peers_by_address
            .iter()
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn add_reported_peer(&self, peer: Peer) -> bool {
        merge_by_recency(&self.reported_peers_by_address, peer)
    }

    pub fn add_reported_peers(&self, peers: impl IntoIterator<Item = Peer>) -> bool {
        let mut changed = false;
        for peer in peers {
            changed |= self.add_reported_peer(peer);
        }
        if changed {
            self.maybe_log_peers(&self.reported_peers_by_address, "Reported");
        }
        changed
    }

    pub fn remove_reported_peers(&self, peers: &[Peer]) {
        for peer in peers {
            self.reported_peers_by_address.remove(peer.address());
        }
    }

    pub fn clear_reported_peers(&self) {
        self.reported_peers_by_address.clear();
    }

    // ── Seeds ─────────────────────────────────────────────────────────────────

    pub fn seed_node_addresses(&self) -> Vec<Address> {
        self.seed_node_addresses.iter().map(|a| a.key().clone()).collect()
    }

    pub fn add_seed_node_address(&self, address: Address) {
        self.seed_node_addresses.insert(address);
    }

    pub fn remove_seed_node_address(&self, address: &Address) {
        self.seed_node_addresses.remove(address);
    }

    pub fn is_seed(&self, address: &Address) -> bool {
        self.seed_node_addresses.contains(address)
    }

    pub fn is_seed_connection(&self, connection: &dyn Connection) -> bool {
        self.is_seed(connection.peer_address())
    }

    pub fn is_seed_peer(&self, peer: &Peer) -> bool {
        self.is_seed(peer.address())
    }

    pub fn not_a_seed(&self, peer: &Peer) -> bool {
        !self.is_seed_peer(peer)
    }

    // ── Bans ──────────────────────────────────────────────────────────────────

    pub fn is_not_banned(&self, address: &Address) -> bool {
        self.ban_list.is_not_banned(address)
    }

    pub fn is_peer_not_banned(&self, peer: &Peer) -> bool {
        self.is_not_banned(peer.address())
    }

    // ── Capacity policy ───────────────────────────────────────────────────────

    pub fn min_outbound_connections(&self) -> usize {
        self.config.min_num_outbound_connected_peers
    }

    /// `max_num_connected_peers − min_outbound_connections`. Negative if the
    /// configuration asks for more outbound connections than total.
    pub fn max_inbound_connections(&self) -> i64 {
        self.config.max_num_connected_peers as i64 - self.min_outbound_connections() as i64
    }

    pub fn min_num_connected_peers(&self) -> usize {
        self.config.min_num_connected_peers
    }

    pub fn max_num_connected_peers(&self) -> usize {
        self.config.max_num_connected_peers
    }

    pub fn target_num_connected_peers(&self) -> usize {
        let min = self.min_num_connected_peers();
        let max = self.max_num_connected_peers();
        min + max.saturating_sub(min) / 2
    }

    pub fn min_num_reported_peers(&self) -> usize {
        self.config.min_num_reported_peers
    }

    // ── Connections ───────────────────────────────────────────────────────────

    /// Peers behind the node's live connections. A random offset is added
    /// to each timestamp so the list does not leak exact connect times.
    pub fn all_connected_peers(&self, node: &dyn Node) -> Vec<Peer> {
        let mut rng = rand::thread_rng();
        node.all_active_connections()
            .iter()
            .map(|connection| {
                let created = connection.created() + rng.gen_range(0..CREATED_OBFUSCATION_MS);
                Peer::with_created(
                    connection.peers_capability(),
                    connection.peers_network_load(),
                    connection.is_outbound(),
                    created,
                )
            })
            .collect()
    }

    pub fn shuffled_seed_connections(&self, node: &dyn Node) -> Vec<ConnectionRef> {
        let mut connections = node.all_active_connections();
        connections.shuffle(&mut rand::thread_rng());
        connections.retain(|c| self.is_seed_connection(c.as_ref()));
        connections
    }

    pub fn shuffled_non_seed_connections(&self, node: &dyn Node) -> Vec<ConnectionRef> {
        let mut connections = node.all_active_connections();
        connections.shuffle(&mut rand::thread_rng());
        connections.retain(|c| !self.is_seed_connection(c.as_ref()));
        connections
    }

    // ── Logging ───────────────────────────────────────────────────────────────

    /// Summarise a peer collection, at most once per print interval.
    fn maybe_log_peers(&self, map: &DashMap<Address, Peer>, label: &str) {
        let now = clock::now_millis();
        let last = self.last_report_ts.load(Ordering::Relaxed);
        if now.saturating_sub(last) < MIN_PRINT_INTERVAL_MS
            || self
                .last_report_ts
                .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_err()
        {
            return;
        }

        let mut peers: Vec<Peer> = map.iter().map(|e| e.value().clone()).collect();
        if peers.is_empty() {
            return;
        }
        peers.sort_by(Peer::newest_first);

        let live = peers.iter().filter(|p| p.age() < LIVE_AGE_MS).count();
        let range = format!(
            "{} to {}",
            format_age(peers[0].age()),
            format_age(peers[peers.len() - 1].age())
        );
        tracing::info!(
            kind = label,
            total = peers.len(),
            live,
            non_live = peers.len() - live,
            age_range = %range,
            "peer set summary"
        );
        for peer in &peers {
            tracing::debug!(kind = label, peer = %peer.address(), age = %format_age(peer.age()), "  peer");
        }
    }
}
