//! Periodic connection housekeeping.
//!
//! One cycle runs nine stages in a fixed order. The closing stages only
//! touch connections past the bootstrap grace period and prefer to keep
//! busy and young connections.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::time::Duration;

use tessera_core::clock::{self, format_age};
use tessera_core::Peer;
use tokio::sync::broadcast;

use super::{PeerGroupManager, State};
use crate::node::{CloseReason, Connection, ConnectionRef};

/// Pause between closing stages so the transport can process the closes.
const STAGE_PAUSE: Duration = Duration::from_millis(100);

/// Shutdown was signalled while a cycle was paused.
struct Interrupted;

impl PeerGroupManager {
    /// Run one housekeeping cycle. A shutdown signal during a pause ends
    /// the cycle early.
    pub async fn do_house_keeping(&self) {
        if self.state() >= State::Stopping {
            return;
        }
        tracing::debug!(node = %self.node.node_info(), "house keeping");
        let mut shutdown = self.shutdown_tx.subscribe();
        if self.run_stages(&mut shutdown).await.is_err() {
            tracing::debug!("house keeping interrupted");
        }
    }

    async fn run_stages(&self, shutdown: &mut broadcast::Receiver<()>) -> Result<(), Interrupted> {
        self.close_banned();
        self.maybe_close_duplicate_connections();
        pause(shutdown).await?;
        self.maybe_close_connections_to_seeds();
        pause(shutdown).await?;
        self.maybe_close_aged_connections();
        pause(shutdown).await?;
        self.maybe_close_exceeding_inbound_connections();
        pause(shutdown).await?;
        self.maybe_close_exceeding_connections();
        pause(shutdown).await?;
        self.cancel_create_connections_task();
        self.maybe_create_connections();
        self.maybe_remove_reported_peers();
        self.maybe_remove_persisted_peers();
        Ok(())
    }

    fn close_banned(&self) {
        for connection in self
            .node
            .all_active_connections()
            .into_iter()
            .filter(|c| c.is_running() && self.ban_list.is_banned(c.peer_address()))
        {
            tracing::info!(peer = %connection.peer_address(), "close connection to banned node");
            self.node.close_connection(&connection, CloseReason::Banned);
        }
    }

    /// Inbound connections to an address we also have an outbound
    /// connection to.
    fn maybe_close_duplicate_connections(&self) {
        let outbound: HashSet<_> = self
            .node
            .active_outbound_connections()
            .iter()
            .map(|c| c.peer_address().clone())
            .collect();
        for inbound in self
            .node
            .active_inbound_connections()
            .into_iter()
            .filter(|c| self.allow_disconnect(c.as_ref()) && !c.has_pending_requests())
            .filter(|c| outbound.contains(c.peer_address()))
        {
            tracing::info!(
                peer = %inbound.peer_address(),
                "closing inbound connection, outbound connection with same address exists"
            );
            self.node
                .close_connection_gracefully(&inbound, CloseReason::DuplicateConnection);
        }
    }

    fn maybe_close_connections_to_seeds(&self) {
        let candidates = self.eviction_candidates(self.node.all_active_connections(), |c| {
            !c.has_pending_requests() && self.peer_group_service.is_seed_connection(c)
        });
        let max_seeds = self.config.max_seeds;
        self.close_beyond(candidates, max_seeds, CloseReason::TooManyConnectionsToSeeds);
    }

    fn maybe_close_aged_connections(&self) {
        let max_age_ms = u64::try_from(self.config.max_age().as_millis()).unwrap_or(u64::MAX);
        let cutoff = clock::now_millis().saturating_sub(max_age_ms);
        let candidates = self.eviction_candidates(self.node.all_active_connections(), |c| {
            c.created_before(cutoff)
        });
        let keep = self.peer_group_service.min_num_connected_peers();
        self.close_beyond(candidates, keep, CloseReason::AgedConnection);
    }

    fn maybe_close_exceeding_inbound_connections(&self) {
        let candidates =
            self.eviction_candidates(self.node.active_inbound_connections(), |_| true);
        let keep = usize::try_from(self.peer_group_service.max_inbound_connections()).unwrap_or(0);
        self.close_beyond(candidates, keep, CloseReason::TooManyInboundConnections);
    }

    fn maybe_close_exceeding_connections(&self) {
        let candidates = self.eviction_candidates(self.node.all_active_connections(), |_| true);
        let keep = self.peer_group_service.max_num_connected_peers();
        self.close_beyond(candidates, keep, CloseReason::TooManyConnections);
    }

    /// Ask the peer exchange for more connections unless both the outbound
    /// and total minimums are met. Does not wait for the exchange.
    pub(super) fn maybe_create_connections(&self) {
        let outbound = self.node.active_outbound_connections().len();
        let total = self.node.num_connections();
        if outbound >= self.peer_group_service.min_outbound_connections()
            && total >= self.peer_group_service.min_num_connected_peers()
        {
            tracing::debug!(outbound, total, "sufficient connections");
            return;
        }

        tracing::info!(outbound, total, "not sufficient connections, extending peer group");
        let peer_exchange = self.peer_exchange.clone();
        self.runtime.spawn(async move {
            match peer_exchange.extend_peer_group().await {
                Ok(created) => tracing::debug!(created, "extend peer group completed"),
                Err(e) => tracing::warn!(error = %e, "extend peer group failed"),
            }
        });
    }

    fn maybe_remove_reported_peers(&self) {
        let mut reported = self.peer_group_service.reported_peers();
        let exceeding = reported.len().saturating_sub(self.config.max_reported);
        if exceeding == 0 {
            return;
        }
        reported.sort_by_key(Peer::created);
        reported.truncate(exceeding);
        tracing::info!(count = reported.len(), "remove reported peers");
        self.peer_group_service.remove_reported_peers(&reported);
    }

    fn maybe_remove_persisted_peers(&self) {
        let mut persisted = self.peer_group_service.persisted_peers();
        persisted.sort_by(Peer::newest_first);
        let out_dated: Vec<Peer> = persisted.into_iter().skip(self.config.max_persisted).collect();
        if out_dated.is_empty() {
            return;
        }
        let ages: Vec<String> = out_dated.iter().map(|p| format_age(p.age())).collect();
        tracing::info!(count = out_dated.len(), ?ages, "remove persisted peers");
        self.peer_group_service.remove_persisted_peers(&out_dated);
    }

    /// Past the bootstrap grace period and still running.
    fn allow_disconnect(&self, connection: &dyn Connection) -> bool {
        let bootstrap_ms = u64::try_from(self.config.bootstrap_time().as_millis()).unwrap_or(u64::MAX);
        connection.is_running() && connection.age() > bootstrap_ms
    }

    /// Eligible connections matching `filter`, most worth keeping first.
    fn eviction_candidates(
        &self,
        connections: Vec<ConnectionRef>,
        filter: impl Fn(&dyn Connection) -> bool,
    ) -> Vec<ConnectionRef> {
        let mut candidates: Vec<ConnectionRef> = connections
            .into_iter()
            .filter(|c| self.allow_disconnect(c.as_ref()) && filter(c.as_ref()))
            .collect();
        candidates.sort_by(|a, b| comparing_for_skip(a.as_ref(), b.as_ref()));
        candidates
    }

    fn close_beyond(&self, candidates: Vec<ConnectionRef>, keep: usize, reason: CloseReason) {
        for connection in candidates.into_iter().skip(keep) {
            tracing::info!(
                peer = %connection.peer_address(),
                age = %format_age(connection.age()),
                %reason,
                "closing connection"
            );
            self.node.close_connection_gracefully(&connection, reason);
        }
    }
}

/// More pending requests first, then newer first.
fn comparing_for_skip(a: &dyn Connection, b: &dyn Connection) -> Ordering {
    b.num_pending_requests()
        .cmp(&a.num_pending_requests())
        .then_with(|| b.created().cmp(&a.created()))
}

async fn pause(shutdown: &mut broadcast::Receiver<()>) -> Result<(), Interrupted> {
    tokio::select! {
        _ = tokio::time::sleep(STAGE_PAUSE) => Ok(()),
        _ = shutdown.recv() => Err(Interrupted),
    }
}
