//! Transport-facing seam.
//!
//! The peer group never owns connections. It reads the live set from a
//! `Node` and answers with close commands; dialing, framing and the close
//! handshake belong to the transport implementation behind these traits.

use std::fmt;
use std::sync::Arc;

use tessera_core::{clock, Address, Capability, NetworkLoad};

/// Why the peer group (or the transport) closed a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    Banned,
    DuplicateConnection,
    TooManyConnectionsToSeeds,
    AgedConnection,
    TooManyInboundConnections,
    TooManyConnections,
    /// Closed by the remote side.
    ClosedByPeer,
    Shutdown,
    Exception,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::Banned => "banned",
            CloseReason::DuplicateConnection => "duplicate connection",
            CloseReason::TooManyConnectionsToSeeds => "too many connections to seeds",
            CloseReason::AgedConnection => "aged connection",
            CloseReason::TooManyInboundConnections => "too many inbound connections",
            CloseReason::TooManyConnections => "too many connections",
            CloseReason::ClosedByPeer => "closed by peer",
            CloseReason::Shutdown => "shutdown",
            CloseReason::Exception => "exception",
        };
        f.write_str(s)
    }
}

/// A live connection as seen by the peer group.
pub trait Connection: Send + Sync {
    fn id(&self) -> &str;

    fn peer_address(&self) -> &Address;

    /// True if we dialed the peer.
    fn is_outbound(&self) -> bool;

    /// Milliseconds since the Unix epoch.
    fn created(&self) -> u64;

    fn is_running(&self) -> bool;

    /// Request/response exchanges still waiting for an answer.
    fn num_pending_requests(&self) -> usize;

    /// Capability the peer announced in the handshake.
    fn peers_capability(&self) -> Capability;

    /// Most recent load the peer reported.
    fn peers_network_load(&self) -> NetworkLoad;

    fn age(&self) -> u64 {
        clock::millis_since(self.created())
    }

    fn created_before(&self, date: u64) -> bool {
        self.created() < date
    }

    fn has_pending_requests(&self) -> bool {
        self.num_pending_requests() > 0
    }
}

pub type ConnectionRef = Arc<dyn Connection>;

/// Connection lifecycle events emitted by a `Node`.
pub trait ConnectionListener: Send + Sync {
    fn on_connection(&self, _connection: &ConnectionRef) {}

    fn on_disconnect(&self, connection: &ConnectionRef, reason: CloseReason);
}

/// The transport node owning the live connection set.
pub trait Node: Send + Sync {
    /// Short description for log lines.
    fn node_info(&self) -> String;

    fn add_listener(&self, listener: Arc<dyn ConnectionListener>);

    fn remove_listener(&self, listener: &Arc<dyn ConnectionListener>);

    fn all_active_connections(&self) -> Vec<ConnectionRef>;

    fn active_inbound_connections(&self) -> Vec<ConnectionRef> {
        self.all_active_connections()
            .into_iter()
            .filter(|c| !c.is_outbound())
            .collect()
    }

    fn active_outbound_connections(&self) -> Vec<ConnectionRef> {
        self.all_active_connections()
            .into_iter()
            .filter(|c| c.is_outbound())
            .collect()
    }

    fn num_connections(&self) -> usize {
        self.all_active_connections().len()
    }

    /// Close immediately, without notifying the peer.
    fn close_connection(&self, connection: &ConnectionRef, reason: CloseReason);

    /// Notify the peer and let in-flight exchanges drain before closing.
    fn close_connection_gracefully(&self, connection: &ConnectionRef, reason: CloseReason);
}

/// Identity comparison for listener trait objects (connection or peer
/// group listeners). Compares the data pointer only, vtable pointers may
/// differ across codegen units.
pub fn same_listener<L: ?Sized>(a: &Arc<L>, b: &Arc<L>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}
