//! Collaborators driven by the peer group manager: the peer exchange
//! (where new candidates come from) and the lifecycle-only services that
//! run alongside it.

use async_trait::async_trait;

use crate::error::PeerGroupError;

/// Peer exchange protocol, from the manager's point of view.
#[async_trait]
pub trait PeerExchange: Send + Sync {
    /// Completes once the minimum viable connection set is reached.
    /// Return `PeerGroupError::NotReady` if the transport cannot serve yet;
    /// bootstrap retries on it.
    async fn start_initial_peer_exchange(&self) -> Result<(), PeerGroupError>;

    /// Try to add connections. Returns whether anything was gained.
    async fn extend_peer_group(&self) -> anyhow::Result<bool>;

    fn shutdown(&self);
}

/// Keep-alive and network-load exchange only expose their lifecycle here.
pub trait Lifecycle: Send + Sync {
    fn initialize(&self);

    fn shutdown(&self);
}
