use std::time::Duration;

use crate::manager::State;

#[derive(Debug, thiserror::Error)]
pub enum PeerGroupError {
    /// A collaborator is not ready yet. Bootstrap retries on this.
    #[error("not ready: {0}")]
    NotReady(String),

    /// The state machine only moves forward.
    #[error("new state {to:?} must have a higher ordinal than the current state {from:?}")]
    InvalidStateTransition { from: State, to: State },

    #[error("bootstrap failed after {attempts} attempts in {elapsed:?}")]
    BootstrapFailed { attempts: u32, elapsed: Duration },

    #[error("peer store i/o failed: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("peer store encoding failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("peer exchange failed: {0}")]
    Exchange(#[source] anyhow::Error),
}
