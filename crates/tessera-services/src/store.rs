//! Persisted peer store: peers worth remembering across restarts.
//!
//! One store per transport type. On disk it is a JSON array of peers at
//! `<data_dir>/<transport>_peer_group_store.json`, rewritten atomically
//! (temp file, then rename) on every change.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tessera_core::{Address, Peer, TransportType};

use crate::error::PeerGroupError;

/// Durable backing for a `PeerGroupStore`.
pub trait StorePersistence: Send + Sync {
    fn load(&self) -> Result<Vec<Peer>, PeerGroupError>;

    fn persist(&self, peers: &[Peer]) -> Result<(), PeerGroupError>;
}

/// JSON file persistence keyed by transport type.
pub struct JsonFilePersistence {
    path: PathBuf,
    // Held across temp write and rename; every writer shares one temp path.
    write_lock: Mutex<()>,
}

impl JsonFilePersistence {
    pub fn new(dir: impl AsRef<Path>, transport_type: TransportType) -> Self {
        Self {
            path: dir
                .as_ref()
                .join(format!("{}_peer_group_store.json", transport_type.as_str())),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorePersistence for JsonFilePersistence {
    fn load(&self) -> Result<Vec<Peer>, PeerGroupError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&text)?)
    }

    fn persist(&self, peers: &[Peer]) -> Result<(), PeerGroupError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(peers)?;

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let tmp_path = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

/// No-op persistence for nodes that should not remember peers.
pub struct NoPersistence;

impl StorePersistence for NoPersistence {
    fn load(&self) -> Result<Vec<Peer>, PeerGroupError> {
        Ok(Vec::new())
    }

    fn persist(&self, _peers: &[Peer]) -> Result<(), PeerGroupError> {
        Ok(())
    }
}

/// Insert `peer` unless the map already holds an entry for the same
/// address that is at least as recent. Returns whether the map changed.
pub(crate) fn merge_by_recency(map: &DashMap<Address, Peer>, peer: Peer) -> bool {
    match map.entry(peer.address().clone()) {
        Entry::Occupied(mut existing) => {
            if peer.created() > existing.get().created() {
                existing.insert(peer);
                true
            } else {
                false
            }
        }
        Entry::Vacant(slot) => {
            slot.insert(peer);
            true
        }
    }
}

pub struct PeerGroupStore {
    persisted_peers_by_address: DashMap<Address, Peer>,
    persistence: Arc<dyn StorePersistence>,
    // Snapshot and write happen under one lock so the last writer holds the
    // newest snapshot.
    persist_lock: Mutex<()>,
}

impl PeerGroupStore {
    /// Create a store and load whatever the persistence layer holds.
    /// A store that fails to load starts empty.
    pub fn new(persistence: Arc<dyn StorePersistence>) -> Self {
        let store = Self {
            persisted_peers_by_address: DashMap::new(),
            persistence,
            persist_lock: Mutex::new(()),
        };
        match store.persistence.load() {
            Ok(peers) => {
                let loaded = peers.len();
                for peer in peers {
                    merge_by_recency(&store.persisted_peers_by_address, peer);
                }
                if loaded > 0 {
                    tracing::info!(count = loaded, "loaded persisted peers");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to load persisted peers, starting empty");
            }
        }
        store
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(NoPersistence))
    }

    pub fn peers_by_address(&self) -> &DashMap<Address, Peer> {
        &self.persisted_peers_by_address
    }

    /// Write the current contents. Best-effort, logs on failure.
    pub fn persist(&self) {
        let _guard = self.persist_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut peers: Vec<Peer> = self
            .persisted_peers_by_address
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        peers.sort_by(Peer::newest_first);
        if let Err(e) = self.persistence.persist(&peers) {
            tracing::warn!(error = %e, count = peers.len(), "failed to persist peers");
        }
    }
}
