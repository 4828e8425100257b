//! Tessera integration test harness.
//!
//! Runs a full peer group (store, service, manager) against a simulated
//! transport node. The simulated peer exchange "dials" by adding outbound
//! connections to the node, so the manager's reconnect and housekeeping
//! paths can be observed end to end without sockets.
//!
//!   cargo test --test integration

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tessera_core::clock::now_millis;
use tessera_core::config::TesseraConfig;
use tessera_core::{Address, Capability, NetworkLoad, Peer, TransportType};
use tessera_services::node::same_listener;
use tessera_services::{
    BanList, BanReason, CloseReason, Connection, ConnectionListener, ConnectionRef,
    JsonFilePersistence, Lifecycle, NoPersistence, Node, PeerExchange, PeerGroupError,
    PeerGroupListener, PeerGroupManager, PeerGroupService, PeerGroupStore, State,
    StorePersistence,
};

mod bootstrap;
mod housekeeping;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const PORT: u16 = 9999;
pub const MINUTE_MS: u64 = 60_000;

pub struct SimConnection {
    id: String,
    address: Address,
    outbound: bool,
    created: u64,
    running: AtomicBool,
}

impl Connection for SimConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn peer_address(&self) -> &Address {
        &self.address
    }

    fn is_outbound(&self) -> bool {
        self.outbound
    }

    fn created(&self) -> u64 {
        self.created
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn num_pending_requests(&self) -> usize {
        0
    }

    fn peers_capability(&self) -> Capability {
        Capability::new(self.address.clone(), vec![TransportType::Clear])
    }

    fn peers_network_load(&self) -> NetworkLoad {
        NetworkLoad::default()
    }
}

/// In-memory transport node.
#[derive(Default)]
pub struct SimNode {
    connections: Mutex<Vec<ConnectionRef>>,
    listeners: Mutex<Vec<Arc<dyn ConnectionListener>>>,
    closed: Mutex<Vec<(String, CloseReason)>>,
    next_id: AtomicU64,
}

impl SimNode {
    pub fn connect(&self, host: &str, outbound: bool, created: u64) -> ConnectionRef {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let connection: ConnectionRef = Arc::new(SimConnection {
            id: format!("{host}#{n}"),
            address: Address::new(host, PORT),
            outbound,
            created,
            running: AtomicBool::new(true),
        });
        self.connections.lock().unwrap().push(connection.clone());
        let listeners = self.listeners.lock().unwrap().clone();
        for listener in listeners {
            listener.on_connection(&connection);
        }
        connection
    }

    /// Remote side hung up.
    pub fn drop_connection(&self, connection: &ConnectionRef) {
        self.remove(connection);
        let listeners = self.listeners.lock().unwrap().clone();
        for listener in listeners {
            listener.on_disconnect(connection, CloseReason::ClosedByPeer);
        }
    }

    pub fn closed_with(&self, reason: CloseReason) -> usize {
        self.closed
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, r)| *r == reason)
            .count()
    }

    pub fn num_listeners(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    fn remove(&self, connection: &ConnectionRef) {
        self.connections
            .lock()
            .unwrap()
            .retain(|c| c.id() != connection.id());
    }
}

impl Node for SimNode {
    fn node_info(&self) -> String {
        "sim-node".into()
    }

    fn add_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn ConnectionListener>) {
        self.listeners
            .lock()
            .unwrap()
            .retain(|l| !same_listener(l, listener));
    }

    fn all_active_connections(&self) -> Vec<ConnectionRef> {
        self.connections.lock().unwrap().clone()
    }

    fn close_connection(&self, connection: &ConnectionRef, reason: CloseReason) {
        self.remove(connection);
        self.closed
            .lock()
            .unwrap()
            .push((connection.id().to_string(), reason));
    }

    fn close_connection_gracefully(&self, connection: &ConnectionRef, reason: CloseReason) {
        self.close_connection(connection, reason);
    }
}

/// Peer exchange that dials new outbound connections on the `SimNode`
/// until the outbound target is reached.
pub struct SimExchange {
    node: Arc<SimNode>,
    outbound_target: usize,
    not_ready: AtomicU32,
    pub initial_calls: AtomicU32,
    pub extend_calls: AtomicU32,
    dialed: AtomicU32,
}

impl SimExchange {
    pub fn new(node: Arc<SimNode>, outbound_target: usize) -> Self {
        Self {
            node,
            outbound_target,
            not_ready: AtomicU32::new(0),
            initial_calls: AtomicU32::new(0),
            extend_calls: AtomicU32::new(0),
            dialed: AtomicU32::new(0),
        }
    }

    pub fn not_ready_for(self, attempts: u32) -> Self {
        self.not_ready.store(attempts, Ordering::SeqCst);
        self
    }

    fn dial_missing(&self) -> bool {
        let missing = self
            .outbound_target
            .saturating_sub(self.node.active_outbound_connections().len());
        for _ in 0..missing {
            let n = self.dialed.fetch_add(1, Ordering::SeqCst);
            self.node.connect(&format!("dialed-{n}"), true, now_millis());
        }
        missing > 0
    }
}

#[async_trait]
impl PeerExchange for SimExchange {
    async fn start_initial_peer_exchange(&self) -> Result<(), PeerGroupError> {
        self.initial_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.not_ready.load(Ordering::SeqCst);
        if remaining > 0 {
            self.not_ready.store(remaining - 1, Ordering::SeqCst);
            return Err(PeerGroupError::NotReady("transport still starting".into()));
        }
        self.dial_missing();
        Ok(())
    }

    async fn extend_peer_group(&self) -> anyhow::Result<bool> {
        self.extend_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.dial_missing())
    }

    fn shutdown(&self) {}
}

pub struct Idle;

impl Lifecycle for Idle {
    fn initialize(&self) {}

    fn shutdown(&self) {}
}

/// Records every state the manager reports.
#[derive(Default)]
pub struct StateLog(pub Mutex<Vec<State>>);

impl PeerGroupListener for StateLog {
    fn on_state_changed(&self, state: State) {
        self.0.lock().unwrap().push(state);
    }
}

impl StateLog {
    /// Wait (on the tokio clock) until `count` states were delivered.
    pub async fn wait_for(&self, count: usize) -> Vec<State> {
        for _ in 0..200 {
            if self.0.lock().unwrap().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.0.lock().unwrap().clone()
    }
}

pub struct Network {
    pub node: Arc<SimNode>,
    pub exchange: Arc<SimExchange>,
    pub ban_list: BanList,
    pub manager: Arc<PeerGroupManager>,
}

/// Wire a full peer group from `config` around a fresh `SimNode`.
pub fn network(
    config: &TesseraConfig,
    persistence: Arc<dyn StorePersistence>,
    not_ready_attempts: u32,
) -> Network {
    let node = Arc::new(SimNode::default());
    let exchange = Arc::new(
        SimExchange::new(node.clone(), config.peer_group.min_num_outbound_connected_peers)
            .not_ready_for(not_ready_attempts),
    );
    let ban_list = BanList::new();
    let (seeds, invalid) = config.network.seed_addresses();
    assert!(invalid.is_empty(), "invalid seeds in test config: {invalid:?}");

    let service = Arc::new(PeerGroupService::new(
        config.peer_group.clone(),
        PeerGroupStore::new(persistence),
        seeds,
        ban_list.clone(),
    ));
    let manager = PeerGroupManager::new(
        node.clone(),
        service,
        ban_list.clone(),
        config.peer_group_manager.clone(),
        exchange.clone(),
        Arc::new(Idle),
        Arc::new(Idle),
    );
    Network {
        node,
        exchange,
        ban_list,
        manager,
    }
}

/// Parse a TOML snippet the same way a config file is read.
pub fn config_from(toml: &str) -> TesseraConfig {
    let dir = temp_dir("config");
    let path = dir.join("config.toml");
    std::fs::write(&path, toml).unwrap();
    TesseraConfig::from_file(&path).unwrap()
}

pub fn temp_dir(label: &str) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!("tessera-it-{label}-{}-{n}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// A creation timestamp `minutes` in the past.
pub fn minutes_ago(minutes: u64) -> u64 {
    now_millis() - minutes * MINUTE_MS
}

pub fn peer(host: &str, created: u64) -> Peer {
    Peer::with_created(
        Capability::new(Address::new(host, PORT), vec![TransportType::Clear]),
        NetworkLoad::default(),
        false,
        created,
    )
}
