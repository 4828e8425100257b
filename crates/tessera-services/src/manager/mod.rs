//! Peer group manager: keeps the node's connection count inside the
//! configured bounds.
//!
//! Lifecycle: `initialize` runs the initial peer exchange (retried with
//! backoff until the state machine reaches `Running`), then starts the
//! periodic housekeeping task. Disconnects re-arm a short delayed task
//! that asks the peer exchange for more connections; bursts of
//! disconnects coalesce into one request.

mod housekeeping;
mod state;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tessera_core::config::PeerGroupManagerConfig;
use tessera_core::Address;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::ban_list::BanList;
use crate::error::PeerGroupError;
use crate::exchange::{Lifecycle, PeerExchange};
use crate::node::{same_listener, CloseReason, ConnectionListener, ConnectionRef, Node};
use crate::peer_group_service::PeerGroupService;
use crate::retry::{RetryError, RetryPolicy};

pub use state::State;
use state::StateCell;

/// Delay between a disconnect and the reconnection attempt it triggers.
const CREATE_CONNECTIONS_DELAY: Duration = Duration::from_secs(2);

/// Receives lifecycle updates. Called off the task that changed the state.
pub trait PeerGroupListener: Send + Sync {
    fn on_state_changed(&self, state: State);
}

type Listeners = Arc<Mutex<Vec<Arc<dyn PeerGroupListener>>>>;

pub struct PeerGroupManager {
    me: Weak<PeerGroupManager>,
    node: Arc<dyn Node>,
    ban_list: BanList,
    config: PeerGroupManagerConfig,
    peer_group_service: Arc<PeerGroupService>,
    peer_exchange: Arc<dyn PeerExchange>,
    keep_alive: Arc<dyn Lifecycle>,
    network_load_exchange: Arc<dyn Lifecycle>,
    state: StateCell,
    /// Set when an initial exchange attempt failed after claiming `Starting`.
    bootstrap_failed: AtomicBool,
    listeners: Listeners,
    state_tx: mpsc::UnboundedSender<State>,
    retry_policy: RetryPolicy<State, PeerGroupError>,
    runtime: Handle,
    house_keeping_task: Mutex<Option<JoinHandle<()>>>,
    create_connections_task: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: broadcast::Sender<()>,
    /// Serializes the `Running` transition with `shutdown`, so collaborators
    /// are either started before shutdown stops them or not at all.
    lifecycle: Mutex<()>,
}

impl PeerGroupManager {
    /// Must be called from within a tokio runtime.
    pub fn new(
        node: Arc<dyn Node>,
        peer_group_service: Arc<PeerGroupService>,
        ban_list: BanList,
        config: PeerGroupManagerConfig,
        peer_exchange: Arc<dyn PeerExchange>,
        keep_alive: Arc<dyn Lifecycle>,
        network_load_exchange: Arc<dyn Lifecycle>,
    ) -> Arc<Self> {
        let runtime = Handle::current();
        let listeners: Listeners = Arc::new(Mutex::new(Vec::new()));
        let (state_tx, state_rx) = mpsc::unbounded_channel();
        runtime.spawn(dispatch_state_changes(state_rx, listeners.clone()));
        let (shutdown_tx, _) = broadcast::channel(1);

        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            node,
            ban_list,
            config,
            peer_group_service,
            peer_exchange,
            keep_alive,
            network_load_exchange,
            state: StateCell::new(),
            bootstrap_failed: AtomicBool::new(false),
            listeners,
            state_tx,
            retry_policy: bootstrap_retry_policy(),
            runtime,
            house_keeping_task: Mutex::new(None),
            create_connections_task: Mutex::new(None),
            shutdown_tx,
            lifecycle: Mutex::new(()),
        })
    }

    pub fn state(&self) -> State {
        self.state.get()
    }

    pub fn node(&self) -> &Arc<dyn Node> {
        &self.node
    }

    pub fn peer_group_service(&self) -> &Arc<PeerGroupService> {
        &self.peer_group_service
    }

    /// Bootstrap the peer group. Returns once the manager is `Running` or
    /// the retry budget is spent.
    pub async fn initialize(&self) -> Result<(), PeerGroupError> {
        tracing::info!(node = %self.node.node_info(), "initialize peer group manager");
        if self.state() == State::New {
            if let Some(me) = self.me.upgrade() {
                self.node.add_listener(me);
            }
        }

        match self.retry_policy.run(|| self.do_initialize()).await {
            Ok(_) => Ok(()),
            Err(RetryError::Rejected(e)) => {
                tracing::error!(error = %e, "peer group bootstrap failed");
                Err(e)
            }
            Err(RetryError::Exhausted {
                attempts,
                elapsed,
                last,
            }) => {
                tracing::error!(
                    attempts,
                    ?elapsed,
                    last = ?last,
                    state = ?self.state(),
                    "peer group bootstrap failed, max retries exceeded"
                );
                Err(PeerGroupError::BootstrapFailed { attempts, elapsed })
            }
        }
    }

    /// Stop all periodic work and the collaborators. Expected from `Running`.
    pub fn shutdown(&self) -> Result<(), PeerGroupError> {
        let _lifecycle = lock(&self.lifecycle);
        self.set_state(State::Stopping)?;
        let _ = self.shutdown_tx.send(());
        if let Some(me) = self.me.upgrade() {
            let listener: Arc<dyn ConnectionListener> = me;
            self.node.remove_listener(&listener);
        }
        self.peer_exchange.shutdown();
        self.keep_alive.shutdown();
        self.network_load_exchange.shutdown();
        self.cancel_tasks();
        self.set_state(State::Terminated)
    }

    async fn do_initialize(&self) -> Result<State, PeerGroupError> {
        let state = self.state();
        let resume = state == State::Starting && self.bootstrap_failed.swap(false, Ordering::SeqCst);
        if state == State::New {
            if let Err(e) = self.set_state(State::Starting) {
                // Another initialize call won the race.
                tracing::warn!(error = %e, "ignoring initialize call");
                return Ok(self.state());
            }
        } else if resume {
            tracing::info!("resuming initial peer exchange after failed attempt");
        } else {
            tracing::warn!(?state, "got called at an invalid state, ignoring the call");
            return Ok(state);
        }

        let exchange =
            tokio::time::timeout(self.config.timeout(), self.peer_exchange.start_initial_peer_exchange()).await;
        let result = match exchange {
            Ok(result) => result,
            Err(_) => Err(PeerGroupError::NotReady(format!(
                "initial peer exchange timed out after {:?}",
                self.config.timeout()
            ))),
        };
        if let Err(e) = result {
            self.bootstrap_failed.store(true, Ordering::SeqCst);
            tracing::warn!(error = %e, "initial peer exchange failed");
            return Err(e);
        }

        let _lifecycle = lock(&self.lifecycle);
        if let Err(e) = self.set_state(State::Running) {
            tracing::info!(
                state = ?self.state(),
                "shut down during initial peer exchange, not starting periodic tasks"
            );
            return Err(e);
        }
        tracing::info!(
            interval_secs = self.config.house_keeping_interval_in_seconds,
            "completed initial peer exchange, starting periodic tasks"
        );
        self.start_house_keeping();
        self.keep_alive.initialize();
        self.network_load_exchange.initialize();
        Ok(State::Running)
    }

    // ── Seed nodes ────────────────────────────────────────────────────────────

    pub fn add_seed_node_addresses(&self, addresses: impl IntoIterator<Item = Address>) {
        for address in addresses {
            self.peer_group_service.add_seed_node_address(address);
        }
    }

    pub fn add_seed_node_address(&self, address: Address) {
        self.peer_group_service.add_seed_node_address(address);
    }

    pub fn remove_seed_node_address(&self, address: &Address) {
        self.peer_group_service.remove_seed_node_address(address);
    }

    // ── Listeners ─────────────────────────────────────────────────────────────

    pub fn add_listener(&self, listener: Arc<dyn PeerGroupListener>) {
        lock(&*self.listeners).push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn PeerGroupListener>) {
        lock(&*self.listeners).retain(|l| !same_listener(l, listener));
    }

    fn set_state(&self, new_state: State) -> Result<(), PeerGroupError> {
        self.state.advance(new_state)?;
        tracing::info!(state = ?new_state, "new state");
        // Only fails once the dispatcher is gone, i.e. the runtime is shutting down.
        let _ = self.state_tx.send(new_state);
        Ok(())
    }

    // ── Scheduling ────────────────────────────────────────────────────────────

    fn start_house_keeping(&self) {
        let me = self.me.clone();
        let interval = self.config.house_keeping_interval().max(Duration::from_secs(1));
        let mut shutdown = self.shutdown_tx.subscribe();
        let handle = self.runtime.spawn(async move {
            let start = tokio::time::Instant::now() + interval / 4;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        let Some(manager) = me.upgrade() else { break };
                        manager.do_house_keeping().await;
                    }
                }
            }
            tracing::debug!("house keeping stopped");
        });
        if let Some(previous) = lock(&self.house_keeping_task).replace(handle) {
            previous.abort();
        }
    }

    fn schedule_create_connections(&self) {
        let me = self.me.clone();
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(CREATE_CONNECTIONS_DELAY).await;
            if let Some(manager) = me.upgrade() {
                manager.maybe_create_connections();
            }
        });
        if let Some(previous) = lock(&self.create_connections_task).replace(handle) {
            previous.abort();
        }
    }

    fn cancel_create_connections_task(&self) {
        if let Some(task) = lock(&self.create_connections_task).take() {
            task.abort();
        }
    }

    fn cancel_tasks(&self) {
        if let Some(task) = lock(&self.house_keeping_task).take() {
            task.abort();
        }
        self.cancel_create_connections_task();
    }
}

impl ConnectionListener for PeerGroupManager {
    fn on_connection(&self, connection: &ConnectionRef) {
        tracing::trace!(peer = %connection.peer_address(), "connection established");
    }

    fn on_disconnect(&self, connection: &ConnectionRef, reason: CloseReason) {
        if self.state() >= State::Stopping {
            return;
        }
        tracing::debug!(
            peer = %connection.peer_address(),
            %reason,
            "connection closed, scheduling maybe_create_connections"
        );
        self.schedule_create_connections();
    }
}

impl Drop for PeerGroupManager {
    fn drop(&mut self) {
        self.cancel_tasks();
    }
}

/// 1 s → 20 s exponential backoff with 25 % jitter, at most 10 retries
/// within 5 minutes. Retries while the transport is not ready and while
/// the state machine has not left `Starting`.
fn bootstrap_retry_policy() -> RetryPolicy<State, PeerGroupError> {
    RetryPolicy::builder()
        .with_backoff(Duration::from_secs(1), Duration::from_secs(20))
        .with_jitter(0.25)
        .with_max_duration(Duration::from_secs(5 * 60))
        .with_max_retries(10)
        .handle_error_if(|e| matches!(e, PeerGroupError::NotReady(_)))
        .handle_result_if(|state| *state == State::Starting)
        .build()
}

/// Deliver state changes in order, one listener at a time. A panicking
/// listener is logged and skipped.
async fn dispatch_state_changes(mut state_rx: mpsc::UnboundedReceiver<State>, listeners: Listeners) {
    while let Some(state) = state_rx.recv().await {
        let snapshot = lock(&*listeners).clone();
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener.on_state_changed(state))).is_err() {
                tracing::error!(?state, "calling on_state_changed at listener failed");
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
