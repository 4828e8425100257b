use crate::*;

/// Transport reports not-ready three times, then the initial exchange
/// fills the outbound target and the manager runs until shut down.
#[tokio::test(start_paused = true)]
async fn test_bootstrap_waits_for_transport() {
    let net = network(&TesseraConfig::default(), Arc::new(NoPersistence), 3);
    let log = Arc::new(StateLog::default());
    net.manager.add_listener(log.clone());

    net.manager.initialize().await.unwrap();

    assert_eq!(net.manager.state(), State::Running);
    assert_eq!(net.exchange.initial_calls.load(Ordering::SeqCst), 4);
    assert_eq!(net.node.active_outbound_connections().len(), 3);
    assert_eq!(net.node.num_listeners(), 1);
    assert_eq!(log.wait_for(2).await, [State::Starting, State::Running]);

    net.manager.shutdown().unwrap();
    assert_eq!(net.node.num_listeners(), 0);
    assert_eq!(
        log.wait_for(4).await,
        [State::Starting, State::Running, State::Stopping, State::Terminated]
    );
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_gives_up_when_transport_never_starts() {
    let net = network(&TesseraConfig::default(), Arc::new(NoPersistence), u32::MAX);

    let err = net.manager.initialize().await.unwrap_err();

    assert!(
        matches!(err, PeerGroupError::BootstrapFailed { attempts: 11, .. }),
        "unexpected error: {err}"
    );
    assert_eq!(net.manager.state(), State::Starting);
    assert_eq!(net.node.num_connections(), 0);
}

/// Initial exchange that never completes.
struct Stalled {
    calls: AtomicU32,
}

#[async_trait]
impl PeerExchange for Stalled {
    async fn start_initial_peer_exchange(&self) -> Result<(), PeerGroupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn extend_peer_group(&self) -> anyhow::Result<bool> {
        Ok(false)
    }

    fn shutdown(&self) {}
}

#[tokio::test(start_paused = true)]
async fn test_stalled_initial_exchange_times_out_and_retries() {
    let config = config_from(
        r#"
        [peer_group_manager]
        timeout_in_seconds = 5
        "#,
    );
    let node = Arc::new(SimNode::default());
    let exchange = Arc::new(Stalled {
        calls: AtomicU32::new(0),
    });
    let ban_list = BanList::new();
    let service = Arc::new(PeerGroupService::new(
        config.peer_group.clone(),
        PeerGroupStore::in_memory(),
        [],
        ban_list.clone(),
    ));
    let manager = PeerGroupManager::new(
        node,
        service,
        ban_list,
        config.peer_group_manager.clone(),
        exchange.clone(),
        Arc::new(Idle),
        Arc::new(Idle),
    );

    let err = manager.initialize().await.unwrap_err();

    assert!(matches!(err, PeerGroupError::BootstrapFailed { .. }), "{err}");
    assert!(exchange.calls.load(Ordering::SeqCst) > 1);
    assert_eq!(manager.state(), State::Starting);
}

#[tokio::test(start_paused = true)]
async fn test_lost_outbound_connections_are_replaced() {
    let net = network(&TesseraConfig::default(), Arc::new(NoPersistence), 0);
    net.manager.initialize().await.unwrap();

    let outbound = net.node.active_outbound_connections();
    assert_eq!(outbound.len(), 3);
    for connection in &outbound {
        net.node.drop_connection(connection);
    }
    assert!(net.node.active_outbound_connections().is_empty());

    // Reconnect fires 2 s after the last disconnect.
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(net.exchange.extend_calls.load(Ordering::SeqCst), 1);
    assert_eq!(net.node.active_outbound_connections().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_disconnects_after_shutdown_are_ignored() {
    let net = network(&TesseraConfig::default(), Arc::new(NoPersistence), 0);
    net.manager.initialize().await.unwrap();
    let outbound = net.node.active_outbound_connections();
    net.manager.shutdown().unwrap();

    for connection in &outbound {
        net.node.drop_connection(connection);
    }
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(net.exchange.extend_calls.load(Ordering::SeqCst), 0);
    assert!(net.node.active_outbound_connections().is_empty());
}
