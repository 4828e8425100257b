use crate::*;

/// First cycle runs a quarter interval (15 s) after bootstrap.
const FIRST_CYCLE: Duration = Duration::from_secs(16);

#[tokio::test(start_paused = true)]
async fn test_overloaded_node_is_trimmed_to_inbound_limit() {
    let net = network(&TesseraConfig::default(), Arc::new(NoPersistence), 0);
    for i in 0..20 {
        net.node.connect(&format!("in-{i}"), false, minutes_ago(10 + i));
    }
    net.manager.initialize().await.unwrap();
    assert_eq!(net.node.num_connections(), 23);

    tokio::time::sleep(FIRST_CYCLE).await;

    // 12 max - 3 min outbound leaves room for 9 inbound.
    assert_eq!(net.node.active_inbound_connections().len(), 9);
    assert_eq!(net.node.active_outbound_connections().len(), 3);
    assert_eq!(net.node.closed_with(CloseReason::TooManyInboundConnections), 11);
    // Enough connections left, no extend request.
    assert_eq!(net.exchange.extend_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_seed_connections_are_capped_and_replaced() {
    let config = config_from(
        r#"
        [network]
        seed_nodes = ["seed-1:9999", "seed-2:9999", "seed-3:9999"]

        [peer_group_manager]
        max_seeds = 2
        "#,
    );
    let net = network(&config, Arc::new(NoPersistence), 0);
    net.node.connect("seed-1", true, minutes_ago(30));
    net.node.connect("seed-2", true, minutes_ago(20));
    net.node.connect("seed-3", true, minutes_ago(10));
    net.manager.initialize().await.unwrap();
    assert_eq!(net.exchange.extend_calls.load(Ordering::SeqCst), 0);

    tokio::time::sleep(FIRST_CYCLE).await;

    let hosts: Vec<String> = net
        .node
        .all_active_connections()
        .iter()
        .map(|c| c.peer_address().host().to_string())
        .collect();
    assert!(!hosts.contains(&"seed-1".to_string()), "{hosts:?}");
    assert!(hosts.contains(&"seed-2".to_string()) && hosts.contains(&"seed-3".to_string()));
    assert_eq!(net.node.closed_with(CloseReason::TooManyConnectionsToSeeds), 1);
    // The freed outbound slot is refilled through the peer exchange.
    assert_eq!(net.exchange.extend_calls.load(Ordering::SeqCst), 1);
    assert_eq!(net.node.active_outbound_connections().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_banned_peer_is_dropped_on_next_cycle() {
    let net = network(&TesseraConfig::default(), Arc::new(NoPersistence), 0);
    let evil = net.node.connect("evil", false, now_millis());
    net.manager.initialize().await.unwrap();
    net.ban_list
        .add(evil.peer_address().clone(), BanReason::AddressValidationFailed);

    tokio::time::sleep(FIRST_CYCLE).await;

    assert_eq!(net.node.closed_with(CloseReason::Banned), 1);
    assert!(net
        .node
        .all_active_connections()
        .iter()
        .all(|c| c.id() != evil.id()));
}

#[tokio::test(start_paused = true)]
async fn test_cycles_repeat_on_interval() {
    let net = network(&TesseraConfig::default(), Arc::new(NoPersistence), 0);
    net.manager.initialize().await.unwrap();
    tokio::time::sleep(FIRST_CYCLE).await;
    assert_eq!(net.node.closed_with(CloseReason::TooManyInboundConnections), 0);

    for i in 0..12 {
        net.node.connect(&format!("late-{i}"), false, minutes_ago(5));
    }
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(net.node.closed_with(CloseReason::TooManyInboundConnections), 3);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_house_keeping() {
    let net = network(&TesseraConfig::default(), Arc::new(NoPersistence), 0);
    net.manager.initialize().await.unwrap();
    net.manager.shutdown().unwrap();

    for i in 0..20 {
        net.node.connect(&format!("in-{i}"), false, minutes_ago(10));
    }
    tokio::time::sleep(Duration::from_secs(300)).await;

    assert_eq!(net.node.active_inbound_connections().len(), 20);
    assert_eq!(net.exchange.extend_calls.load(Ordering::SeqCst), 0);
}
