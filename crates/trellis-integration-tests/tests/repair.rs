//! Failure detection and table repair.

use std::time::Duration;

use tokio::time::Instant;
use trellis_integration_tests::{eventually, init_tracing, peer, Cluster};
use trellis_overlay::NodeId;
use trellis_protocols::OverlayEvent;

#[tokio::test(start_paused = true)]
async fn silent_leaf_is_replaced_from_a_live_leaf() {
    init_tracing();
    let mut cluster = Cluster::default();
    // D < B < A < C. A knows B and C; only C knows D.
    let (d, b, a, c) = (
        peer(50, &[0.0, 5.0]),
        peer(100, &[0.0, 1.0]),
        peer(200, &[0.0, 0.0]),
        peer(300, &[0.0, 2.0]),
    );
    let node_a = cluster.found(a.clone()).await;
    let node_b = cluster.found(b.clone()).await;
    let node_c = cluster.found(c.clone()).await;
    let node_d = cluster.found(d.clone()).await;

    let now = Instant::now();
    {
        let state = node_a.state();
        let mut state = state.write().await;
        state.learn(&b, now);
        state.learn(&c, now);
    }
    {
        let state = node_c.state();
        let mut state = state.write().await;
        state.learn(&a, now);
        state.learn(&b, now);
        state.learn(&d, now);
    }
    node_b.state().write().await.learn(&a, now);
    node_d.state().write().await.learn(&c, now);
    assert_eq!(
        node_a.current_membership().await.leaf_ids(),
        vec![NodeId::new(100), NodeId::new(300)]
    );

    cluster.crash(NodeId::new(100)).await;

    let repaired = eventually(Duration::from_secs(10), || async {
        node_a.current_membership().await.leaf_ids() == vec![NodeId::new(50), NodeId::new(300)]
    })
    .await;
    assert!(repaired, "leaf set is {:?}", node_a.current_membership().await.leaf_ids());
}

#[tokio::test(start_paused = true)]
async fn healthy_overlay_stays_clean() {
    init_tracing();
    let mut cluster = Cluster::default();
    let seed = cluster.found(peer(1 << 100, &[0.0])).await;
    for i in 1..6u128 {
        cluster.join_via(peer(i << 120, &[i as f64]), &seed).await;
    }

    // Several ping rounds with everyone answering.
    tokio::time::sleep(Duration::from_secs(5)).await;
    for node in &cluster.nodes {
        let stats = node.stats().await;
        assert_eq!(stats.suspects, 0, "{} has suspects", node.id().short());
        assert!(stats.leaf_set > 0);
    }
}

#[tokio::test(start_paused = true)]
async fn departed_node_is_dropped_everywhere() {
    init_tracing();
    let mut cluster = Cluster::default();
    let seed = cluster.found(peer(10, &[0.0])).await;
    let leaving = cluster.join_via(peer(20, &[1.0]), &seed).await;
    let third = cluster.join_via(peer(30, &[2.0]), &seed).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut events = seed.subscribe();
    leaving.shutdown().await;

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("departure announced")
        .expect("event channel open");
    assert_eq!(event, OverlayEvent::PeerDeparted(NodeId::new(20)));
    for node in [&seed, &third] {
        let gone = eventually(Duration::from_secs(1), || async {
            !node.state().read().await.knows(NodeId::new(20))
        })
        .await;
        assert!(gone);
    }
}
