//! Join scenarios over the in-memory network.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use trellis_integration_tests::{eventually, init_tracing, peer, Cluster};
use trellis_overlay::NodeId;
use trellis_protocols::OverlayEvent;

const HIGH: u128 = 1 << 127;

#[tokio::test]
async fn bootstrap_and_joiner_hold_each_other_as_leaves() {
    init_tracing();
    let mut cluster = Cluster::default();
    let bootstrap = cluster.found(peer(0, &[0.0, 0.0])).await;
    let joiner = cluster.join_via(peer(HIGH, &[3.0, 4.0]), &bootstrap).await;

    assert!(joiner
        .current_membership()
        .await
        .leaf_ids()
        .contains(&NodeId::new(0)));
    let learned = eventually(Duration::from_secs(2), || async {
        bootstrap
            .current_membership()
            .await
            .leaf_ids()
            .contains(&NodeId::new(HIGH))
    })
    .await;
    assert!(learned, "bootstrap never added the joiner to its leaf set");
}

#[tokio::test]
async fn members_are_told_about_arrivals() {
    init_tracing();
    let mut cluster = Cluster::default();
    let first = cluster.found(peer(10, &[0.0])).await;
    let second = cluster.join_via(peer(20, &[1.0]), &first).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut first_events = first.subscribe();
    let mut second_events = second.subscribe();
    cluster.join_via(peer(30, &[2.0]), &first).await;

    for events in [&mut first_events, &mut second_events] {
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("arrival announced")
            .expect("event channel open");
        assert_eq!(event, OverlayEvent::PeerArrived(peer(30, &[2.0])));
    }
}

#[tokio::test]
async fn sequential_joins_link_numeric_neighbors() {
    init_tracing();
    let mut rng = StdRng::seed_from_u64(7);
    let mut cluster = Cluster::default();
    let seed = cluster.found(peer(rng.gen(), &[0.0, 0.0])).await;

    for _ in 0..11 {
        let info = peer(rng.gen(), &[rng.gen_range(-50.0..50.0), rng.gen_range(-50.0..50.0)]);
        cluster.join_via(info, &seed).await;
        // Let the state announcements land before the next join routes through them.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let mut ids: Vec<NodeId> = cluster.nodes.iter().map(|n| n.id()).collect();
    ids.sort();
    for (i, id) in ids.iter().enumerate() {
        let node = cluster.node(*id).expect("node exists");
        let mut expected = Vec::new();
        if i > 0 {
            expected.push(ids[i - 1]);
        }
        if i + 1 < ids.len() {
            expected.push(ids[i + 1]);
        }
        let linked = eventually(Duration::from_secs(2), || async {
            let leaves = node.current_membership().await.leaf_ids();
            expected.iter().all(|e| leaves.contains(e))
        })
        .await;
        assert!(linked, "{} is missing a numeric neighbor", id.short());
    }
}

#[tokio::test]
async fn joiner_uses_proximity_closest_entry_point() {
    init_tracing();
    let mut cluster = Cluster::default();
    let far = cluster.found(peer(100, &[100.0, 100.0])).await;
    cluster.join_via(peer(200, &[1.0, 1.0]), &far).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Discovery through `far` points the joiner at 200, its physical neighbor.
    let joiner = cluster.join_via(peer(300, &[0.0, 0.0]), &far).await;
    let membership = joiner.current_membership().await;
    assert_eq!(membership.neighbor_ids().first(), Some(&NodeId::new(200)));
}
