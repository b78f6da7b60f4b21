//! Routing convergence, both on bare tables and through running nodes.

use std::collections::HashMap;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;
use trellis_integration_tests::{eventually, init_tracing, peer, test_config, Cluster};
use trellis_overlay::{NodeId, OverlayState, RouteDecision};
use trellis_protocols::OverlayEvent;

/// Overlay where every node has offered every other node to its tables.
fn full_knowledge(size: usize, seed: u64) -> HashMap<NodeId, OverlayState> {
    let mut rng = StdRng::seed_from_u64(seed);
    let infos: Vec<_> = (0..size)
        .map(|_| peer(rng.gen(), &[rng.gen_range(0.0..100.0), rng.gen_range(0.0..100.0)]))
        .collect();
    let now = Instant::now();
    infos
        .iter()
        .map(|local| {
            let mut state = OverlayState::new(local.clone(), test_config()).expect("valid state");
            for other in &infos {
                state.learn(other, now);
            }
            (local.id, state)
        })
        .collect()
}

/// Follow next-hop decisions from `start` until some node delivers.
fn walk(overlay: &HashMap<NodeId, OverlayState>, start: NodeId, key: NodeId) -> (NodeId, usize) {
    let mut at = start;
    let mut hops = 0;
    loop {
        match overlay[&at].next_hop(key) {
            RouteDecision::Deliver => return (at, hops),
            RouteDecision::Forward(hop) => {
                at = hop.peer.id;
                hops += 1;
                assert!(hops <= 64, "routing loop towards {}", key.short());
            }
        }
    }
}

#[test]
fn full_knowledge_routes_reach_the_closest_node() {
    let overlay = full_knowledge(64, 11);
    let ids: Vec<NodeId> = overlay.keys().copied().collect();
    let max_prefix = test_config().space.max_prefix();
    let mut rng = StdRng::seed_from_u64(12);

    for _ in 0..200 {
        let key = NodeId::new(rng.gen());
        let start = ids[rng.gen_range(0..ids.len())];
        let (terminal, hops) = walk(&overlay, start, key);

        assert!(hops <= max_prefix, "{hops} hops");
        let closest = ids
            .iter()
            .min_by_key(|id| id.absolute_distance(&key))
            .copied()
            .expect("non-empty overlay");
        assert_eq!(terminal, closest);

        // Nothing the terminal knows is closer than itself.
        let own = terminal.absolute_distance(&key);
        for entry in overlay[&terminal].known_peers() {
            assert!(entry.id.absolute_distance(&key) >= own);
        }
    }
}

#[test]
fn single_node_delivers_everything() {
    let overlay = full_knowledge(1, 3);
    let only = *overlay.keys().next().expect("one node");
    let (terminal, hops) = walk(&overlay, only, NodeId::new(u128::MAX));
    assert_eq!((terminal, hops), (only, 0));
}

#[tokio::test]
async fn routed_data_is_delivered_once_at_the_responsible_node() {
    init_tracing();
    let mut rng = StdRng::seed_from_u64(21);
    let mut cluster = Cluster::default();
    let seed = cluster.found(peer(rng.gen(), &[0.0])).await;
    for _ in 0..9 {
        cluster.join_via(peer(rng.gen(), &[rng.gen_range(0.0..10.0)]), &seed).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let mut subscriptions: Vec<_> = cluster.nodes.iter().map(|n| (n.id(), n.subscribe())).collect();
    let keys: Vec<NodeId> = (0..16).map(|_| NodeId::new(rng.gen())).collect();
    let sender = &cluster.nodes[3];
    let message_id = sender.route_many(keys.clone(), b"payload".to_vec()).await.expect("routed");

    let mut delivered: HashMap<NodeId, NodeId> = HashMap::new();
    let all_in = eventually(Duration::from_secs(2), || {
        for (node, events) in subscriptions.iter_mut() {
            while let Ok(event) = events.try_recv() {
                if let OverlayEvent::Delivered { id, keys, data, .. } = event {
                    assert_eq!(id, message_id);
                    assert_eq!(data, b"payload");
                    for key in keys {
                        assert!(delivered.insert(key, *node).is_none(), "{} delivered twice", key.short());
                    }
                }
            }
        }
        let done = delivered.len() == keys.len();
        async move { done }
    })
    .await;
    assert!(all_in, "only {} of {} keys delivered", delivered.len(), keys.len());

    for key in &keys {
        assert_eq!(Some(delivered[key]), cluster.closest_to(*key), "wrong owner for {}", key.short());
    }
}
