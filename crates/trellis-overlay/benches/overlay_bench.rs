//! Benchmarks for the overlay tables
//!
//! Measures performance of:
//! - Next-hop selection on a populated node
//! - Bulk state ingestion
//! - Leaf set insertion

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::time::Instant;
use trellis_overlay::{
    Coordinates, LeafSet, Locator, NodeId, OverlayConfig, OverlayState, Peer, PeerInfo, StateUpdate,
};

fn random_peer(rng: &mut StdRng) -> PeerInfo {
    let id: u128 = rng.gen();
    PeerInfo::new(
        NodeId::new(id),
        Locator::new(format!("mem://{id:032x}")),
        Coordinates::point(&[rng.gen_range(0.0..100.0), rng.gen_range(0.0..100.0)]),
    )
}

fn populated(known: usize) -> OverlayState {
    let mut rng = StdRng::seed_from_u64(7);
    let local = random_peer(&mut rng);
    let config = OverlayConfig::default().without_id_verification();
    let mut state = OverlayState::new(local, config).expect("valid config");
    let now = Instant::now();
    for _ in 0..known {
        state.learn(&random_peer(&mut rng), now);
    }
    state
}

/// Benchmark next-hop selection as the tables fill up
fn bench_next_hop(c: &mut Criterion) {
    let mut group = c.benchmark_group("next_hop");
    let mut rng = StdRng::seed_from_u64(11);
    let targets: Vec<NodeId> = (0..256).map(|_| NodeId::new(rng.gen())).collect();

    for &known in &[10usize, 100, 1_000, 10_000] {
        let state = populated(known);
        group.throughput(Throughput::Elements(targets.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(known), &state, |b, state| {
            b.iter(|| {
                for target in &targets {
                    black_box(state.next_hop(*target));
                }
            })
        });
    }
    group.finish();
}

/// Benchmark merging a full state announcement
fn bench_update_state(c: &mut Criterion) {
    let source = populated(1_000);
    let update: StateUpdate = source.state_update(false);
    let entries = update.rows.iter().map(|r| r.entries.len()).sum::<usize>()
        + update.leaf_set.len()
        + update.neighborhood.len();

    let mut group = c.benchmark_group("update_state");
    group.throughput(Throughput::Elements(entries as u64));
    group.bench_function("fresh_node", |b| {
        b.iter_batched(
            || populated(10),
            |mut state| black_box(state.update_state(&update, Instant::now())),
            criterion::BatchSize::SmallInput,
        )
    });
    group.finish();
}

/// Benchmark leaf set insertion order effects
fn bench_leaf_insert(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(3);
    let ids: Vec<u128> = (0..1_000).map(|_| rng.gen()).collect();
    let local = NodeId::new(u128::MAX / 2);
    let now = Instant::now();

    c.bench_function("leaf_insert_1000", |b| {
        b.iter(|| {
            let mut leaves = LeafSet::new(local, 8);
            for id in &ids {
                let info = PeerInfo::new(NodeId::new(*id), Locator::new("mem://bench"), Coordinates::origin(2));
                leaves.insert(Peer::new(info, 1.0, now));
            }
            black_box(leaves.len())
        })
    });
}

criterion_group!(benches, bench_next_hop, bench_update_state, bench_leaf_insert);
criterion_main!(benches);
