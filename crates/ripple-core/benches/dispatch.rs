//! Router fan-out benchmarks for ripple-core.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ripple_core::{InteractionStore, Router, SubscriptionRegistry};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");

    for subscribers in [1usize, 10, 100] {
        let registry = SubscriptionRegistry::new();
        let router = Router::new(registry.clone(), InteractionStore::default());
        let hits = Arc::new(AtomicU64::new(0));

        for _ in 0..subscribers {
            let hits = Arc::clone(&hits);
            registry
                .subscribe("post_42_comments", move |_| {
                    hits.fetch_add(1, Ordering::Relaxed);
                })
                .unwrap();
        }

        let frame = json!({"type": "new_comment", "data": {"post_id": 42, "text": "hi"}}).to_string();

        group.throughput(Throughput::Elements(subscribers as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &frame,
            |b, frame| b.iter(|| router.route_frame(black_box(frame))),
        );
    }

    group.finish();
}

fn bench_interaction_upserts(c: &mut Criterion) {
    let router = Router::new(SubscriptionRegistry::new(), InteractionStore::default());
    let frames: Vec<String> = (0..64)
        .map(|user| {
            json!({
                "type": "live_interaction",
                "data": {"post_id": 7, "user_id": user, "interaction_type": "view"}
            })
            .to_string()
        })
        .collect();

    c.bench_function("live_interaction_64_users", |b| {
        b.iter(|| {
            for frame in &frames {
                router.route_frame(black_box(frame));
            }
        })
    });
}

criterion_group!(benches, bench_fanout, bench_interaction_upserts);
criterion_main!(benches);
