//! Codec benchmarks for ripple-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use ripple_protocol::{codec, Envelope, PostId};
use serde_json::json;

fn bench_encode_small(c: &mut Criterion) {
    let frame = Envelope::typing_indicator(&PostId::from(42u64), "user-1", true);

    let mut group = c.benchmark_group("encode");
    group.bench_function("typing_indicator", |b| {
        b.iter(|| codec::encode(black_box(&frame)))
    });
    group.finish();
}

fn bench_decode_comment(c: &mut Criterion) {
    let frame = Envelope::new(
        "new_comment",
        json!({"post_id": 42, "user_id": 7, "text": "x".repeat(256)}),
    );
    let encoded = codec::encode(&frame).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("new_comment_256B", |b| {
        b.iter(|| codec::decode(black_box(&encoded)))
    });
    group.finish();
}

fn bench_decode_malformed(c: &mut Criterion) {
    c.bench_function("decode_malformed", |b| {
        b.iter(|| codec::decode(black_box("{\"type\": 12, \"data\": [")).is_err())
    });
}

criterion_group!(
    benches,
    bench_encode_small,
    bench_decode_comment,
    bench_decode_malformed
);
criterion_main!(benches);
