//! Codec benchmarks for the parley protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use parley_protocol::{codec, Frame};

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    let short = Frame::send("alice", "hi");
    group.bench_function("short", |b| b.iter(|| codec::encode(black_box(&short))));

    let long = Frame::send("alice", "x".repeat(1024));
    group.throughput(Throughput::Bytes(1024));
    group.bench_function("1KB", |b| b.iter(|| codec::encode(black_box(&long))));

    let presence = Frame::presence_update((0..100).map(|i| format!("user-{i}")).collect());
    group.bench_function("presence-100", |b| {
        b.iter(|| codec::encode(black_box(&presence)))
    });

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    let short = codec::encode(&Frame::send("alice", "hi")).unwrap();
    group.bench_function("short", |b| b.iter(|| codec::decode(black_box(&short))));

    let long = codec::encode(&Frame::send("alice", "x".repeat(1024))).unwrap();
    group.throughput(Throughput::Bytes(long.len() as u64));
    group.bench_function("1KB", |b| b.iter(|| codec::decode(black_box(&long))));

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
