//! Policy chain encode/verify cost over plain byte buffers.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use ermalloc_core::{Policy, PolicyChain};

fn chains() -> Vec<(&'static str, PolicyChain)> {
    vec![
        ("nil", PolicyChain::single(Policy::Nil)),
        ("r3", PolicyChain::single(Policy::tmr())),
        (
            "r5",
            PolicyChain::single(Policy::redundancy(5).expect("valid copies")),
        ),
        (
            "r3+r3",
            PolicyChain::new(&[Policy::tmr(), Policy::tmr()]).expect("valid chain"),
        ),
    ]
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_encode");
    for size in [64usize, 4096] {
        group.throughput(Throughput::Bytes(size as u64));
        for (name, chain) in chains() {
            let mut buffer = chain.encode_to_vec(&vec![0x5A; size]).expect("encode");
            group.bench_with_input(BenchmarkId::new(name, size), &size, |b, _| {
                b.iter(|| chain.encode(criterion::black_box(&mut buffer)));
            });
        }
    }
    group.finish();
}

fn bench_verify_clean(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain_verify_clean");
    for size in [64usize, 4096] {
        group.throughput(Throughput::Bytes(size as u64));
        for (name, chain) in chains() {
            let mut buffer = chain.encode_to_vec(&vec![0x5A; size]).expect("encode");
            group.bench_with_input(BenchmarkId::new(name, size), &size, |b, _| {
                b.iter(|| criterion::black_box(chain.verify_and_correct(&mut buffer)));
            });
        }
    }
    group.finish();
}

fn bench_verify_single_fault(c: &mut Criterion) {
    let chain = PolicyChain::single(Policy::tmr());
    let clean = chain.encode_to_vec(&vec![0xA5; 4096]).expect("encode");
    c.bench_function("chain_repair_single_fault_4k", |b| {
        b.iter_batched(
            || {
                let mut buffer = clean.clone();
                buffer[4096 + 17] ^= 0x01;
                buffer
            },
            |mut buffer| criterion::black_box(chain.verify_and_correct(&mut buffer)),
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_encode,
    bench_verify_clean,
    bench_verify_single_fault
);
criterion_main!(benches);
