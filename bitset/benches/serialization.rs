//! Serialization and streamed-operation benchmarks.

use bitset::{BitSet, Serializer, SetOperation, deserialize, operation_deserialize};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn sparse_set(seed: u64, bits: usize, space: u64) -> BitSet {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut bv = BitSet::new();
    for _ in 0..bits {
        bv.set(rng.random_range(0..space));
    }
    bv
}

fn clustered_set(clusters: u64) -> BitSet {
    let mut bv = BitSet::new();
    for c in 0..clusters {
        let base = c * 997;
        for k in 0..5 {
            bv.set(base + k);
        }
    }
    bv.optimize();
    bv
}

fn bench_serialize(c: &mut Criterion) {
    let sparse = sparse_set(1, 20_000, 64 * 65536);
    let clustered = clustered_set(5_000);
    let mut serial = Serializer::new();

    c.bench_function("serialize/sparse_20k", |b| {
        b.iter(|| black_box(serial.serialize_to_bytes(&sparse, None)))
    });
    c.bench_function("serialize/clustered_gap", |b| {
        b.iter(|| black_box(serial.serialize_to_bytes(&clustered, None)))
    });
}

fn bench_deserialize(c: &mut Criterion) {
    let sparse = sparse_set(2, 20_000, 64 * 65536);
    let bytes = Serializer::new().serialize_to_bytes(&sparse, None);

    c.bench_function("deserialize/sparse_20k", |b| {
        b.iter(|| {
            let mut bv = BitSet::new();
            deserialize(&mut bv, black_box(&bytes)).unwrap();
            black_box(bv)
        })
    });
}

fn bench_operation(c: &mut Criterion) {
    let a = sparse_set(3, 20_000, 64 * 65536);
    let b_set = sparse_set(4, 20_000, 64 * 65536);
    let bytes = Serializer::new().serialize_to_bytes(&b_set, None);

    c.bench_function("operation/count_and", |b| {
        b.iter(|| {
            let mut target = a.clone();
            black_box(
                operation_deserialize(&mut target, &bytes, SetOperation::CountAnd, false)
                    .unwrap(),
            )
        })
    });
}

criterion_group!(benches, bench_serialize, bench_deserialize, bench_operation);
criterion_main!(benches);
