//! Insert and lookup throughput over the in-memory cache.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use blocktree::{BTreeIndex, MemoryCache};

fn padded(prefix: u8, i: usize) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[0] = prefix;
    out[1..8].copy_from_slice(format!("{:07}", i).as_bytes());
    out
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_insert");

    for count in [100usize, 1000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("sequential", count), count, |b, &count| {
            b.iter_with_setup(
                || {
                    let cache = MemoryCache::new(4096, (count as u32) / 8 + 64).unwrap();
                    BTreeIndex::create(cache, 8, 8).unwrap()
                },
                |mut index| {
                    for i in 0..count {
                        index.insert(&padded(b'k', i), &padded(b'v', i)).unwrap();
                    }
                    index
                },
            );
        });
    }

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree_lookup");

    let cache = MemoryCache::new(4096, 256).unwrap();
    let mut index = BTreeIndex::create(cache, 8, 8).unwrap();
    for i in 0..1000 {
        index.insert(&padded(b'k', i), &padded(b'v', i)).unwrap();
    }

    group.throughput(Throughput::Elements(1));
    group.bench_function("hit", |b| {
        let mut i = 0usize;
        b.iter(|| {
            i = (i + 307) % 1000;
            black_box(index.lookup(&padded(b'k', i)).unwrap());
        });
    });
    group.bench_function("miss", |b| {
        b.iter(|| {
            black_box(index.lookup(&padded(b'm', 1)).unwrap_err());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_insert, bench_lookup);
criterion_main!(benches);
