use chained_map::{ChainedHashMap, IntBuildHasher, NodeHashMap};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn filled_map(size: usize) -> ChainedHashMap<String, usize> {
    let mut table = ChainedHashMap::with_capacity(size);
    for i in 0..size {
        table.insert(format!("key{i}"), i);
    }
    table
}

fn bench_operations(c: &mut Criterion) {
    let sizes = [100, 1000, 10000, 100000];

    // Benchmark insert into a pre-sized table
    let mut group = c.benchmark_group("insert");
    for size in sizes {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_with_setup(
                || (filled_map(size), format!("key{}", size + 1)),
                |(mut table, key)| table.insert(key, size),
            );
        });
    }
    group.finish();

    // Benchmark get (hit)
    let mut group = c.benchmark_group("get");
    for size in sizes {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let table = filled_map(size);
            let key = format!("key{}", size / 2);
            b.iter(|| table.get(&key));
        });
    }
    group.finish();

    // Benchmark get (miss)
    let mut group = c.benchmark_group("get_miss");
    for size in sizes {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let table = filled_map(size);
            let key = format!("key{}", size * 2);
            b.iter(|| table.get(&key));
        });
    }
    group.finish();

    // Benchmark remove
    let mut group = c.benchmark_group("remove");
    for size in sizes {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_with_setup(
                || (filled_map(size), format!("key{}", size / 2)),
                |(mut table, key)| table.remove(&key),
            );
        });
    }
    group.finish();

    // Benchmark full iteration
    let mut group = c.benchmark_group("iterate");
    for size in sizes {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let table = filled_map(size);
            b.iter(|| table.values().sum::<usize>());
        });
    }
    group.finish();
}

fn bench_integer_keys(c: &mut Criterion) {
    let size = 100000usize;
    let mut rng = StdRng::seed_from_u64(0xC0FFEE);
    let keys: Vec<u64> = (0..size).map(|_| rng.random()).collect();

    // The Fibonacci-mix hasher against the default SipHash state
    let mut group = c.benchmark_group("insert_u64");
    group.bench_function("random_state", |b| {
        b.iter_with_setup(
            || ChainedHashMap::<u64, u64>::with_capacity(size),
            |mut table| {
                for &key in &keys {
                    table.insert(key, key);
                }
                table
            },
        );
    });
    group.bench_function("int_hasher", |b| {
        b.iter_with_setup(
            || {
                ChainedHashMap::<u64, u64, IntBuildHasher>::with_capacity_and_hasher(
                    size,
                    IntBuildHasher::default(),
                )
            },
            |mut table| {
                for &key in &keys {
                    table.insert(key, key);
                }
                table
            },
        );
    });
    group.finish();

    // Inline vs node storage for lookups
    let mut group = c.benchmark_group("get_u64");
    group.bench_function("inline", |b| {
        let mut table: ChainedHashMap<u64, u64> = ChainedHashMap::with_capacity(size);
        for &key in &keys {
            table.insert(key, key);
        }
        b.iter(|| table.get(&keys[size / 2]));
    });
    group.bench_function("node", |b| {
        let mut table: NodeHashMap<u64, u64> = NodeHashMap::with_capacity(size);
        for &key in &keys {
            table.insert(key, key);
        }
        b.iter(|| table.get(&keys[size / 2]));
    });
    group.finish();
}

criterion_group!(benches, bench_operations, bench_integer_keys);
criterion_main!(benches);
