use bedrock::{Cache, Hunk, Memory, Zone};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

/// Benchmark zone alloc/free churn at small-string sizes
fn bench_zone_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("zone_churn");

    group.bench_function("alloc_free_cycle", |b| {
        b.iter(|| {
            let mut hunk = Hunk::new(256 * 1024);
            let mut zone = Zone::new(&mut hunk, 128 * 1024).unwrap();
            let mut live = Vec::with_capacity(64);
            for round in 0..16 {
                for size in [24, 56, 120, 260] {
                    if let Some(p) = zone.tag_malloc(hunk.arena_mut(), size, 1).unwrap() {
                        live.push(p);
                    }
                }
                // free every other allocation to force coalescing work
                if round % 2 == 1 {
                    for p in live.drain(..) {
                        zone.free(hunk.arena_mut(), p).unwrap();
                    }
                }
            }
            black_box(hunk.low_used());
        });
    });

    group.finish();
}

/// Benchmark raw hunk stack allocation
fn bench_hunk_alloc(c: &mut Criterion) {
    let mut group = c.benchmark_group("hunk_alloc");

    group.bench_function("low_1k_blocks", |b| {
        b.iter(|| {
            let mut hunk = Hunk::new(4 * 1024 * 1024);
            for _ in 0..1000 {
                hunk.alloc_low(1024, "bench").unwrap();
            }
            black_box(hunk.low_used());
        });
    });

    group.bench_function("temp_replacement", |b| {
        b.iter(|| {
            let mut hunk = Hunk::new(1024 * 1024);
            for _ in 0..1000 {
                hunk.temp_alloc(16 * 1024).unwrap();
            }
            black_box(hunk.high_used());
        });
    });

    group.finish();
}

/// Benchmark cache allocation with forced LRU eviction
fn bench_cache_eviction(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_eviction");

    group.bench_function("alloc_with_pressure", |b| {
        b.iter(|| {
            let mut hunk = Hunk::new(64 * 1024);
            hunk.alloc_low(1024, "base").unwrap();
            let mut cache = Cache::new();
            // far more requests than the arena holds: every allocation
            // past the first few evicts
            for i in 0..256 {
                let user = cache.new_user();
                cache.alloc(&mut hunk, user, 2048, "blob").unwrap();
                black_box(i);
            }
        });
    });

    group.finish();
}

/// Benchmark the full context: zone inside hunk, cache in the middle
fn bench_memory_mixed(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_mixed");

    group.bench_function("mixed_workload", |b| {
        b.iter(|| {
            let mut memory = Memory::init(1024 * 1024, 128 * 1024).unwrap();
            let user = memory.cache_new_user();
            for _ in 0..64 {
                let z = memory.zone_malloc(200).unwrap();
                memory.hunk_mut().temp_alloc(4096).unwrap();
                memory.zone_free(z).unwrap();
            }
            memory.cache_alloc(user, 8192, "asset").unwrap();
            black_box(memory.hunk().low_used());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_zone_churn,
    bench_hunk_alloc,
    bench_cache_eviction,
    bench_memory_mixed
);
criterion_main!(benches);
