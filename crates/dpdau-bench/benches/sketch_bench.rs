use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dpdau_core::{SketchConfig, SketchFactory};
use dpdau_membrane::sketch_hash;

fn cfg() -> SketchConfig {
    SketchConfig { k: 4096, use_bloom_for_diff: true, bloom_fp_rate: 0.01 }
}

fn hashed_keys(n: u64) -> Vec<u64> {
    (0..n).map(|i| sketch_hash(&i.to_le_bytes())).collect()
}

fn bench_add(c: &mut Criterion) {
    let keys = hashed_keys(20_000);
    let mut group = c.benchmark_group("sketch_add");
    for backend in ["set", "kmv", "hllpp"] {
        let factory = SketchFactory::new(cfg(), backend).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(backend), &keys, |b, keys| {
            b.iter(|| {
                let mut sketch = factory.create();
                for key in keys {
                    sketch.add(black_box(*key));
                }
                black_box(sketch.estimate())
            });
        });
    }
    group.finish();
}

fn bench_union(c: &mut Criterion) {
    let a_keys = hashed_keys(10_000);
    let b_keys: Vec<u64> = (10_000..20_000).map(|i| sketch_hash(&i.to_le_bytes())).collect();

    let mut group = c.benchmark_group("sketch_union");
    for backend in ["set", "kmv", "hllpp"] {
        let factory = SketchFactory::new(cfg(), backend).unwrap();
        let mut a = factory.create();
        for key in &a_keys {
            a.add(*key);
        }
        let mut b = factory.create();
        for key in &b_keys {
            b.add(*key);
        }
        group.bench_function(backend, |bench| {
            bench.iter(|| {
                let mut merged = a.clone();
                merged.union(&b).unwrap();
                black_box(merged.estimate())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_add, bench_union);
criterion_main!(benches);
