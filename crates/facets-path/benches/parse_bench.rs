//! Benchmarks for pattern compilation.
//!
//! Run with: `cargo bench --package facets-path --bench parse_bench`
//!
//! Covers the two-name fast path, the general parser on progressively
//! richer patterns, and cached lookups through [`PatternCache`].

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use facets_path::{PatternCache, parse};
use std::hint::black_box;

const PATTERNS: &[(&str, &str)] = &[
    ("pair", "address.city"),
    ("chain", "owner . address . city . name"),
    ("group", "[first_name,last_name,age].changed"),
    ("cycle", "children*.name"),
    ("metadata", "max_+editable, min_-transient"),
    ("items", "owner.address?.tags[]"),
];

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    for (label, pattern) in PATTERNS {
        group.bench_with_input(BenchmarkId::from_parameter(label), pattern, |b, pattern| {
            b.iter(|| parse(black_box(pattern)));
        });
    }
    group.finish();
}

fn bench_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");
    group.bench_function("warm_hits", |b| {
        let mut cache = PatternCache::new(16);
        for (_, pattern) in PATTERNS {
            let _ = cache.get_or_parse(pattern);
        }
        b.iter(|| {
            for (_, pattern) in PATTERNS {
                let _ = black_box(cache.get_or_parse(black_box(pattern)));
            }
        });
    });
    group.bench_function("thrash", |b| {
        let mut cache = PatternCache::new(2);
        b.iter(|| {
            for (_, pattern) in PATTERNS {
                let _ = black_box(cache.get_or_parse(black_box(pattern)));
            }
        });
    });
    group.finish();
}

criterion_group!(benches, bench_parse, bench_cache);
criterion_main!(benches);
