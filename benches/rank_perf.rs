use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use sift_search::search::embedder::{Embedder, HashEmbedder, l2_normalize};
use sift_search::search::vector_cache::{EmbeddingVector, VectorCache, dot_product};
use std::hint::black_box;

const DIM: usize = 384;

/// Deterministic pseudo-random unit vectors (xorshift).
fn unit_vectors(count: usize, dim: usize) -> Vec<EmbeddingVector> {
    let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
    (0..count)
        .map(|i| {
            let mut values: Vec<f32> = (0..dim)
                .map(|_| {
                    state ^= state << 13;
                    state ^= state >> 7;
                    state ^= state << 17;
                    (state % 2000) as f32 / 1000.0 - 1.0
                })
                .collect();
            l2_normalize(&mut values);
            EmbeddingVector::new(i as i64 + 1, values)
        })
        .collect()
}

fn bench_dot_product(c: &mut Criterion) {
    let vectors = unit_vectors(2, DIM);
    let (a, b) = (&vectors[0].values, &vectors[1].values);
    c.bench_function("dot_product_384", |bench| {
        bench.iter(|| black_box(dot_product(black_box(a), black_box(b))))
    });
}

/// Full scan plus top-k selection at typical docs-site sizes.
fn bench_rank(c: &mut Criterion) {
    let mut group = c.benchmark_group("rank_top10");
    let query = unit_vectors(1, DIM).remove(0).values;
    for count in [1_000usize, 10_000, 50_000] {
        let mut cache = VectorCache::new();
        let _ = cache.load(unit_vectors(count, DIM));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| black_box(cache.rank(black_box(&query), 10)))
        });
    }
    group.finish();
}

fn bench_cache_load(c: &mut Criterion) {
    let vectors = unit_vectors(10_000, DIM);
    c.bench_function("cache_load_10k", |b| {
        b.iter(|| {
            let mut cache = VectorCache::new();
            black_box(cache.load(vectors.clone()))
        })
    });
}

fn bench_hash_embed_query(c: &mut Criterion) {
    let embedder = HashEmbedder::default_dimension();
    c.bench_function("hash_embed_query", |b| {
        b.iter(|| black_box(embedder.embed(black_box("how do I size a connection pool"))))
    });
}

criterion_group!(
    benches,
    bench_dot_product,
    bench_rank,
    bench_cache_load,
    bench_hash_embed_query
);
criterion_main!(benches);
