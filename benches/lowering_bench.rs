//! Benchmarks for the lowering hot paths
//!
//! Run with: cargo bench

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use onnx_lower::tensor::{
    broadcast_shapes, transpose_weights, DataType, Permutation, Shape, WeightBuffer,
};

fn conv_filter(out_c: usize, in_c: usize, k: usize) -> WeightBuffer {
    let count = out_c * in_c * k * k;
    let mut raw = Vec::with_capacity(count * 4);
    for i in 0..count {
        raw.extend_from_slice(&(i as f32).to_le_bytes());
    }
    WeightBuffer::new(
        DataType::Float,
        Shape::from_slice(&[out_c as i64, in_c as i64, k as i64, k as i64]),
        Bytes::from(raw),
    )
    .unwrap()
}

fn transpose_benchmark(c: &mut Criterion) {
    let weights = conv_filter(64, 128, 3);
    let perm = Permutation::from_slice(&[1, 0, 2, 3]);

    c.bench_function("transpose_64x128x3x3", |b| {
        b.iter(|| transpose_weights(black_box(&weights), black_box(&perm)).unwrap())
    });
}

fn broadcast_benchmark(c: &mut Criterion) {
    let a = Shape::from_slice(&[32, 1, 224, 224]);
    let b = Shape::from_slice(&[3, 1, 1]);

    c.bench_function("broadcast_shapes", |bench| {
        bench.iter(|| broadcast_shapes(black_box(&a), black_box(&b)).unwrap())
    });
}

criterion_group!(benches, transpose_benchmark, broadcast_benchmark);
criterion_main!(benches);
