//! Quantize, dequantize and dot-product benchmarks.
//!
//! Measures per-row codec cost for each block format and the Q4_0 x Q8_0
//! dot product across kernel variants.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use gg_quant::engine::vec_dot::{vec_dot_f32_with, vec_dot_q4_0_q8_0_with};
use gg_quant::engine::{
    quantize_row, type_traits, BlockBuf, BlockQ4_0, BlockQ8_0, DataType, KernelVariant, QK_K,
};

const ROW: usize = 4096;

fn create_row(n: usize) -> Vec<f32> {
    (0..n).map(|i| ((i * 7919 % 1013) as f32 - 506.0) / 253.0).collect()
}

const CODECS: [DataType; 7] = [
    DataType::F16,
    DataType::Q4_0,
    DataType::Q8_0,
    DataType::Q4K,
    DataType::Q6K,
    DataType::Q3K,
    DataType::Q2K,
];

fn bench_quantize(c: &mut Criterion) {
    let mut group = c.benchmark_group("quantize_row");
    let src = create_row(ROW);

    for dtype in CODECS {
        let traits = type_traits(dtype);
        let Some(from_float) = traits.from_float else { continue };
        let mut dst = BlockBuf::zeroed(traits.row_size(ROW));

        group.throughput(Throughput::Bytes((ROW * 4) as u64));
        group.bench_with_input(BenchmarkId::new("from_float", dtype.name()), &src, |b, src| {
            b.iter(|| from_float(black_box(src), dst.as_bytes_mut()))
        });
    }

    group.finish();
}

fn bench_dequantize(c: &mut Criterion) {
    let mut group = c.benchmark_group("dequantize_row");
    let src = create_row(ROW);

    for dtype in CODECS {
        let traits = type_traits(dtype);
        let (Some(from_float), Some(to_float)) = (traits.from_float, traits.to_float) else {
            continue;
        };
        let mut blocks = BlockBuf::zeroed(traits.row_size(ROW));
        from_float(&src, blocks.as_bytes_mut());
        let mut dst = vec![0f32; ROW];

        group.throughput(Throughput::Elements(ROW as u64));
        group.bench_with_input(BenchmarkId::new("to_float", dtype.name()), &blocks, |b, blocks| {
            b.iter(|| to_float(black_box(blocks.as_bytes()), &mut dst))
        });
    }

    group.finish();
}

fn bench_vec_dot_variants(c: &mut Criterion) {
    let mut group = c.benchmark_group("vec_dot_variants");
    let xf = create_row(ROW);
    let yf: Vec<f32> = xf.iter().rev().copied().collect();
    let w = quantize_row::<BlockQ4_0>(&xf);
    let a = quantize_row::<BlockQ8_0>(&yf);

    let variants = [KernelVariant::Scalar, KernelVariant::Avx2, KernelVariant::Neon];
    for variant in variants.into_iter().filter(|v| v.is_available()) {
        group.throughput(Throughput::Elements(ROW as u64));
        group.bench_function(BenchmarkId::new("q4_0_q8_0", variant.name()), |b| {
            b.iter(|| vec_dot_q4_0_q8_0_with(variant, black_box(&w), black_box(&a)))
        });
        group.bench_function(BenchmarkId::new("f32", variant.name()), |b| {
            b.iter(|| vec_dot_f32_with(variant, black_box(&xf), black_box(&yf)))
        });
    }

    group.finish();
}

fn bench_k_quant_dot(c: &mut Criterion) {
    let mut group = c.benchmark_group("vec_dot_k_quants");
    let n = 16 * QK_K;
    let src = create_row(n);
    let q8k = type_traits(DataType::Q8K);
    let mut act = BlockBuf::zeroed(q8k.row_size(n));
    if let Some(from_float) = q8k.from_float {
        from_float(&src, act.as_bytes_mut());
    }

    for dtype in [DataType::Q4K, DataType::Q6K, DataType::Q3K, DataType::Q2K] {
        let traits = type_traits(dtype);
        let (Some(from_float), Some(vec_dot)) = (traits.from_float, traits.vec_dot) else {
            continue;
        };
        let mut weight = BlockBuf::zeroed(traits.row_size(n));
        from_float(&src, weight.as_bytes_mut());

        group.throughput(Throughput::Elements(n as u64));
        group.bench_function(BenchmarkId::new("vec_dot", dtype.name()), |b| {
            b.iter(|| vec_dot(black_box(n), weight.as_bytes(), act.as_bytes()))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_quantize,
    bench_dequantize,
    bench_vec_dot_variants,
    bench_k_quant_dot
);
criterion_main!(benches);
