//! Dot products against nested-loop references.

use gg_quant::engine::vec_dot::{
    vec_dot_f32_scalar, vec_dot_f32_with, vec_dot_q4_0_q8_0_scalar, vec_dot_q4_0_q8_0_with,
    vec_dot_q8_0_q8_0_scalar, vec_dot_q8_0_q8_0_with,
};
use gg_quant::engine::{
    dequantize_row, quantize_row, type_traits, BlockBuf, BlockQ2K, BlockQ3K, BlockQ4K, BlockQ4_0,
    BlockQ6K, BlockQ8K, BlockQ8_0, DataType, KernelVariant, QuantBlock, VecDot, QK_K,
};
use half::f16;
use proptest::prelude::*;

const VARIANTS: [KernelVariant; 3] = [KernelVariant::Scalar, KernelVariant::Avx2, KernelVariant::Neon];

fn row(n: usize) -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-4.0f32..4.0f32, n..=n)
}

/// Exact dot of the decoded values, plus the sum of term magnitudes used to
/// scale the tolerance.
fn reference<W: QuantBlock, A: QuantBlock>(w: &[W], a: &[A]) -> (f64, f64) {
    let wf = dequantize_row(w);
    let af = dequantize_row(a);
    wf.iter().zip(af.iter()).fold((0.0, 0.0), |(sum, mag), (&x, &y)| {
        let t = x as f64 * y as f64;
        (sum + t, mag + t.abs())
    })
}

fn assert_close(actual: f32, (expected, magnitude): (f64, f64), rel: f64, what: &str) {
    let tol = rel * magnitude + 1e-6;
    assert!(
        (actual as f64 - expected).abs() <= tol,
        "{what}: expected {expected}, got {actual} (tolerance {tol})"
    );
}

// ============================================================================
// 32-element formats
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_q4_0_q8_0_matches_reference(w in row(128), a in row(128)) {
        let wq = quantize_row::<BlockQ4_0>(&w);
        let aq = quantize_row::<BlockQ8_0>(&a);
        let dot = BlockQ4_0::vec_dot(128, &wq, &aq);
        assert_close(dot, reference(&wq, &aq), 1e-5, "q4_0 x q8_0");
    }

    #[test]
    fn prop_q8_0_q8_0_matches_reference(w in row(96), a in row(96)) {
        let wq = quantize_row::<BlockQ8_0>(&w);
        let aq = quantize_row::<BlockQ8_0>(&a);
        let dot = BlockQ8_0::vec_dot(96, &wq, &aq);
        assert_close(dot, reference(&wq, &aq), 1e-5, "q8_0 x q8_0");
    }

    #[test]
    fn prop_integer_kernels_agree_across_variants(w in row(64), a in row(64)) {
        let wq = quantize_row::<BlockQ4_0>(&w);
        let w8 = quantize_row::<BlockQ8_0>(&w);
        let aq = quantize_row::<BlockQ8_0>(&a);
        let q4 = vec_dot_q4_0_q8_0_scalar(&wq, &aq);
        let q8 = vec_dot_q8_0_q8_0_scalar(&w8, &aq);
        for variant in VARIANTS.into_iter().filter(|v| v.is_available()) {
            prop_assert_eq!(vec_dot_q4_0_q8_0_with(variant, &wq, &aq), q4, "{}", variant.name());
            prop_assert_eq!(vec_dot_q8_0_q8_0_with(variant, &w8, &aq), q8, "{}", variant.name());
        }
    }
}

#[test]
fn q8_0_extreme_codes_do_not_overflow() {
    let x = BlockQ8_0 { d: f16::ONE, qs: [-128; 32] };
    for variant in VARIANTS.into_iter().filter(|v| v.is_available()) {
        let dot = vec_dot_q8_0_q8_0_with(variant, &[x], &[x]);
        assert_eq!(dot, 32.0 * 16384.0, "{}", variant.name());
    }
}

#[test]
fn f32_dot_within_tolerance_for_every_variant() {
    // length 37 exercises the vector tail
    let xs: Vec<f32> = (0..37).map(|i| (i as f32 * 0.3).sin()).collect();
    let ys: Vec<f32> = (0..37).map(|i| (i as f32 * 0.7).cos()).collect();
    let expected: f64 = xs.iter().zip(ys.iter()).map(|(&x, &y)| x as f64 * y as f64).sum();
    let magnitude: f64 = xs.iter().zip(ys.iter()).map(|(&x, &y)| (x as f64 * y as f64).abs()).sum();

    assert_close(vec_dot_f32_scalar(&xs, &ys), (expected, magnitude), 1e-5, "scalar");
    for variant in VARIANTS.into_iter().filter(|v| v.is_available()) {
        assert_close(vec_dot_f32_with(variant, &xs, &ys), (expected, magnitude), 1e-5, variant.name());
    }
}

#[test]
fn f16_dot_matches_reference() {
    let xs: Vec<f16> = (0..64).map(|i| f16::from_f32(i as f32 / 16.0 - 2.0)).collect();
    let ys: Vec<f16> = (0..64).map(|i| f16::from_f32(1.0 - i as f32 / 32.0)).collect();
    let dot = f16::vec_dot(64, &xs, &ys);
    assert_close(dot, reference(&xs, &ys), 1e-6, "f16");
}

// ============================================================================
// Super-block formats against Q8_K activations
// ============================================================================

// The asymmetric formats subtract a min term, so the float result carries
// cancellation error relative to the decoded-value reference.
const K_REL: f64 = 1e-4;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(25))]

    #[test]
    fn prop_q4k_matches_reference(w in row(2 * QK_K), a in row(2 * QK_K)) {
        let wq = quantize_row::<BlockQ4K>(&w);
        let aq = quantize_row::<BlockQ8K>(&a);
        assert_close(BlockQ4K::vec_dot(2 * QK_K, &wq, &aq), reference(&wq, &aq), K_REL, "q4_k");
    }

    #[test]
    fn prop_q6k_matches_reference(w in row(QK_K), a in row(QK_K)) {
        let wq = quantize_row::<BlockQ6K>(&w);
        let aq = quantize_row::<BlockQ8K>(&a);
        assert_close(BlockQ6K::vec_dot(QK_K, &wq, &aq), reference(&wq, &aq), K_REL, "q6_k");
    }

    #[test]
    fn prop_q3k_matches_reference(w in row(QK_K), a in row(QK_K)) {
        let wq = quantize_row::<BlockQ3K>(&w);
        let aq = quantize_row::<BlockQ8K>(&a);
        assert_close(BlockQ3K::vec_dot(QK_K, &wq, &aq), reference(&wq, &aq), K_REL, "q3_k");
    }

    #[test]
    fn prop_q2k_matches_reference(w in row(QK_K), a in row(QK_K)) {
        let wq = quantize_row::<BlockQ2K>(&w);
        let aq = quantize_row::<BlockQ8K>(&a);
        assert_close(BlockQ2K::vec_dot(QK_K, &wq, &aq), reference(&wq, &aq), K_REL, "q2_k");
    }
}

// ============================================================================
// Dispatch table entry points
// ============================================================================

#[test]
fn table_vec_dot_quantizes_against_its_activation_type() {
    let n = 2 * QK_K;
    let w: Vec<f32> = (0..n).map(|i| ((i * 17 % 23) as f32 - 11.0) / 4.0).collect();
    let a: Vec<f32> = (0..n).map(|i| ((i * 5 % 19) as f32 - 9.0) / 3.0).collect();

    for dtype in [DataType::Q4_0, DataType::Q8_0, DataType::Q4K, DataType::Q6K, DataType::Q3K, DataType::Q2K] {
        let traits = type_traits(dtype);
        let act = type_traits(traits.vec_dot_type);

        let mut wb = BlockBuf::zeroed(traits.row_size(n));
        traits.require_from_float().unwrap()(&w, wb.as_bytes_mut());
        let mut ab = BlockBuf::zeroed(act.row_size(n));
        act.require_from_float().unwrap()(&a, ab.as_bytes_mut());

        let mut wf = vec![0f32; n];
        traits.require_to_float().unwrap()(wb.as_bytes(), &mut wf);
        let mut af = vec![0f32; n];
        act.require_to_float().unwrap()(ab.as_bytes(), &mut af);
        let expected: f64 = wf.iter().zip(af.iter()).map(|(&x, &y)| x as f64 * y as f64).sum();
        let magnitude: f64 = wf.iter().zip(af.iter()).map(|(&x, &y)| (x as f64 * y as f64).abs()).sum();

        let dot = traits.require_vec_dot().unwrap()(n, wb.as_bytes(), ab.as_bytes());
        assert_close(dot, (expected, magnitude), K_REL, dtype.name());
    }
}

#[test]
fn table_f32_dot_reads_raw_floats() {
    let xs = [1.0f32, 2.0, 3.0, 4.0];
    let ys = [0.5f32, -1.0, 2.0, 0.25];
    let dot = type_traits(DataType::F32).require_vec_dot().unwrap()(
        4,
        bytemuck::cast_slice(&xs[..]),
        bytemuck::cast_slice(&ys[..]),
    );
    assert!((dot - 5.5).abs() < 1e-6, "expected 5.5, got {dot}");
}
