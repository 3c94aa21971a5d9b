//! Matmul driver over the dispatch table.

use gg_quant::engine::{DataType, KernelVariant, QuantError, QuantMatmul, QuantWeight};
use gg_quant::KernelConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_matrix(rng: &mut StdRng, rows: usize, cols: usize) -> Vec<f32> {
    (0..rows * cols).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

/// `out[r * nc + c] = act[r] . w[c]` in f64.
fn float_matmul(w: &[f32], act: &[f32], nr: usize, nc: usize, n: usize) -> Vec<f64> {
    let mut out = vec![0f64; nr * nc];
    for r in 0..nr {
        for c in 0..nc {
            out[r * nc + c] = (0..n)
                .map(|k| act[r * n + k] as f64 * w[c * n + k] as f64)
                .sum();
        }
    }
    out
}

fn max_abs_diff(a: &[f32], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .fold(0.0, |m, (&x, &y)| m.max((x as f64 - y).abs()))
}

#[test]
fn quantized_results_track_the_float_product() {
    let (nc, n, nr) = (8, 256, 5);
    let mut rng = StdRng::seed_from_u64(7);
    let w = random_matrix(&mut rng, nc, n);
    let act = random_matrix(&mut rng, nr, n);
    let expected = float_matmul(&w, &act, nr, nc, n);

    // Loose per-format bounds for unit-range inputs over 256 terms.
    let cases = [
        (DataType::F32, 1e-4),
        (DataType::F16, 5e-2),
        (DataType::Q8_0, 0.25),
        (DataType::Q6K, 0.6),
        (DataType::Q4_0, 2.5),
        (DataType::Q4K, 2.5),
        (DataType::Q4_0_4_4, 2.5),
        (DataType::Q4_0_8_8, 2.5),
    ];
    let driver = QuantMatmul::default();
    for (dtype, bound) in cases {
        let weight = QuantWeight::quantize(dtype, &w, nc, n).unwrap();
        let mut out = vec![0f32; nr * nc];
        driver.forward(&weight, &act, nr, &mut out, None).unwrap();
        let err = max_abs_diff(&out, &expected);
        assert!(err <= bound, "{dtype}: max error {err} exceeds {bound}");
    }
}

#[test]
fn blocked_weights_agree_with_plain_q4_0() {
    let (nc, n, nr) = (8, 128, 6);
    let mut rng = StdRng::seed_from_u64(8);
    let w = random_matrix(&mut rng, nc, n);
    let act = random_matrix(&mut rng, nr, n);

    let plain = QuantWeight::quantize(DataType::Q4_0, &w, nc, n).unwrap();
    let mut reference = vec![0f32; nr * nc];
    QuantMatmul::default()
        .forward(&plain, &act, nr, &mut reference, None)
        .unwrap();

    for dtype in [DataType::Q4_0_4_4, DataType::Q4_0_4_8, DataType::Q4_0_8_8] {
        let packed = QuantWeight::quantize(dtype, &w, nc, n).unwrap();
        assert_eq!(packed.as_bytes().len(), plain.as_bytes().len());
        let mut out = vec![0f32; nr * nc];
        QuantMatmul::default()
            .forward(&packed, &act, nr, &mut out, None)
            .unwrap();
        for (i, (&a, &b)) in out.iter().zip(reference.iter()).enumerate() {
            assert!((a - b).abs() <= 1e-4 * (1.0 + b.abs()), "{dtype} [{i}]: {a} vs {b}");
        }
    }
}

#[test]
fn scalar_and_detected_variants_match_exactly() {
    let (nc, n, nr) = (16, 64, 7);
    let mut rng = StdRng::seed_from_u64(9);
    let w = random_matrix(&mut rng, nc, n);
    let act = random_matrix(&mut rng, nr, n);
    let bias = random_matrix(&mut rng, 1, nc);

    let forced = KernelConfig {
        force_scalar: true,
        ..KernelConfig::default()
    };
    assert_eq!(QuantMatmul::new(&forced).variant(), KernelVariant::Scalar);

    for dtype in [DataType::Q4_0_4_4, DataType::Q4_0_8_8] {
        let weight = QuantWeight::quantize(dtype, &w, nc, n).unwrap();
        let mut scalar = vec![0f32; nr * nc];
        QuantMatmul::new(&forced)
            .forward(&weight, &act, nr, &mut scalar, Some(&bias))
            .unwrap();
        let mut fast = vec![0f32; nr * nc];
        QuantMatmul::default()
            .forward(&weight, &act, nr, &mut fast, Some(&bias))
            .unwrap();
        assert_eq!(scalar, fast, "{dtype}");
    }
}

#[test]
fn bias_is_broadcast_across_rows() {
    let (nc, n, nr) = (4, 32, 3);
    let mut rng = StdRng::seed_from_u64(10);
    let w = random_matrix(&mut rng, nc, n);
    let act = random_matrix(&mut rng, nr, n);
    let bias = [0.5f32, -1.0, 2.0, 0.0];
    let weight = QuantWeight::quantize(DataType::Q8_0, &w, nc, n).unwrap();
    let driver = QuantMatmul::with_variant(KernelVariant::Scalar);

    let mut plain = vec![0f32; nr * nc];
    driver.forward(&weight, &act, nr, &mut plain, None).unwrap();
    let mut biased = vec![0f32; nr * nc];
    driver.forward(&weight, &act, nr, &mut biased, Some(&bias)).unwrap();

    for r in 0..nr {
        for c in 0..nc {
            assert_eq!(biased[r * nc + c], plain[r * nc + c] + bias[c]);
        }
    }
}

#[test]
fn from_bytes_reuses_quantized_data() {
    let (nc, n) = (4, 64);
    let mut rng = StdRng::seed_from_u64(11);
    let w = random_matrix(&mut rng, nc, n);
    let act = random_matrix(&mut rng, 1, n);

    let quantized = QuantWeight::quantize(DataType::Q4K, &vec![0.5; nc * 256], nc, 256).unwrap();
    assert_eq!(quantized.as_bytes().len(), nc * 144);

    let original = QuantWeight::quantize(DataType::Q4_0_4_4, &w, nc, n).unwrap();
    let reloaded = QuantWeight::from_bytes(DataType::Q4_0_4_4, original.as_bytes(), nc, n).unwrap();
    assert_eq!(reloaded.dtype(), DataType::Q4_0_4_4);
    assert_eq!((reloaded.rows(), reloaded.cols()), (nc, n));

    let driver = QuantMatmul::default();
    let mut a = vec![0f32; nc];
    let mut b = vec![0f32; nc];
    driver.forward(&original, &act, 1, &mut a, None).unwrap();
    driver.forward(&reloaded, &act, 1, &mut b, None).unwrap();
    assert_eq!(a, b);
}

#[test]
fn shape_errors_are_reported() {
    let w = vec![0f32; 8 * 48];

    let err = QuantWeight::quantize(DataType::Q4_0, &w, 8, 48).unwrap_err();
    assert!(matches!(err, QuantError::Misaligned { n: 48, block: 32, .. }), "{err}");

    let err = QuantWeight::quantize(DataType::Q4_0_8_8, &w, 4, 32).unwrap_err();
    assert!(matches!(err, QuantError::Misaligned { n: 4, block: 8, .. }), "{err}");

    let err = QuantWeight::quantize(DataType::Q8_0, &w[..16], 1, 32).unwrap_err();
    assert!(matches!(err, QuantError::BufferTooSmall { .. }), "{err}");

    let err = QuantWeight::from_bytes(DataType::Q8_0, &[0u8; 33], 1, 32).unwrap_err();
    assert!(matches!(err, QuantError::BufferTooSmall { needed: 34, actual: 33 }), "{err}");

    let weight = QuantWeight::quantize(DataType::Q8_0, &w[..64], 2, 32).unwrap();
    let mut out = vec![0f32; 2];
    let err = QuantMatmul::default()
        .forward(&weight, &[0.0; 16], 1, &mut out, None)
        .unwrap_err();
    assert!(err.is_shape_error());
}

#[test]
fn zero_column_weights_are_rejected() {
    for dtype in [DataType::Q4_0, DataType::Q8_0, DataType::Q4K, DataType::F32, DataType::Q4_0_4_4] {
        let err = QuantWeight::quantize(dtype, &[], 4, 0).unwrap_err();
        assert!(matches!(err, QuantError::EmptyRow { .. }), "{dtype}: {err}");
        assert!(err.is_shape_error());

        let err = QuantWeight::from_bytes(dtype, &[], 4, 0).unwrap_err();
        assert!(matches!(err, QuantError::EmptyRow { .. }), "{dtype}: {err}");
    }
}

#[test]
fn types_without_a_multiply_are_rejected() {
    for dtype in [
        DataType::Q8K,
        DataType::Q4_1,
        DataType::IQ2XXS,
        DataType::IQ2XS,
        DataType::Q2_0,
        DataType::Q8_0_4_4,
    ] {
        let err = QuantWeight::quantize(dtype, &[0.0; 256], 1, 256).unwrap_err();
        assert!(err.is_unsupported(), "{dtype}: {err}");
    }
}
