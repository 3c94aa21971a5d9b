//! Scaled row accumulation: `ys[i] += alpha * dequant(xs)[i]`.
//!
//! Used for sparse and attention-style updates where a weight row is folded
//! into an f32 accumulator without a temporary. The k-quant impls live next
//! to their codecs in `k_quants`.

use half::f16;

use super::blocks::{BlockQ4_0, BlockQ8K, BlockQ8_0, QK4_0, QK8_0, QK_K};
use super::quantize::{check_add_row, check_row, AddRow};
use super::simd_matmul::{kernel_variant, KernelVariant};

pub fn add_row_f32_with(variant: KernelVariant, xs: &[f32], ys: &mut [f32], alpha: f32) {
    match variant {
        #[cfg(target_arch = "x86_64")]
        KernelVariant::Avx2 if variant.is_available() => unsafe {
            super::simd_matmul::add_row_f32_avx2(xs, ys, alpha)
        },
        #[cfg(target_arch = "aarch64")]
        KernelVariant::Neon => unsafe { super::simd_neon::add_row_f32_neon(xs, ys, alpha) },
        _ => {
            for (y, &x) in ys.iter_mut().zip(xs.iter()) {
                *y += alpha * x;
            }
        }
    }
}

impl AddRow for f32 {
    fn add_row_to(n: usize, xs: &[f32], ys: &mut [f32], alpha: f32) {
        check_row::<f32>("add_row", n, xs.len().min(ys.len()));
        add_row_f32_with(kernel_variant(), &xs[..n], &mut ys[..n], alpha);
    }
}

impl AddRow for f16 {
    fn add_row_to(n: usize, xs: &[f16], ys: &mut [f32], alpha: f32) {
        check_row::<f16>("add_row", n, xs.len().min(ys.len()));
        for (y, x) in ys[..n].iter_mut().zip(xs.iter()) {
            *y += alpha * x.to_f32();
        }
    }
}

impl AddRow for BlockQ4_0 {
    fn add_row_to(n: usize, xs: &[BlockQ4_0], ys: &mut [f32], alpha: f32) {
        let nb = check_add_row::<Self>(n, xs.len(), ys.len());
        for (x, out) in xs[..nb].iter().zip(ys.chunks_exact_mut(QK4_0)) {
            let scale = x.d.to_f32() * alpha;
            let (lo, hi) = out.split_at_mut(QK4_0 / 2);
            for (j, &byte) in x.qs.iter().enumerate() {
                lo[j] += scale * ((byte & 0x0F) as i32 - 8) as f32;
                hi[j] += scale * ((byte >> 4) as i32 - 8) as f32;
            }
        }
    }
}

impl AddRow for BlockQ8_0 {
    fn add_row_to(n: usize, xs: &[BlockQ8_0], ys: &mut [f32], alpha: f32) {
        let nb = check_add_row::<Self>(n, xs.len(), ys.len());
        for (x, out) in xs[..nb].iter().zip(ys.chunks_exact_mut(QK8_0)) {
            let scale = x.d.to_f32() * alpha;
            for (y, &q) in out.iter_mut().zip(x.qs.iter()) {
                *y += q as f32 * scale;
            }
        }
    }
}

impl AddRow for BlockQ8K {
    fn add_row_to(n: usize, xs: &[BlockQ8K], ys: &mut [f32], alpha: f32) {
        let nb = check_add_row::<Self>(n, xs.len(), ys.len());
        for (x, out) in xs[..nb].iter().zip(ys.chunks_exact_mut(QK_K)) {
            let scale = x.d * alpha;
            for (y, &q) in out.iter_mut().zip(x.qs.iter()) {
                *y += scale * q as f32;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::quantize::{dequantize_row, quantize_row};

    #[test]
    fn q4_0_add_row_matches_dequant() {
        let xs: Vec<f32> = (0..64).map(|i| (i as f32 - 32.0) / 8.0).collect();
        let blocks = quantize_row::<BlockQ4_0>(&xs);
        let deq = dequantize_row(&blocks);

        let mut acc = vec![1.0f32; 64];
        BlockQ4_0::add_row_to(64, &blocks, &mut acc, 0.5);
        for (a, d) in acc.iter().zip(deq.iter()) {
            let expected = 1.0 + 0.5 * d;
            assert!((a - expected).abs() < 1e-5, "expected {expected}, got {a}");
        }
    }

    #[test]
    fn f32_add_row_with_tail() {
        let xs: Vec<f32> = (0..13).map(|i| i as f32).collect();
        let mut ys = vec![2.0f32; 13];
        f32::add_row_to(13, &xs, &mut ys, -1.0);
        for (i, y) in ys.iter().enumerate() {
            assert_eq!(*y, 2.0 - i as f32);
        }
    }

    #[test]
    #[should_panic(expected = "destination holds 32 floats, need 64")]
    fn short_destination_is_rejected() {
        let blocks = quantize_row::<BlockQ4_0>(&[1.0f32; 64]);
        BlockQ4_0::add_row_to(64, &blocks, &mut [0f32; 32], 1.0);
    }

    #[test]
    #[should_panic(expected = "need 2 blocks, got 1")]
    fn short_source_is_rejected() {
        let blocks = quantize_row::<BlockQ8_0>(&[1.0f32; 32]);
        BlockQ8_0::add_row_to(64, &blocks, &mut [0f32; 64], 1.0);
    }

    #[test]
    fn zero_alpha_leaves_destination() {
        let blocks = quantize_row::<BlockQ8_0>(&[3.0f32; 32]);
        let mut ys = vec![0.25f32; 32];
        BlockQ8_0::add_row_to(32, &blocks, &mut ys, 0.0);
        assert!(ys.iter().all(|&y| y == 0.25));
    }
}
