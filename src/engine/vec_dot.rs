//! Dot products for the plain and 32-element block formats.
//!
//! Each format has a scalar reference; the Q4_0/Q8_0/F32 paths also have
//! AVX2 and NEON kernels selected through [`KernelVariant`]. The integer
//! kernels agree with the reference exactly.

use half::f16;

use super::blocks::{BlockQ4_0, BlockQ8_0, QK8_0};
use super::quantize::{check_row, VecDot};
use super::simd_matmul::{kernel_variant, KernelVariant};

// ============================================================================
// Scalar references
// ============================================================================

pub fn vec_dot_f32_scalar(xs: &[f32], ys: &[f32]) -> f32 {
    xs.iter().zip(ys.iter()).map(|(x, y)| x * y).sum()
}

/// Half-precision dot product, accumulated in f64.
pub fn vec_dot_f16_scalar(xs: &[f16], ys: &[f16]) -> f32 {
    let sum: f64 = xs
        .iter()
        .zip(ys.iter())
        .map(|(x, y)| x.to_f64() * y.to_f64())
        .sum();
    sum as f32
}

pub fn vec_dot_q4_0_q8_0_scalar(xs: &[BlockQ4_0], ys: &[BlockQ8_0]) -> f32 {
    let mut sumf = 0f32;
    for (x, y) in xs.iter().zip(ys.iter()) {
        let mut sumi = 0i32;
        for j in 0..QK8_0 / 2 {
            let v0 = (x.qs[j] & 0x0F) as i32 - 8;
            let v1 = (x.qs[j] >> 4) as i32 - 8;
            sumi += v0 * y.qs[j] as i32 + v1 * y.qs[j + QK8_0 / 2] as i32;
        }
        sumf += sumi as f32 * (x.d.to_f32() * y.d.to_f32());
    }
    sumf
}

pub fn vec_dot_q8_0_q8_0_scalar(xs: &[BlockQ8_0], ys: &[BlockQ8_0]) -> f32 {
    let mut sumf = 0f32;
    for (x, y) in xs.iter().zip(ys.iter()) {
        let sumi: i32 = x
            .qs
            .iter()
            .zip(y.qs.iter())
            .map(|(&a, &b)| a as i32 * b as i32)
            .sum();
        sumf += sumi as f32 * (x.d.to_f32() * y.d.to_f32());
    }
    sumf
}

// ============================================================================
// Variant dispatch
// ============================================================================

/// Q4_0 x Q8_0 with an explicit kernel. Unavailable variants fall back to
/// the scalar reference.
pub fn vec_dot_q4_0_q8_0_with(variant: KernelVariant, xs: &[BlockQ4_0], ys: &[BlockQ8_0]) -> f32 {
    match variant {
        #[cfg(target_arch = "x86_64")]
        KernelVariant::Avx2 if variant.is_available() => unsafe {
            super::simd_matmul::vec_dot_q4_0_q8_0_avx2(xs, ys)
        },
        #[cfg(target_arch = "aarch64")]
        KernelVariant::Neon => unsafe { super::simd_neon::vec_dot_q4_0_q8_0_neon(xs, ys) },
        _ => vec_dot_q4_0_q8_0_scalar(xs, ys),
    }
}

pub fn vec_dot_q8_0_q8_0_with(variant: KernelVariant, xs: &[BlockQ8_0], ys: &[BlockQ8_0]) -> f32 {
    match variant {
        #[cfg(target_arch = "x86_64")]
        KernelVariant::Avx2 if variant.is_available() => unsafe {
            super::simd_matmul::vec_dot_q8_0_q8_0_avx2(xs, ys)
        },
        #[cfg(target_arch = "aarch64")]
        KernelVariant::Neon => unsafe { super::simd_neon::vec_dot_q8_0_q8_0_neon(xs, ys) },
        _ => vec_dot_q8_0_q8_0_scalar(xs, ys),
    }
}

pub fn vec_dot_f32_with(variant: KernelVariant, xs: &[f32], ys: &[f32]) -> f32 {
    match variant {
        #[cfg(target_arch = "x86_64")]
        KernelVariant::Avx2 if variant.is_available() => unsafe {
            super::simd_matmul::vec_dot_f32_avx2(xs, ys)
        },
        #[cfg(target_arch = "aarch64")]
        KernelVariant::Neon => unsafe { super::simd_neon::vec_dot_f32_neon(xs, ys) },
        _ => vec_dot_f32_scalar(xs, ys),
    }
}

// ============================================================================
// Trait impls
// ============================================================================

impl VecDot for f32 {
    type Rhs = f32;

    fn vec_dot(n: usize, xs: &[f32], ys: &[f32]) -> f32 {
        check_row::<f32>("vec_dot", n, xs.len().min(ys.len()));
        vec_dot_f32_with(kernel_variant(), &xs[..n], &ys[..n])
    }
}

impl VecDot for f16 {
    type Rhs = f16;

    fn vec_dot(n: usize, xs: &[f16], ys: &[f16]) -> f32 {
        check_row::<f16>("vec_dot", n, xs.len().min(ys.len()));
        vec_dot_f16_scalar(&xs[..n], &ys[..n])
    }
}

impl VecDot for BlockQ4_0 {
    type Rhs = BlockQ8_0;

    fn vec_dot(n: usize, xs: &[BlockQ4_0], ys: &[BlockQ8_0]) -> f32 {
        let nb = check_row::<Self>("vec_dot", n, xs.len().min(ys.len()));
        vec_dot_q4_0_q8_0_with(kernel_variant(), &xs[..nb], &ys[..nb])
    }
}

impl VecDot for BlockQ8_0 {
    type Rhs = BlockQ8_0;

    fn vec_dot(n: usize, xs: &[BlockQ8_0], ys: &[BlockQ8_0]) -> f32 {
        let nb = check_row::<Self>("vec_dot", n, xs.len().min(ys.len()));
        vec_dot_q8_0_q8_0_with(kernel_variant(), &xs[..nb], &ys[..nb])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::quantize::quantize_row;

    fn ramp(n: usize, scale: f32) -> Vec<f32> {
        (0..n).map(|i| ((i * 37 % 61) as f32 - 30.0) * scale).collect()
    }

    #[test]
    fn q4_0_simd_matches_scalar() {
        let w = quantize_row::<BlockQ4_0>(&ramp(256, 0.05));
        let a = quantize_row::<BlockQ8_0>(&ramp(256, 0.03));
        let reference = vec_dot_q4_0_q8_0_scalar(&w, &a);
        assert_eq!(BlockQ4_0::vec_dot(256, &w, &a), reference);
    }

    #[test]
    fn q8_0_handles_extreme_codes() {
        let mut w = BlockQ8_0 { d: f16::ONE, qs: [-128; QK8_0] };
        w.qs[1] = 127;
        let a = BlockQ8_0 { d: f16::ONE, qs: [-128; QK8_0] };
        let expected = (31 * 128 * 128 - 127 * 128) as f32;
        assert_eq!(BlockQ8_0::vec_dot(32, &[w], &[a]), expected);
    }

    #[test]
    fn f32_dot_handles_tail() {
        let xs = ramp(19, 1.0);
        let ys = ramp(19, 0.5);
        let expected = vec_dot_f32_scalar(&xs, &ys);
        let actual = f32::vec_dot(19, &xs, &ys);
        assert!((expected - actual).abs() < 1e-3, "expected {expected}, got {actual}");
    }

    #[test]
    fn f16_dot() {
        let xs: Vec<f16> = [1.0f32, 2.0, 3.0].iter().map(|&x| f16::from_f32(x)).collect();
        let ys: Vec<f16> = [4.0f32, 5.0, 6.0].iter().map(|&x| f16::from_f32(x)).collect();
        assert_eq!(f16::vec_dot(3, &xs, &ys), 32.0);
    }
}
