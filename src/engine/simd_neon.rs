//! NEON SIMD kernels for aarch64.
//!
//! Mirrors the AVX2 kernels in `simd_matmul`: integer sums are exact and
//! the float epilogue matches the scalar reference operation for operation.

#[cfg(target_arch = "aarch64")]
use std::arch::aarch64::*;

#[cfg(target_arch = "aarch64")]
use super::blocks::{BlockQ4_0, BlockQ8_0, BlockQ8_0x4, InterleavedQ4, QK8_0};

// ============================================================================
// NEON Helpers (aarch64)
// ============================================================================

/// Pairwise-accumulating 8-bit product: `acc_lo` collects bytes 0..8,
/// `acc_hi` bytes 8..16, two bytes per i32 lane.
#[cfg(target_arch = "aarch64")]
#[derive(Clone, Copy)]
struct PairAcc {
    lo: int32x4_t,
    hi: int32x4_t,
}

#[cfg(target_arch = "aarch64")]
impl PairAcc {
    #[target_feature(enable = "neon")]
    #[inline]
    unsafe fn zero() -> Self {
        Self {
            lo: vdupq_n_s32(0),
            hi: vdupq_n_s32(0),
        }
    }

    #[target_feature(enable = "neon")]
    #[inline]
    unsafe fn mul_add(&mut self, w: int8x16_t, a: int8x16_t) {
        self.lo = vpadalq_s16(self.lo, vmull_s8(vget_low_s8(w), vget_low_s8(a)));
        self.hi = vpadalq_s16(self.hi, vmull_high_s8(w, a));
    }

    #[target_feature(enable = "neon")]
    #[inline]
    unsafe fn sum(self) -> i32 {
        vaddvq_s32(vaddq_s32(self.lo, self.hi))
    }

    #[target_feature(enable = "neon")]
    #[inline]
    unsafe fn lanes(self) -> [i32; 8] {
        let mut out = [0i32; 8];
        vst1q_s32(out.as_mut_ptr(), self.lo);
        vst1q_s32(out[4..].as_mut_ptr(), self.hi);
        out
    }
}

/// Sign-extend both nibbles of 16 two's-complement nibble pairs.
#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
#[inline]
unsafe fn decode_signed_nibbles(b: uint8x16_t) -> (int8x16_t, int8x16_t) {
    let s = vreinterpretq_s8_u8(b);
    (vshrq_n_s8::<4>(vshlq_n_s8::<4>(s)), vshrq_n_s8::<4>(s))
}

/// Unbias both nibbles of 16 Q4_0 bytes.
#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
#[inline]
unsafe fn decode_biased_nibbles(b: uint8x16_t) -> (int8x16_t, int8x16_t) {
    let m08 = vdupq_n_s8(8);
    let lo = vsubq_s8(vreinterpretq_s8_u8(vandq_u8(b, vdupq_n_u8(0x0F))), m08);
    let hi = vsubq_s8(vreinterpretq_s8_u8(vshrq_n_u8::<4>(b)), m08);
    (lo, hi)
}

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
#[inline]
unsafe fn broadcast_group<const BL: usize>(a: &[i8]) -> int8x16_t {
    if BL == 4 {
        let word = i32::from_le_bytes([a[0] as u8, a[1] as u8, a[2] as u8, a[3] as u8]);
        vreinterpretq_s8_s32(vdupq_n_s32(word))
    } else {
        let mut bytes = [0u8; 8];
        for (b, &v) in bytes.iter_mut().zip(a.iter()) {
            *b = v as u8;
        }
        vreinterpretq_s8_s64(vdupq_n_s64(i64::from_le_bytes(bytes)))
    }
}

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
unsafe fn horizontal_sum_neon(v: float32x4_t) -> f32 {
    let sum2 = vpadd_f32(vget_low_f32(v), vget_high_f32(v));
    let sum1 = vpadd_f32(sum2, sum2);
    vget_lane_f32(sum1, 0)
}

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
#[inline]
unsafe fn fold_rows<const BL: usize>(acc: &[PairAcc], rows: &mut [i32]) {
    for (c, a) in acc.iter().enumerate() {
        for (l, &x) in a.lanes().iter().enumerate() {
            rows[(16 * c + 2 * l) / BL] += x;
        }
    }
}

// ============================================================================
// NEON Dot Products
// ============================================================================

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
pub(crate) unsafe fn vec_dot_q4_0_q8_0_neon(xs: &[BlockQ4_0], ys: &[BlockQ8_0]) -> f32 {
    let mut sumf = 0f32;
    for (x, y) in xs.iter().zip(ys.iter()) {
        let (lo, hi) = decode_biased_nibbles(vld1q_u8(x.qs.as_ptr()));
        let mut acc = PairAcc::zero();
        acc.mul_add(lo, vld1q_s8(y.qs.as_ptr()));
        acc.mul_add(hi, vld1q_s8(y.qs[16..].as_ptr()));
        sumf += acc.sum() as f32 * (x.d.to_f32() * y.d.to_f32());
    }
    sumf
}

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
pub(crate) unsafe fn vec_dot_q8_0_q8_0_neon(xs: &[BlockQ8_0], ys: &[BlockQ8_0]) -> f32 {
    let mut sumf = 0f32;
    for (x, y) in xs.iter().zip(ys.iter()) {
        let mut acc = PairAcc::zero();
        acc.mul_add(vld1q_s8(x.qs.as_ptr()), vld1q_s8(y.qs.as_ptr()));
        acc.mul_add(vld1q_s8(x.qs[16..].as_ptr()), vld1q_s8(y.qs[16..].as_ptr()));
        sumf += acc.sum() as f32 * (x.d.to_f32() * y.d.to_f32());
    }
    sumf
}

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
pub(crate) unsafe fn vec_dot_f32_neon(xs: &[f32], ys: &[f32]) -> f32 {
    let len = xs.len().min(ys.len());
    let chunks = len / 4;
    let mut acc = vdupq_n_f32(0.0);

    for i in 0..chunks {
        let offset = i * 4;
        let x = vld1q_f32(xs[offset..].as_ptr());
        let y = vld1q_f32(ys[offset..].as_ptr());
        acc = vfmaq_f32(acc, x, y);
    }

    let sum = horizontal_sum_neon(acc);
    let remainder: f32 = (chunks * 4..len).map(|i| xs[i] * ys[i]).sum();
    sum + remainder
}

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
pub(crate) unsafe fn add_row_f32_neon(xs: &[f32], ys: &mut [f32], alpha: f32) {
    let len = xs.len().min(ys.len());
    let chunks = len / 4;
    let alpha_vec = vdupq_n_f32(alpha);

    for i in 0..chunks {
        let offset = i * 4;
        let src = vld1q_f32(xs[offset..].as_ptr());
        let dst = vld1q_f32(ys[offset..].as_ptr());
        vst1q_f32(ys[offset..].as_mut_ptr(), vfmaq_f32(dst, src, alpha_vec));
    }

    for i in chunks * 4..len {
        ys[i] += xs[i] * alpha;
    }
}

// ============================================================================
// NEON Blocked GEMV/GEMM
// ============================================================================

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
#[inline]
unsafe fn group_dot_neon<G: InterleavedQ4, const BL: usize>(
    w: &G,
    a: &BlockQ8_0,
    rows: &mut [i32],
) {
    let classes = G::NROWS * BL / 16;
    let qs = w.quants();
    let mut acc = [PairAcc::zero(); 4];

    for c in 0..G::NROWS {
        let (w_lo, w_hi) = decode_signed_nibbles(vld1q_u8(qs[16 * c..].as_ptr()));
        let k = c / classes;
        acc[c % classes].mul_add(w_lo, broadcast_group::<BL>(&a.qs[k * BL..]));
        acc[c % classes].mul_add(w_hi, broadcast_group::<BL>(&a.qs[k * BL + QK8_0 / 2..]));
    }

    fold_rows::<BL>(&acc[..classes], rows);
}

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
pub(crate) unsafe fn gemv_q4_0_neon<G: InterleavedQ4, const BL: usize>(
    nb: usize,
    s: &mut [f32],
    vx: &[G],
    vy: &[BlockQ8_0],
    nc: usize,
    bias: Option<&[f32]>,
) {
    let ncols = G::NROWS;
    for x in 0..nc / ncols {
        let b_ptr = &vx[x * nb..(x + 1) * nb];
        let mut sumf = [0f32; 8];
        for (w, a) in b_ptr.iter().zip(vy.iter()) {
            let mut sumi = [0i32; 8];
            group_dot_neon::<G, BL>(w, a, &mut sumi);
            let da = a.d.to_f32();
            for (j, d) in w.scales().iter().enumerate() {
                sumf[j] += sumi[j] as f32 * (d.to_f32() * da);
            }
        }
        for j in 0..ncols {
            let col = x * ncols + j;
            s[col] = match bias {
                Some(b) => sumf[j] + b[col],
                None => sumf[j],
            };
        }
    }
}

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
pub(crate) unsafe fn gemm_q4_0_neon<G: InterleavedQ4, const BL: usize>(
    nb: usize,
    s: &mut [f32],
    bs: usize,
    vx: &[G],
    vy: &[BlockQ8_0x4],
    nr: usize,
    nc: usize,
    bias: Option<&[f32]>,
) {
    let ncols = G::NROWS;
    let classes = ncols * BL / 16;
    let mut w_lo = [vdupq_n_s8(0); 8];
    let mut w_hi = [vdupq_n_s8(0); 8];

    for y in 0..nr / 4 {
        let a_ptr = &vy[y * nb..(y + 1) * nb];
        for x in 0..nc / ncols {
            let b_ptr = &vx[x * nb..(x + 1) * nb];
            let mut sumf = [[0f32; 8]; 4];
            for (w, a) in b_ptr.iter().zip(a_ptr.iter()) {
                let qs = w.quants();
                for c in 0..ncols {
                    let (lo, hi) = decode_signed_nibbles(vld1q_u8(qs[16 * c..].as_ptr()));
                    w_lo[c] = lo;
                    w_hi[c] = hi;
                }
                for (m, row_sum) in sumf.iter_mut().enumerate() {
                    let mut acc = [PairAcc::zero(); 4];
                    for c in 0..ncols {
                        let base = (c / classes) * 4 * BL + m * BL;
                        acc[c % classes].mul_add(w_lo[c], broadcast_group::<BL>(&a.qs[base..]));
                        acc[c % classes]
                            .mul_add(w_hi[c], broadcast_group::<BL>(&a.qs[base + QK8_0 * 2..]));
                    }
                    let mut sumi = [0i32; 8];
                    fold_rows::<BL>(&acc[..classes], &mut sumi);
                    let da = a.d[m].to_f32();
                    for (j, d) in w.scales().iter().enumerate() {
                        row_sum[j] += sumi[j] as f32 * (d.to_f32() * da);
                    }
                }
            }
            for (m, row_sum) in sumf.iter().enumerate() {
                let out = &mut s[(y * 4 + m) * bs..];
                for j in 0..ncols {
                    let col = x * ncols + j;
                    out[col] = match bias {
                        Some(b) => row_sum[j] + b[col],
                        None => row_sum[j],
                    };
                }
            }
        }
    }
}
