//! SIMD capability detection and AVX2 kernels.
//!
//! x86_64 probes AVX2+FMA once and caches the answer; aarch64 always has
//! NEON. Everything else runs the scalar reference. The integer kernels here
//! produce exactly the scalar reference's integer sums and apply the same
//! float operations in the same order, so their outputs are bit-identical to
//! the scalar path. Only the f32 dot product and f32 row accumulation use FMA.

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(target_arch = "x86_64")]
use super::blocks::{BlockQ4_0, BlockQ8_0, BlockQ8_0x4, InterleavedQ4, QK8_0};

static AVX2_AVAILABLE: AtomicBool = AtomicBool::new(false);
static SIMD_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Kernel family used for the vectorized paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelVariant {
    /// Portable nested loops; the numeric reference.
    Scalar,
    /// x86_64 AVX2 + FMA.
    Avx2,
    /// aarch64 NEON.
    Neon,
}

impl KernelVariant {
    pub fn name(self) -> &'static str {
        match self {
            Self::Scalar => "scalar",
            Self::Avx2 => "avx2",
            Self::Neon => "neon",
        }
    }

    /// Whether this variant can run on the current CPU.
    pub fn is_available(self) -> bool {
        ensure_initialized();
        match self {
            Self::Scalar => true,
            Self::Avx2 => AVX2_AVAILABLE.load(Ordering::Relaxed),
            Self::Neon => cfg!(target_arch = "aarch64"),
        }
    }
}

/// Initialize SIMD detection (call once at startup).
#[cfg(target_arch = "x86_64")]
pub fn init_simd() {
    let has_avx2 = is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma");
    AVX2_AVAILABLE.store(has_avx2, Ordering::Relaxed);
    SIMD_INITIALIZED.store(true, Ordering::Relaxed);
}

#[cfg(target_arch = "aarch64")]
pub fn init_simd() {
    // NEON is baseline on aarch64 - always available
    SIMD_INITIALIZED.store(true, Ordering::Relaxed);
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub fn init_simd() {
    SIMD_INITIALIZED.store(true, Ordering::Relaxed);
}

fn ensure_initialized() {
    if !SIMD_INITIALIZED.load(Ordering::Relaxed) {
        init_simd();
    }
}

/// Best kernel variant for this CPU.
pub fn kernel_variant() -> KernelVariant {
    ensure_initialized();

    #[cfg(target_arch = "x86_64")]
    if AVX2_AVAILABLE.load(Ordering::Relaxed) {
        return KernelVariant::Avx2;
    }

    #[cfg(target_arch = "aarch64")]
    {
        return KernelVariant::Neon;
    }

    #[allow(unreachable_code)]
    KernelVariant::Scalar
}

// ============================================================================
// AVX2 Helpers (x86_64)
// ============================================================================

/// Sign-extend the low and high nibbles of 16 bytes that were stored
/// XOR-ed with 0x88 (two's-complement nibbles).
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
#[inline]
unsafe fn decode_signed_nibbles(b: __m128i) -> (__m128i, __m128i) {
    let m0f = _mm_set1_epi8(0x0F);
    let m08 = _mm_set1_epi8(0x08);
    let lo = _mm_sub_epi8(_mm_xor_si128(_mm_and_si128(b, m0f), m08), m08);
    let hi = _mm_and_si128(_mm_srli_epi16(b, 4), m0f);
    let hi = _mm_sub_epi8(_mm_xor_si128(hi, m08), m08);
    (lo, hi)
}

/// Unbias the low and high nibbles of 16 Q4_0 bytes (stored `q + 8`).
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
#[inline]
unsafe fn decode_biased_nibbles(b: __m128i) -> (__m128i, __m128i) {
    let m0f = _mm_set1_epi8(0x0F);
    let m08 = _mm_set1_epi8(0x08);
    let lo = _mm_sub_epi8(_mm_and_si128(b, m0f), m08);
    let hi = _mm_sub_epi8(_mm_and_si128(_mm_srli_epi16(b, 4), m0f), m08);
    (lo, hi)
}

/// 16 signed bytes times 16 signed bytes, summed in adjacent pairs:
/// lane `L` holds `w[2L]*a[2L] + w[2L+1]*a[2L+1]`.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
#[inline]
unsafe fn mul_sum_pairs(w: __m128i, a: __m128i) -> __m256i {
    _mm256_madd_epi16(_mm256_cvtepi8_epi16(w), _mm256_cvtepi8_epi16(a))
}

/// Repeat `BL` activation bytes across a 16-byte register.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
#[inline]
unsafe fn broadcast_group<const BL: usize>(a: &[i8]) -> __m128i {
    if BL == 4 {
        _mm_set1_epi32(i32::from_le_bytes([a[0] as u8, a[1] as u8, a[2] as u8, a[3] as u8]))
    } else {
        let mut bytes = [0u8; 8];
        for (b, &v) in bytes.iter_mut().zip(a.iter()) {
            *b = v as u8;
        }
        _mm_set1_epi64x(i64::from_le_bytes(bytes))
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
#[inline]
unsafe fn hsum_i32_avx2(v: __m256i) -> i32 {
    let s = _mm_add_epi32(_mm256_castsi256_si128(v), _mm256_extracti128_si256(v, 1));
    let s = _mm_add_epi32(s, _mm_shuffle_epi32(s, 0b01_00_11_10));
    let s = _mm_add_epi32(s, _mm_shuffle_epi32(s, 0b10_11_00_01));
    _mm_cvtsi128_si32(s)
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn horizontal_sum_avx2(v: __m256) -> f32 {
    let hi = _mm256_extractf128_ps(v, 1);
    let lo = _mm256_castps256_ps128(v);
    let sum128 = _mm_add_ps(lo, hi);
    let hi64 = _mm_movehl_ps(sum128, sum128);
    let sum64 = _mm_add_ps(sum128, hi64);
    let hi32 = _mm_shuffle_ps(sum64, sum64, 1);
    _mm_cvtss_f32(_mm_add_ss(sum64, hi32))
}

/// Fold per-chunk-class lane sums into per-row sums.
///
/// Lane `L` of class `c` covers bytes `16c + 2L` and `16c + 2L + 1` of a
/// k-step, which belong to row `(16c + 2L) / BL`.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
#[inline]
unsafe fn fold_rows<const BL: usize>(acc: &[__m256i], rows: &mut [i32]) {
    let mut lanes = [0i32; 8];
    for (c, v) in acc.iter().enumerate() {
        _mm256_storeu_si256(lanes.as_mut_ptr() as *mut __m256i, *v);
        for (l, &x) in lanes.iter().enumerate() {
            rows[(16 * c + 2 * l) / BL] += x;
        }
    }
}

// ============================================================================
// AVX2 Dot Products
// ============================================================================

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
pub(crate) unsafe fn vec_dot_q4_0_q8_0_avx2(xs: &[BlockQ4_0], ys: &[BlockQ8_0]) -> f32 {
    let mut sumf = 0f32;
    for (x, y) in xs.iter().zip(ys.iter()) {
        let (lo, hi) = decode_biased_nibbles(_mm_loadu_si128(x.qs.as_ptr() as *const __m128i));
        let a_lo = _mm_loadu_si128(y.qs.as_ptr() as *const __m128i);
        let a_hi = _mm_loadu_si128(y.qs[16..].as_ptr() as *const __m128i);
        let prod = _mm256_add_epi32(mul_sum_pairs(lo, a_lo), mul_sum_pairs(hi, a_hi));
        let sumi = hsum_i32_avx2(prod);
        sumf += sumi as f32 * (x.d.to_f32() * y.d.to_f32());
    }
    sumf
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
pub(crate) unsafe fn vec_dot_q8_0_q8_0_avx2(xs: &[BlockQ8_0], ys: &[BlockQ8_0]) -> f32 {
    let mut sumf = 0f32;
    for (x, y) in xs.iter().zip(ys.iter()) {
        let w_lo = _mm_loadu_si128(x.qs.as_ptr() as *const __m128i);
        let w_hi = _mm_loadu_si128(x.qs[16..].as_ptr() as *const __m128i);
        let a_lo = _mm_loadu_si128(y.qs.as_ptr() as *const __m128i);
        let a_hi = _mm_loadu_si128(y.qs[16..].as_ptr() as *const __m128i);
        let prod = _mm256_add_epi32(mul_sum_pairs(w_lo, a_lo), mul_sum_pairs(w_hi, a_hi));
        let sumi = hsum_i32_avx2(prod);
        sumf += sumi as f32 * (x.d.to_f32() * y.d.to_f32());
    }
    sumf
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
pub(crate) unsafe fn vec_dot_f32_avx2(xs: &[f32], ys: &[f32]) -> f32 {
    let len = xs.len().min(ys.len());
    let chunks = len / 8;
    let mut acc = _mm256_setzero_ps();

    for i in 0..chunks {
        let offset = i * 8;
        let x = _mm256_loadu_ps(xs[offset..].as_ptr());
        let y = _mm256_loadu_ps(ys[offset..].as_ptr());
        acc = _mm256_fmadd_ps(x, y, acc);
    }

    let sum = horizontal_sum_avx2(acc);
    let remainder: f32 = (chunks * 8..len).map(|i| xs[i] * ys[i]).sum();
    sum + remainder
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
pub(crate) unsafe fn add_row_f32_avx2(xs: &[f32], ys: &mut [f32], alpha: f32) {
    let len = xs.len().min(ys.len());
    let chunks = len / 8;
    let alpha_vec = _mm256_set1_ps(alpha);

    for i in 0..chunks {
        let offset = i * 8;
        let src = _mm256_loadu_ps(xs[offset..].as_ptr());
        let dst = _mm256_loadu_ps(ys[offset..].as_ptr());
        _mm256_storeu_ps(ys[offset..].as_mut_ptr(), _mm256_fmadd_ps(src, alpha_vec, dst));
    }

    for i in chunks * 8..len {
        ys[i] += xs[i] * alpha;
    }
}

// ============================================================================
// AVX2 Blocked GEMV/GEMM
// ============================================================================

/// Integer row sums of one interleaved weight block against one activation
/// block, accumulated into `rows[..G::NROWS]`.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
#[inline]
unsafe fn group_dot_avx2<G: InterleavedQ4, const BL: usize>(
    w: &G,
    a: &BlockQ8_0,
    rows: &mut [i32],
) {
    let classes = G::NROWS * BL / 16;
    let qs = w.quants();
    let mut acc = [_mm256_setzero_si256(); 4];

    for c in 0..G::NROWS {
        let (w_lo, w_hi) =
            decode_signed_nibbles(_mm_loadu_si128(qs[16 * c..].as_ptr() as *const __m128i));
        let k = c / classes;
        let a_lo = broadcast_group::<BL>(&a.qs[k * BL..]);
        let a_hi = broadcast_group::<BL>(&a.qs[k * BL + QK8_0 / 2..]);
        let prod = _mm256_add_epi32(mul_sum_pairs(w_lo, a_lo), mul_sum_pairs(w_hi, a_hi));
        acc[c % classes] = _mm256_add_epi32(acc[c % classes], prod);
    }

    fold_rows::<BL>(&acc[..classes], rows);
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
pub(crate) unsafe fn gemv_q4_0_avx2<G: InterleavedQ4, const BL: usize>(
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
            group_dot_avx2::<G, BL>(w, a, &mut sumi);
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

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
pub(crate) unsafe fn gemm_q4_0_avx2<G: InterleavedQ4, const BL: usize>(
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
    let mut w_lo = [_mm_setzero_si128(); 8];
    let mut w_hi = [_mm_setzero_si128(); 8];

    for y in 0..nr / 4 {
        let a_ptr = &vy[y * nb..(y + 1) * nb];
        for x in 0..nc / ncols {
            let b_ptr = &vx[x * nb..(x + 1) * nb];
            let mut sumf = [[0f32; 8]; 4];
            for (w, a) in b_ptr.iter().zip(a_ptr.iter()) {
                // Decode the weight group once, reuse it for all four rows.
                let qs = w.quants();
                for c in 0..ncols {
                    let (lo, hi) =
                        decode_signed_nibbles(_mm_loadu_si128(qs[16 * c..].as_ptr() as *const __m128i));
                    w_lo[c] = lo;
                    w_hi[c] = hi;
                }
                for (m, row_sum) in sumf.iter_mut().enumerate() {
                    let mut acc = [_mm256_setzero_si256(); 4];
                    for c in 0..ncols {
                        let k = c / classes;
                        let base = k * 4 * BL + m * BL;
                        let a_lo = broadcast_group::<BL>(&a.qs[base..]);
                        let a_hi = broadcast_group::<BL>(&a.qs[base + QK8_0 * 2..]);
                        let prod =
                            _mm256_add_epi32(mul_sum_pairs(w_lo[c], a_lo), mul_sum_pairs(w_hi[c], a_hi));
                        acc[c % classes] = _mm256_add_epi32(acc[c % classes], prod);
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
