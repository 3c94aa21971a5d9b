//! Blocked GEMV/GEMM over interleaved Q4_0 weights and Q8_0 activations.
//!
//! `gemv` computes `s[c] = dot(W[c], a) + bias[c]` for one activation row;
//! `gemm` does the same for `nr` rows (a multiple of 4) taken from
//! interleaved activation tiles, writing row `r` at `s[r * bs..]`.
//!
//! Per weight block and output column the integer products are summed
//! exactly, then folded into the float accumulator as
//! `sumi * (d_w * d_a)`. Bias is added once, after the last block. Every
//! backend follows this order, so the SIMD kernels reproduce the scalar
//! reference bit for bit, `gemm` row `r` equals `gemv` on row `r`, and
//! `gemv` column `c` equals the plain Q4_0 x Q8_0 dot product of row `c`.

use super::blocks::{
    as_blocks, BlockQ4_0x4, BlockQ4_0x8, BlockQ8_0, BlockQ8_0x4, InterleavedQ4, QK8_0,
};
use super::error::QuantError;
use super::repack::groups_from_bytes;
use super::simd_matmul::{kernel_variant, KernelVariant};
use super::types::DataType;

/// A backend for the blocked kernels.
///
/// `G` is the interleaved weight layout (4 or 8 rows) and `BL` the
/// interleave width in bytes (4 or 8).
pub trait BlockedGemm {
    fn name(&self) -> &'static str;

    fn gemv<G: InterleavedQ4, const BL: usize>(
        &self,
        n: usize,
        s: &mut [f32],
        vx: &[G],
        vy: &[BlockQ8_0],
        nc: usize,
        bias: Option<&[f32]>,
    );

    #[allow(clippy::too_many_arguments)]
    fn gemm<G: InterleavedQ4, const BL: usize>(
        &self,
        n: usize,
        s: &mut [f32],
        bs: usize,
        vx: &[G],
        vy: &[BlockQ8_0x4],
        nr: usize,
        nc: usize,
        bias: Option<&[f32]>,
    );
}

// ============================================================================
// Shape checks
// ============================================================================

/// Panic on any shape the kernels cannot handle. Returns blocks per row.
fn check_common<G: InterleavedQ4, const BL: usize>(
    op: &str,
    n: usize,
    nc: usize,
    vx_len: usize,
    bias: Option<&[f32]>,
) -> usize {
    assert!(BL == 4 || BL == 8, "{op}: interleave width must be 4 or 8, got {BL}");
    assert!(n % QK8_0 == 0, "{op}: n = {n} is not divisible by {QK8_0}");
    assert!(
        nc % G::NROWS == 0,
        "{op}: nc = {nc} is not a multiple of {}",
        G::NROWS
    );
    let nb = n / QK8_0;
    let groups = nc / G::NROWS * nb;
    assert!(vx_len >= groups, "{op}: need {groups} weight groups, got {vx_len}");
    if let Some(b) = bias {
        assert!(b.len() >= nc, "{op}: bias holds {} values, need {nc}", b.len());
    }
    nb
}

fn check_gemv<G: InterleavedQ4, const BL: usize>(
    n: usize,
    s: &[f32],
    vx: &[G],
    vy: &[BlockQ8_0],
    nc: usize,
    bias: Option<&[f32]>,
) -> usize {
    let nb = check_common::<G, BL>("gemv", n, nc, vx.len(), bias);
    assert!(vy.len() >= nb, "gemv: need {nb} activation blocks, got {}", vy.len());
    assert!(s.len() >= nc, "gemv: output holds {} values, need {nc}", s.len());
    nb
}

#[allow(clippy::too_many_arguments)]
fn check_gemm<G: InterleavedQ4, const BL: usize>(
    n: usize,
    s: &[f32],
    bs: usize,
    vx: &[G],
    vy: &[BlockQ8_0x4],
    nr: usize,
    nc: usize,
    bias: Option<&[f32]>,
) -> usize {
    let nb = check_common::<G, BL>("gemm", n, nc, vx.len(), bias);
    assert!(nr % 4 == 0, "gemm: nr = {nr} is not a multiple of 4");
    assert!(bs >= nc, "gemm: row stride {bs} is smaller than nc = {nc}");
    let tiles = nr / 4 * nb;
    assert!(vy.len() >= tiles, "gemm: need {tiles} activation tiles, got {}", vy.len());
    let needed = if nr == 0 { 0 } else { (nr - 1) * bs + nc };
    assert!(s.len() >= needed, "gemm: output holds {} values, need {needed}", s.len());
    nb
}

#[inline]
fn store_row(out: &mut [f32], base: usize, sums: &[f32], bias: Option<&[f32]>) {
    for (j, &sum) in sums.iter().enumerate() {
        let col = base + j;
        out[col] = match bias {
            Some(b) => sum + b[col],
            None => sum,
        };
    }
}

// ============================================================================
// Scalar reference
// ============================================================================

/// Portable nested-loop kernels; the numeric reference for the others.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scalar;

impl Scalar {
    /// Integer sums of one weight group against one activation run.
    ///
    /// `a_lo(k, i)` / `a_hi(k, i)` give the activation paired with the low
    /// and high nibble of byte `i` in k-step `k`.
    #[inline]
    fn group_sums<G: InterleavedQ4, const BL: usize>(
        w: &G,
        a_lo: impl Fn(usize, usize) -> i32,
        a_hi: impl Fn(usize, usize) -> i32,
    ) -> [i32; 8] {
        let ncols = G::NROWS;
        let qs = w.quants();
        let mut sumi = [0i32; 8];
        for k in 0..QK8_0 / (2 * BL) {
            for (j, acc) in sumi[..ncols].iter_mut().enumerate() {
                for i in 0..BL {
                    let byte = qs[k * ncols * BL + j * BL + i];
                    let v0 = ((byte << 4) as i8 >> 4) as i32;
                    let v1 = (byte as i8 >> 4) as i32;
                    *acc += v0 * a_lo(k, i) + v1 * a_hi(k, i);
                }
            }
        }
        sumi
    }
}

impl BlockedGemm for Scalar {
    fn name(&self) -> &'static str {
        "scalar"
    }

    fn gemv<G: InterleavedQ4, const BL: usize>(
        &self,
        n: usize,
        s: &mut [f32],
        vx: &[G],
        vy: &[BlockQ8_0],
        nc: usize,
        bias: Option<&[f32]>,
    ) {
        let nb = check_gemv::<G, BL>(n, s, vx, vy, nc, bias);
        let ncols = G::NROWS;

        for x in 0..nc / ncols {
            let b_ptr = &vx[x * nb..(x + 1) * nb];
            let mut sumf = [0f32; 8];
            for (w, a) in b_ptr.iter().zip(vy[..nb].iter()) {
                let sumi = Self::group_sums::<G, BL>(
                    w,
                    |k, i| a.qs[k * BL + i] as i32,
                    |k, i| a.qs[k * BL + i + QK8_0 / 2] as i32,
                );
                let da = a.d.to_f32();
                for (j, d) in w.scales().iter().enumerate() {
                    sumf[j] += sumi[j] as f32 * (d.to_f32() * da);
                }
            }
            store_row(s, x * ncols, &sumf[..ncols], bias);
        }
    }

    fn gemm<G: InterleavedQ4, const BL: usize>(
        &self,
        n: usize,
        s: &mut [f32],
        bs: usize,
        vx: &[G],
        vy: &[BlockQ8_0x4],
        nr: usize,
        nc: usize,
        bias: Option<&[f32]>,
    ) {
        let nb = check_gemm::<G, BL>(n, s, bs, vx, vy, nr, nc, bias);
        let ncols = G::NROWS;

        for y in 0..nr / 4 {
            let a_ptr = &vy[y * nb..(y + 1) * nb];
            for x in 0..nc / ncols {
                let b_ptr = &vx[x * nb..(x + 1) * nb];
                let mut sumf = [[0f32; 8]; 4];
                for (w, a) in b_ptr.iter().zip(a_ptr.iter()) {
                    for (m, row_sum) in sumf.iter_mut().enumerate() {
                        let sumi = Self::group_sums::<G, BL>(
                            w,
                            |k, i| a.qs[k * 4 * BL + m * BL + i] as i32,
                            |k, i| a.qs[k * 4 * BL + m * BL + i + QK8_0 * 2] as i32,
                        );
                        let da = a.d[m].to_f32();
                        for (j, d) in w.scales().iter().enumerate() {
                            row_sum[j] += sumi[j] as f32 * (d.to_f32() * da);
                        }
                    }
                }
                for (m, row_sum) in sumf.iter().enumerate() {
                    store_row(&mut s[(y * 4 + m) * bs..], x * ncols, &row_sum[..ncols], bias);
                }
            }
        }
    }
}

// ============================================================================
// SIMD backends
// ============================================================================

/// AVX2 kernels. Only constructible on a CPU that has AVX2 and FMA.
#[cfg(target_arch = "x86_64")]
#[derive(Debug, Clone, Copy)]
pub struct Avx2 {
    _detected: (),
}

#[cfg(target_arch = "x86_64")]
impl Avx2 {
    pub fn detect() -> Option<Self> {
        KernelVariant::Avx2
            .is_available()
            .then_some(Self { _detected: () })
    }
}

#[cfg(target_arch = "x86_64")]
impl BlockedGemm for Avx2 {
    fn name(&self) -> &'static str {
        "avx2"
    }

    fn gemv<G: InterleavedQ4, const BL: usize>(
        &self,
        n: usize,
        s: &mut [f32],
        vx: &[G],
        vy: &[BlockQ8_0],
        nc: usize,
        bias: Option<&[f32]>,
    ) {
        let nb = check_gemv::<G, BL>(n, s, vx, vy, nc, bias);
        // SAFETY: `Avx2` only exists once AVX2+FMA were detected; shapes checked above.
        unsafe { super::simd_matmul::gemv_q4_0_avx2::<G, BL>(nb, s, vx, vy, nc, bias) }
    }

    fn gemm<G: InterleavedQ4, const BL: usize>(
        &self,
        n: usize,
        s: &mut [f32],
        bs: usize,
        vx: &[G],
        vy: &[BlockQ8_0x4],
        nr: usize,
        nc: usize,
        bias: Option<&[f32]>,
    ) {
        let nb = check_gemm::<G, BL>(n, s, bs, vx, vy, nr, nc, bias);
        // SAFETY: as above.
        unsafe { super::simd_matmul::gemm_q4_0_avx2::<G, BL>(nb, s, bs, vx, vy, nr, nc, bias) }
    }
}

/// NEON kernels. NEON is baseline on aarch64.
#[cfg(target_arch = "aarch64")]
#[derive(Debug, Clone, Copy, Default)]
pub struct Neon;

#[cfg(target_arch = "aarch64")]
impl BlockedGemm for Neon {
    fn name(&self) -> &'static str {
        "neon"
    }

    fn gemv<G: InterleavedQ4, const BL: usize>(
        &self,
        n: usize,
        s: &mut [f32],
        vx: &[G],
        vy: &[BlockQ8_0],
        nc: usize,
        bias: Option<&[f32]>,
    ) {
        let nb = check_gemv::<G, BL>(n, s, vx, vy, nc, bias);
        unsafe { super::simd_neon::gemv_q4_0_neon::<G, BL>(nb, s, vx, vy, nc, bias) }
    }

    fn gemm<G: InterleavedQ4, const BL: usize>(
        &self,
        n: usize,
        s: &mut [f32],
        bs: usize,
        vx: &[G],
        vy: &[BlockQ8_0x4],
        nr: usize,
        nc: usize,
        bias: Option<&[f32]>,
    ) {
        let nb = check_gemm::<G, BL>(n, s, bs, vx, vy, nr, nc, bias);
        unsafe { super::simd_neon::gemm_q4_0_neon::<G, BL>(nb, s, bs, vx, vy, nr, nc, bias) }
    }
}

// ============================================================================
// Variant dispatch
// ============================================================================

/// Run `gemv` on the requested backend, falling back to [`Scalar`] when it
/// is not available on this CPU.
pub fn gemv_typed<G: InterleavedQ4, const BL: usize>(
    variant: KernelVariant,
    n: usize,
    s: &mut [f32],
    vx: &[G],
    vy: &[BlockQ8_0],
    nc: usize,
    bias: Option<&[f32]>,
) {
    match variant {
        #[cfg(target_arch = "x86_64")]
        KernelVariant::Avx2 => match Avx2::detect() {
            Some(k) => k.gemv::<G, BL>(n, s, vx, vy, nc, bias),
            None => Scalar.gemv::<G, BL>(n, s, vx, vy, nc, bias),
        },
        #[cfg(target_arch = "aarch64")]
        KernelVariant::Neon => Neon.gemv::<G, BL>(n, s, vx, vy, nc, bias),
        _ => Scalar.gemv::<G, BL>(n, s, vx, vy, nc, bias),
    }
}

#[allow(clippy::too_many_arguments)]
pub fn gemm_typed<G: InterleavedQ4, const BL: usize>(
    variant: KernelVariant,
    n: usize,
    s: &mut [f32],
    bs: usize,
    vx: &[G],
    vy: &[BlockQ8_0x4],
    nr: usize,
    nc: usize,
    bias: Option<&[f32]>,
) {
    match variant {
        #[cfg(target_arch = "x86_64")]
        KernelVariant::Avx2 => match Avx2::detect() {
            Some(k) => k.gemm::<G, BL>(n, s, bs, vx, vy, nr, nc, bias),
            None => Scalar.gemm::<G, BL>(n, s, bs, vx, vy, nr, nc, bias),
        },
        #[cfg(target_arch = "aarch64")]
        KernelVariant::Neon => Neon.gemm::<G, BL>(n, s, bs, vx, vy, nr, nc, bias),
        _ => Scalar.gemm::<G, BL>(n, s, bs, vx, vy, nr, nc, bias),
    }
}

fn check_n(op: &str, n: usize) -> usize {
    assert!(n % QK8_0 == 0, "{op}: n = {n} is not divisible by {QK8_0}");
    n / QK8_0
}

#[allow(clippy::too_many_arguments)]
fn gemv_bytes<G: InterleavedQ4, const BL: usize>(
    variant: KernelVariant,
    n: usize,
    s: &mut [f32],
    vx: &[u8],
    vy: &[u8],
    nc: usize,
    bias: Option<&[f32]>,
) {
    let nb = check_n("gemv", n);
    let vx = groups_from_bytes::<G>(vx, nc / G::NROWS * nb);
    let vy = as_blocks::<BlockQ8_0>(vy, nb, "gemv activations");
    gemv_typed::<G, BL>(variant, n, s, vx, vy, nc, bias)
}

#[allow(clippy::too_many_arguments)]
fn gemm_bytes<G: InterleavedQ4, const BL: usize>(
    variant: KernelVariant,
    n: usize,
    s: &mut [f32],
    bs: usize,
    vx: &[u8],
    vy: &[u8],
    nr: usize,
    nc: usize,
    bias: Option<&[f32]>,
) {
    let nb = check_n("gemm", n);
    let vx = groups_from_bytes::<G>(vx, nc / G::NROWS * nb);
    let vy = as_blocks::<BlockQ8_0x4>(vy, nr / 4 * nb, "gemm activations");
    gemm_typed::<G, BL>(variant, n, s, bs, vx, vy, nr, nc, bias)
}

/// GEMV for an interleaved weight type with an explicit backend.
#[allow(clippy::too_many_arguments)]
pub fn gemv_with(
    variant: KernelVariant,
    dtype: DataType,
    n: usize,
    s: &mut [f32],
    vx: &[u8],
    vy: &[u8],
    nc: usize,
    bias: Option<&[f32]>,
) -> Result<(), QuantError> {
    match dtype {
        DataType::Q4_0_4_4 => gemv_bytes::<BlockQ4_0x4, 4>(variant, n, s, vx, vy, nc, bias),
        DataType::Q4_0_4_8 => gemv_bytes::<BlockQ4_0x4, 8>(variant, n, s, vx, vy, nc, bias),
        DataType::Q4_0_8_8 => gemv_bytes::<BlockQ4_0x8, 8>(variant, n, s, vx, vy, nc, bias),
        _ => return Err(QuantError::NotImplemented { op: "gemv", dtype }),
    }
    Ok(())
}

/// GEMM for an interleaved weight type with an explicit backend.
#[allow(clippy::too_many_arguments)]
pub fn gemm_with(
    variant: KernelVariant,
    dtype: DataType,
    n: usize,
    s: &mut [f32],
    bs: usize,
    vx: &[u8],
    vy: &[u8],
    nr: usize,
    nc: usize,
    bias: Option<&[f32]>,
) -> Result<(), QuantError> {
    match dtype {
        DataType::Q4_0_4_4 => gemm_bytes::<BlockQ4_0x4, 4>(variant, n, s, bs, vx, vy, nr, nc, bias),
        DataType::Q4_0_4_8 => gemm_bytes::<BlockQ4_0x4, 8>(variant, n, s, bs, vx, vy, nr, nc, bias),
        DataType::Q4_0_8_8 => gemm_bytes::<BlockQ4_0x8, 8>(variant, n, s, bs, vx, vy, nr, nc, bias),
        _ => return Err(QuantError::NotImplemented { op: "gemm", dtype }),
    }
    Ok(())
}

// ============================================================================
// Byte-buffer entry points (dispatch table signatures)
// ============================================================================

macro_rules! blocked_entry_points {
    ($gemv:ident, $gemm:ident, $group:ty, $bl:literal) => {
        /// GEMV entry point with the dispatch-table signature. `bs` and `nr`
        /// are accepted for signature parity and ignored.
        #[allow(clippy::too_many_arguments)]
        pub fn $gemv(
            n: usize,
            s: &mut [f32],
            _bs: usize,
            vx: &[u8],
            vy: &[u8],
            _nr: usize,
            nc: usize,
            bias: Option<&[f32]>,
        ) {
            gemv_bytes::<$group, $bl>(kernel_variant(), n, s, vx, vy, nc, bias)
        }

        /// GEMM entry point with the dispatch-table signature.
        #[allow(clippy::too_many_arguments)]
        pub fn $gemm(
            n: usize,
            s: &mut [f32],
            bs: usize,
            vx: &[u8],
            vy: &[u8],
            nr: usize,
            nc: usize,
            bias: Option<&[f32]>,
        ) {
            gemm_bytes::<$group, $bl>(kernel_variant(), n, s, bs, vx, vy, nr, nc, bias)
        }
    };
}

blocked_entry_points!(gemv_q4_0_4x4_q8_0, gemm_q4_0_4x4_q8_0, BlockQ4_0x4, 4);
blocked_entry_points!(gemv_q4_0_4x8_q8_0, gemm_q4_0_4x8_q8_0, BlockQ4_0x4, 8);
blocked_entry_points!(gemv_q4_0_8x8_q8_0, gemm_q4_0_8x8_q8_0, BlockQ4_0x8, 8);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::blocks::BlockQ4_0;
    use crate::engine::quantize::quantize_row;
    use crate::engine::repack::{quantize_mat_q8_0, repack_q4_0};
    use crate::engine::vec_dot::vec_dot_q4_0_q8_0_scalar;
    use bytemuck::Zeroable;

    fn weights(rows: usize, cols: usize) -> Vec<f32> {
        (0..rows * cols)
            .map(|i| ((i * 7919 % 97) as f32 - 48.0) / 24.0)
            .collect()
    }

    #[test]
    fn scalar_gemv_matches_vec_dot_per_column() {
        let (nc, n) = (8, 64);
        let w = weights(nc, n);
        let rows = quantize_row::<BlockQ4_0>(&w);
        let packed: Vec<BlockQ4_0x4> = repack_q4_0(&rows, nc, n / 32, 4);
        let act: Vec<f32> = (0..n).map(|i| (i as f32 - 20.0) / 10.0).collect();
        let a = quantize_row::<BlockQ8_0>(&act);

        let mut s = vec![0f32; nc];
        Scalar.gemv::<BlockQ4_0x4, 4>(n, &mut s, &packed, &a, nc, None);

        for c in 0..nc {
            let expected = vec_dot_q4_0_q8_0_scalar(&rows[c * 2..c * 2 + 2], &a);
            assert_eq!(s[c], expected, "column {c}");
        }
    }

    #[test]
    fn scalar_gemm_rows_match_gemv() {
        let (nc, n, nr) = (8, 64, 4);
        let rows = quantize_row::<BlockQ4_0>(&weights(nc, n));
        let packed: Vec<BlockQ4_0x8> = repack_q4_0(&rows, nc, n / 32, 8);
        let act = weights(nr, n);
        let mut tiles = vec![BlockQ8_0x4::zeroed(); n / 32];
        quantize_mat_q8_0(&act, &mut tiles, nr, n, 8);

        let mut out = vec![0f32; nr * nc];
        Scalar.gemm::<BlockQ4_0x8, 8>(n, &mut out, nc, &packed, &tiles, nr, nc, None);

        for r in 0..nr {
            let a = quantize_row::<BlockQ8_0>(&act[r * n..(r + 1) * n]);
            let mut s = vec![0f32; nc];
            Scalar.gemv::<BlockQ4_0x8, 8>(n, &mut s, &packed, &a, nc, None);
            assert_eq!(&out[r * nc..(r + 1) * nc], &s[..], "row {r}");
        }
    }

    #[test]
    fn non_interleaved_type_is_rejected() {
        let mut s = [0f32; 4];
        let err = gemv_with(KernelVariant::Scalar, DataType::Q4_0, 32, &mut s, &[], &[], 4, None)
            .unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    #[should_panic(expected = "not a multiple of 4")]
    fn gemm_rejects_partial_tile() {
        let packed = vec![BlockQ4_0x4::zeroed(); 1];
        let tiles = vec![BlockQ8_0x4::zeroed(); 1];
        let mut out = vec![0f32; 12];
        Scalar.gemm::<BlockQ4_0x4, 4>(32, &mut out, 4, &packed, &tiles, 3, 4, None);
    }
}
