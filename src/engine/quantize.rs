//! Float <-> block conversion.
//!
//! [`QuantBlock`] is the per-format codec; [`VecDot`] and [`AddRow`] extend
//! it for the formats that support those operations. The symmetric 32-element
//! formats share a single quantize/dequantize routine parameterized over bit
//! width and stored bias, see [`SymmetricBlock`].

use bytemuck::Pod;
use half::f16;

use super::blocks::{BlockQ4_0, BlockQ8K, BlockQ8_0, QK4_0, QK8_0, QK_K};
use super::types::DataType;

/// A block encoding with a float conversion in both directions.
pub trait QuantBlock: Pod {
    const DTYPE: DataType;
    /// Elements per block.
    const BLCK_SIZE: usize;

    /// Dequantize `ys.len() / BLCK_SIZE` blocks into `ys`.
    fn to_float(xs: &[Self], ys: &mut [f32]);

    /// Quantize `xs` into `xs.len() / BLCK_SIZE` blocks.
    fn from_float(xs: &[f32], ys: &mut [Self]);
}

/// Inner product of a weight block run with an activation block run.
pub trait VecDot: QuantBlock {
    /// Activation format this weight format pairs with.
    type Rhs: QuantBlock;

    fn vec_dot(n: usize, xs: &[Self], ys: &[Self::Rhs]) -> f32;
}

/// Fused dequantize-scale-accumulate: `ys[i] += alpha * dequant(xs)[i]`.
pub trait AddRow: QuantBlock {
    fn add_row_to(n: usize, xs: &[Self], ys: &mut [f32], alpha: f32);
}

/// Panic unless `n` elements fit a whole number of `T` blocks and `have`
/// blocks are available. Returns the block count.
pub(crate) fn check_row<T: QuantBlock>(op: &str, n: usize, have: usize) -> usize {
    assert!(
        n % T::BLCK_SIZE == 0,
        "{op}_{}: {n} is not divisible by {}",
        T::DTYPE,
        T::BLCK_SIZE
    );
    let nb = n / T::BLCK_SIZE;
    assert!(
        have >= nb,
        "{op}_{}: need {nb} blocks, got {have}",
        T::DTYPE
    );
    nb
}

/// [`check_row`] for accumulation: the destination must also hold `n` floats.
pub(crate) fn check_add_row<T: QuantBlock>(n: usize, have: usize, dst_len: usize) -> usize {
    let nb = check_row::<T>("add_row", n, have);
    assert!(
        dst_len >= n,
        "add_row_{}: destination holds {dst_len} floats, need {n}",
        T::DTYPE
    );
    nb
}

/// Quantize a float row into a freshly allocated block vector.
pub fn quantize_row<T: QuantBlock>(xs: &[f32]) -> Vec<T> {
    let mut ys = vec![T::zeroed(); xs.len() / T::BLCK_SIZE];
    T::from_float(xs, &mut ys);
    ys
}

/// Dequantize a block run into a freshly allocated float vector.
pub fn dequantize_row<T: QuantBlock>(xs: &[T]) -> Vec<f32> {
    let mut ys = vec![0f32; xs.len() * T::BLCK_SIZE];
    T::to_float(xs, &mut ys);
    ys
}

// ============================================================================
// Symmetric 32-element formats
// ============================================================================

/// A block with one f16 scale and `QK` signed codes stored with a bias.
///
/// Quantization: `d = max_abs / (2^(BITS-1) - 1)`, `q = round(x / d)` clamped
/// to the signed range, stored as `q + BIAS`. Dequantization is
/// `(stored - BIAS) * d`.
pub trait SymmetricBlock: Pod {
    const BITS: u32;
    const BIAS: i32;
    const QK: usize;

    fn scale(&self) -> f16;
    fn set_scale(&mut self, d: f16);
    /// Stored (biased) code of element `j`.
    fn code(&self, j: usize) -> i32;
    fn set_code(&mut self, j: usize, code: i32);
}

impl SymmetricBlock for BlockQ4_0 {
    const BITS: u32 = 4;
    const BIAS: i32 = 8;
    const QK: usize = QK4_0;

    fn scale(&self) -> f16 {
        self.d
    }
    fn set_scale(&mut self, d: f16) {
        self.d = d;
    }
    fn code(&self, j: usize) -> i32 {
        let shift = 4 * (j / (QK4_0 / 2));
        ((self.qs[j % (QK4_0 / 2)] >> shift) & 0x0F) as i32
    }
    fn set_code(&mut self, j: usize, code: i32) {
        let shift = 4 * (j / (QK4_0 / 2));
        let byte = &mut self.qs[j % (QK4_0 / 2)];
        *byte = (*byte & !(0x0F << shift)) | (((code as u8) & 0x0F) << shift);
    }
}

impl SymmetricBlock for BlockQ8_0 {
    const BITS: u32 = 8;
    const BIAS: i32 = 0;
    const QK: usize = QK8_0;

    fn scale(&self) -> f16 {
        self.d
    }
    fn set_scale(&mut self, d: f16) {
        self.d = d;
    }
    fn code(&self, j: usize) -> i32 {
        self.qs[j] as i32
    }
    fn set_code(&mut self, j: usize, code: i32) {
        self.qs[j] = code as i8;
    }
}

/// Quantize one block's worth of floats.
///
/// The quotient uses the stored half-precision scale, so dequantization is
/// within half a step of the input. An all-zero block stores `d = 0` and
/// all-zero codes.
pub fn quantize_block_symmetric<B: SymmetricBlock>(xs: &[f32], block: &mut B) {
    debug_assert_eq!(xs.len(), B::QK);
    let qmax = (1i32 << (B::BITS - 1)) - 1;
    let qmin = -(1i32 << (B::BITS - 1));
    let amax = xs.iter().fold(0f32, |m, &x| m.max(x.abs()));

    let d = f16::from_f32(amax / qmax as f32);
    let d_f = d.to_f32();
    let id = if d_f != 0.0 { 1.0 / d_f } else { 0.0 };

    block.set_scale(d);
    for (j, &x) in xs.iter().enumerate() {
        let q = ((x * id).round() as i32).clamp(qmin, qmax);
        block.set_code(j, q + B::BIAS);
    }
}

/// Dequantize one block into `ys`.
pub fn dequantize_block_symmetric<B: SymmetricBlock>(block: &B, ys: &mut [f32]) {
    let d = block.scale().to_f32();
    for (j, y) in ys.iter_mut().enumerate().take(B::QK) {
        *y = (block.code(j) - B::BIAS) as f32 * d;
    }
}

fn quantize_symmetric<B: SymmetricBlock + QuantBlock>(xs: &[f32], ys: &mut [B]) {
    let nb = check_row::<B>("quantize_row", xs.len(), ys.len());
    for (chunk, block) in xs.chunks_exact(B::QK).zip(ys[..nb].iter_mut()) {
        quantize_block_symmetric(chunk, block);
    }
}

fn dequantize_symmetric<B: SymmetricBlock + QuantBlock>(xs: &[B], ys: &mut [f32]) {
    let nb = check_row::<B>("dequantize_row", ys.len(), xs.len());
    for (block, out) in xs[..nb].iter().zip(ys.chunks_exact_mut(B::QK)) {
        dequantize_block_symmetric(block, out);
    }
}

impl QuantBlock for BlockQ4_0 {
    const DTYPE: DataType = DataType::Q4_0;
    const BLCK_SIZE: usize = QK4_0;

    fn to_float(xs: &[Self], ys: &mut [f32]) {
        dequantize_symmetric(xs, ys)
    }

    fn from_float(xs: &[f32], ys: &mut [Self]) {
        quantize_symmetric(xs, ys)
    }
}

impl QuantBlock for BlockQ8_0 {
    const DTYPE: DataType = DataType::Q8_0;
    const BLCK_SIZE: usize = QK8_0;

    fn to_float(xs: &[Self], ys: &mut [f32]) {
        dequantize_symmetric(xs, ys)
    }

    fn from_float(xs: &[f32], ys: &mut [Self]) {
        quantize_symmetric(xs, ys)
    }
}

// ============================================================================
// Q8_K activations
// ============================================================================

impl QuantBlock for BlockQ8K {
    const DTYPE: DataType = DataType::Q8K;
    const BLCK_SIZE: usize = QK_K;

    fn to_float(xs: &[Self], ys: &mut [f32]) {
        let nb = check_row::<Self>("dequantize_row", ys.len(), xs.len());
        for (x, out) in xs[..nb].iter().zip(ys.chunks_exact_mut(QK_K)) {
            for (y, &q) in out.iter_mut().zip(x.qs.iter()) {
                *y = x.d * q as f32;
            }
        }
    }

    fn from_float(xs: &[f32], ys: &mut [Self]) {
        let nb = check_row::<Self>("quantize_row", xs.len(), ys.len());
        for (chunk, y) in xs.chunks_exact(QK_K).zip(ys[..nb].iter_mut()) {
            let amax = chunk.iter().fold(0f32, |m, &x| m.max(x.abs()));
            if amax == 0.0 {
                y.d = 0.0;
                y.qs.fill(0);
                y.bsums.fill(0);
                continue;
            }
            let d = amax / 127.0;
            let id = 1.0 / d;
            for (q, &x) in y.qs.iter_mut().zip(chunk.iter()) {
                *q = (x * id).round().clamp(-128.0, 127.0) as i8;
            }
            for (sum, run) in y.bsums.iter_mut().zip(y.qs.chunks_exact(16)) {
                *sum = run.iter().map(|&q| q as i16).sum();
            }
            y.d = d;
        }
    }
}

// ============================================================================
// Plain float rows
// ============================================================================

impl QuantBlock for f32 {
    const DTYPE: DataType = DataType::F32;
    const BLCK_SIZE: usize = 1;

    fn to_float(xs: &[Self], ys: &mut [f32]) {
        let n = ys.len();
        ys.copy_from_slice(&xs[..n]);
    }

    fn from_float(xs: &[f32], ys: &mut [Self]) {
        ys[..xs.len()].copy_from_slice(xs);
    }
}

impl QuantBlock for f16 {
    const DTYPE: DataType = DataType::F16;
    const BLCK_SIZE: usize = 1;

    fn to_float(xs: &[Self], ys: &mut [f32]) {
        for (y, x) in ys.iter_mut().zip(xs.iter()) {
            *y = x.to_f32();
        }
    }

    fn from_float(xs: &[f32], ys: &mut [Self]) {
        for (y, &x) in ys.iter_mut().zip(xs.iter()) {
            *y = f16::from_f32(x);
        }
    }
}
