//! Type-trait dispatch table.
//!
//! One [`TypeTraits`] record per data-type tag, holding block geometry and
//! optional function pointers over raw byte buffers. The table is a
//! `static` array built at compile time; lookups are plain indexing.
//! A `None` entry means the operation is not implemented for that type.

use super::blocks::{
    as_blocks, as_blocks_mut, BlockQ2K, BlockQ3K, BlockQ4K, BlockQ4_0, BlockQ6K, BlockQ8K,
    BlockQ8_0, QK4_0, QK8_0, QK_K,
};
use super::error::QuantError;
use super::gemm;
use super::quantize::{check_row, AddRow, QuantBlock, VecDot};
use super::repack;
use super::types::{DataType, TYPE_COUNT};

use half::f16;
use std::mem::size_of;

/// Dequantize a raw block buffer into `dst` (`dst.len()` elements).
pub type ToFloatFn = fn(src: &[u8], dst: &mut [f32]);
/// Quantize `src` into a raw block buffer.
pub type FromFloatFn = fn(src: &[f32], dst: &mut [u8]);
/// Quantize `nrows` rows into interleaved activation tiles.
pub type FromFloatToMatFn =
    fn(src: &[f32], dst: &mut [u8], nrows: usize, n_per_row: usize, blck_size_interleave: usize);
/// Quantize `nrows` weight rows into interleaved groups; returns bytes written.
pub type QuantizeRowsFn = fn(src: &[f32], dst: &mut [u8], nrows: usize, n_per_row: usize) -> usize;
/// Inner product of `n` elements of two raw block buffers.
pub type VecDotFn = fn(n: usize, x: &[u8], y: &[u8]) -> f32;
/// Blocked matrix-vector product, see [`gemm`](super::gemm).
pub type GemvFn = fn(
    n: usize,
    s: &mut [f32],
    bs: usize,
    vx: &[u8],
    vy: &[u8],
    nr: usize,
    nc: usize,
    bias: Option<&[f32]>,
);
/// Blocked matrix-matrix product, same signature as [`GemvFn`].
pub type GemmFn = GemvFn;
/// `dst[i] += alpha * dequant(src)[i]` over `n` elements.
pub type AddRowFn = fn(n: usize, src: &[u8], dst: &mut [f32], alpha: f32);

/// Per-type metadata and kernels.
#[derive(Debug, Clone, Copy)]
pub struct TypeTraits {
    pub tag: u32,
    pub name: &'static str,
    /// Bytes per block (per row-block for interleaved types).
    pub size: usize,
    /// Elements per block.
    pub blck_size: usize,
    /// Interleave width in bytes, 0 if the type is not interleaved.
    pub blck_size_interleave: usize,
    /// Rows woven into one group, 0 if the type is not interleaved.
    pub nrows_interleaved: usize,
    pub to_float: Option<ToFloatFn>,
    pub from_float: Option<FromFloatFn>,
    pub from_float_to_mat: Option<FromFloatToMatFn>,
    pub quantize_rows: Option<QuantizeRowsFn>,
    pub vec_dot: Option<VecDotFn>,
    /// Activation format `vec_dot`/`gemv`/`gemm` expect.
    pub vec_dot_type: DataType,
    pub gemv: Option<GemvFn>,
    pub gemm: Option<GemmFn>,
    pub add_row_to: Option<AddRowFn>,
}

impl TypeTraits {
    const fn empty(tag: u32, name: &'static str) -> Self {
        Self {
            tag,
            name,
            size: 0,
            blck_size: 0,
            blck_size_interleave: 0,
            nrows_interleaved: 0,
            to_float: None,
            from_float: None,
            from_float_to_mat: None,
            quantize_rows: None,
            vec_dot: None,
            vec_dot_type: DataType::F32,
            gemv: None,
            gemm: None,
            add_row_to: None,
        }
    }

    /// Bytes needed for `n` elements, 0 for types without a layout.
    pub fn row_size(&self, n: usize) -> usize {
        if self.blck_size == 0 {
            0
        } else {
            n / self.blck_size * self.size
        }
    }

    /// True if any operation is available for this type.
    pub fn is_supported(&self) -> bool {
        self.to_float.is_some()
            || self.from_float.is_some()
            || self.vec_dot.is_some()
            || self.gemv.is_some()
            || self.quantize_rows.is_some()
            || self.add_row_to.is_some()
    }

    /// True for the interleaved Q4_0 weight layouts.
    pub fn is_interleaved(&self) -> bool {
        self.nrows_interleaved != 0
    }

    fn missing(&self, op: &'static str) -> QuantError {
        match DataType::try_from(self.tag) {
            Ok(dtype) => QuantError::NotImplemented { op, dtype },
            Err(e) => e,
        }
    }

    pub fn require_to_float(&self) -> Result<ToFloatFn, QuantError> {
        self.to_float.ok_or_else(|| self.missing("to_float"))
    }

    pub fn require_from_float(&self) -> Result<FromFloatFn, QuantError> {
        self.from_float.ok_or_else(|| self.missing("from_float"))
    }

    pub fn require_vec_dot(&self) -> Result<VecDotFn, QuantError> {
        self.vec_dot.ok_or_else(|| self.missing("vec_dot"))
    }

    pub fn require_gemv(&self) -> Result<GemvFn, QuantError> {
        self.gemv.ok_or_else(|| self.missing("gemv"))
    }

    pub fn require_gemm(&self) -> Result<GemmFn, QuantError> {
        self.gemm.ok_or_else(|| self.missing("gemm"))
    }

    pub fn require_add_row_to(&self) -> Result<AddRowFn, QuantError> {
        self.add_row_to.ok_or_else(|| self.missing("add_row_to"))
    }

    pub fn require_quantize_rows(&self) -> Result<QuantizeRowsFn, QuantError> {
        self.quantize_rows.ok_or_else(|| self.missing("quantize_rows"))
    }

    pub fn require_from_float_to_mat(&self) -> Result<FromFloatToMatFn, QuantError> {
        self.from_float_to_mat
            .ok_or_else(|| self.missing("from_float_to_mat"))
    }
}

// ============================================================================
// Raw-buffer adapters
// ============================================================================

fn to_float_raw<T: QuantBlock>(src: &[u8], dst: &mut [f32]) {
    let nb = check_row::<T>("to_float", dst.len(), src.len() / size_of::<T>());
    T::to_float(as_blocks::<T>(src, nb, T::DTYPE.name()), dst)
}

fn from_float_raw<T: QuantBlock>(src: &[f32], dst: &mut [u8]) {
    let nb = check_row::<T>("from_float", src.len(), dst.len() / size_of::<T>());
    T::from_float(src, as_blocks_mut::<T>(dst, nb, T::DTYPE.name()))
}

fn vec_dot_raw<T: VecDot>(n: usize, x: &[u8], y: &[u8]) -> f32 {
    let nx = check_row::<T>("vec_dot", n, x.len() / size_of::<T>());
    let ny = check_row::<T::Rhs>("vec_dot", n, y.len() / size_of::<T::Rhs>());
    let xs = as_blocks::<T>(x, nx, T::DTYPE.name());
    let ys = as_blocks::<T::Rhs>(y, ny, T::Rhs::DTYPE.name());
    T::vec_dot(n, xs, ys)
}

fn add_row_raw<T: AddRow>(n: usize, src: &[u8], dst: &mut [f32], alpha: f32) {
    let nb = check_row::<T>("add_row", n, src.len() / size_of::<T>());
    T::add_row_to(n, as_blocks::<T>(src, nb, T::DTYPE.name()), dst, alpha)
}

// ============================================================================
// Table
// ============================================================================

const fn codec<T: QuantBlock>(mut r: TypeTraits) -> TypeTraits {
    r.to_float = Some(to_float_raw::<T> as ToFloatFn);
    r.from_float = Some(from_float_raw::<T> as FromFloatFn);
    r
}

const fn interleaved(
    tag: DataType,
    name: &'static str,
    blck_size_interleave: usize,
    nrows_interleaved: usize,
    quantize_rows: QuantizeRowsFn,
    gemv: GemvFn,
    gemm: GemmFn,
) -> TypeTraits {
    let mut r = TypeTraits::empty(tag as u32, name);
    r.size = size_of::<BlockQ4_0>();
    r.blck_size = QK4_0;
    r.blck_size_interleave = blck_size_interleave;
    r.nrows_interleaved = nrows_interleaved;
    r.quantize_rows = Some(quantize_rows);
    r.vec_dot_type = DataType::Q8_0;
    r.gemv = Some(gemv);
    r.gemm = Some(gemm);
    r
}

const fn build_table() -> [TypeTraits; TYPE_COUNT] {
    let mut t = [TypeTraits::empty(0, ""); TYPE_COUNT];
    let mut i = 0;
    while i < TYPE_COUNT {
        t[i].tag = i as u32;
        i += 1;
    }

    let mut r = TypeTraits::empty(DataType::F32 as u32, "f32");
    r.size = size_of::<f32>();
    r.blck_size = 1;
    r.vec_dot = Some(vec_dot_raw::<f32> as VecDotFn);
    r.vec_dot_type = DataType::F32;
    r.add_row_to = Some(add_row_raw::<f32> as AddRowFn);
    t[DataType::F32 as usize] = r;

    let mut r = codec::<f16>(TypeTraits::empty(DataType::F16 as u32, "f16"));
    r.size = size_of::<f16>();
    r.blck_size = 1;
    r.vec_dot = Some(vec_dot_raw::<f16> as VecDotFn);
    r.vec_dot_type = DataType::F16;
    r.add_row_to = Some(add_row_raw::<f16> as AddRowFn);
    t[DataType::F16 as usize] = r;

    let mut r = codec::<BlockQ4_0>(TypeTraits::empty(DataType::Q4_0 as u32, "q4_0"));
    r.size = size_of::<BlockQ4_0>();
    r.blck_size = QK4_0;
    r.vec_dot = Some(vec_dot_raw::<BlockQ4_0> as VecDotFn);
    r.vec_dot_type = DataType::Q8_0;
    r.add_row_to = Some(add_row_raw::<BlockQ4_0> as AddRowFn);
    t[DataType::Q4_0 as usize] = r;

    t[DataType::Q4_1 as usize].name = "q4_1";

    let mut r = codec::<BlockQ8_0>(TypeTraits::empty(DataType::Q8_0 as u32, "q8_0"));
    r.size = size_of::<BlockQ8_0>();
    r.blck_size = QK8_0;
    r.from_float_to_mat = Some(repack::quantize_mat_q8_0_raw as FromFloatToMatFn);
    r.vec_dot = Some(vec_dot_raw::<BlockQ8_0> as VecDotFn);
    r.vec_dot_type = DataType::Q8_0;
    r.add_row_to = Some(add_row_raw::<BlockQ8_0> as AddRowFn);
    t[DataType::Q8_0 as usize] = r;

    t[DataType::Q8_1 as usize].name = "q8_1";
    t[DataType::Q8PerTensor as usize].name = "q8_per_tensor";

    let mut r = codec::<BlockQ4K>(TypeTraits::empty(DataType::Q4K as u32, "q4_k"));
    r.size = size_of::<BlockQ4K>();
    r.blck_size = QK_K;
    r.vec_dot = Some(vec_dot_raw::<BlockQ4K> as VecDotFn);
    r.vec_dot_type = DataType::Q8K;
    r.add_row_to = Some(add_row_raw::<BlockQ4K> as AddRowFn);
    t[DataType::Q4K as usize] = r;

    let mut r = codec::<BlockQ6K>(TypeTraits::empty(DataType::Q6K as u32, "q6_k"));
    r.size = size_of::<BlockQ6K>();
    r.blck_size = QK_K;
    r.vec_dot = Some(vec_dot_raw::<BlockQ6K> as VecDotFn);
    r.vec_dot_type = DataType::Q8K;
    r.add_row_to = Some(add_row_raw::<BlockQ6K> as AddRowFn);
    t[DataType::Q6K as usize] = r;

    let mut r = codec::<BlockQ8K>(TypeTraits::empty(DataType::Q8K as u32, "q8_k"));
    r.size = size_of::<BlockQ8K>();
    r.blck_size = QK_K;
    r.vec_dot_type = DataType::Q8K;
    r.add_row_to = Some(add_row_raw::<BlockQ8K> as AddRowFn);
    t[DataType::Q8K as usize] = r;

    t[DataType::I8 as usize].name = "i8";
    t[DataType::I16 as usize].name = "i16";
    t[DataType::I32 as usize].name = "i32";

    t[DataType::Q4_0_4_4 as usize] = interleaved(
        DataType::Q4_0_4_4,
        "q4_0_4x4",
        4,
        4,
        repack::quantize_q4_0_4x4,
        gemm::gemv_q4_0_4x4_q8_0,
        gemm::gemm_q4_0_4x4_q8_0,
    );
    t[DataType::Q4_0_4_8 as usize] = interleaved(
        DataType::Q4_0_4_8,
        "q4_0_4x8",
        8,
        4,
        repack::quantize_q4_0_4x8,
        gemm::gemv_q4_0_4x8_q8_0,
        gemm::gemm_q4_0_4x8_q8_0,
    );
    t[DataType::Q4_0_8_8 as usize] = interleaved(
        DataType::Q4_0_8_8,
        "q4_0_8x8",
        8,
        8,
        repack::quantize_q4_0_8x8,
        gemm::gemv_q4_0_8x8_q8_0,
        gemm::gemm_q4_0_8x8_q8_0,
    );

    // Activation tile layout; geometry only.
    let mut r = TypeTraits::empty(DataType::Q8_0_4_4 as u32, "q8_0_4x4");
    r.size = size_of::<BlockQ8_0>();
    r.blck_size = QK8_0;
    r.blck_size_interleave = 4;
    r.vec_dot_type = DataType::Q8_0;
    t[DataType::Q8_0_4_4 as usize] = r;

    let mut r = codec::<BlockQ3K>(TypeTraits::empty(DataType::Q3K as u32, "q3_k"));
    r.size = size_of::<BlockQ3K>();
    r.blck_size = QK_K;
    r.vec_dot = Some(vec_dot_raw::<BlockQ3K> as VecDotFn);
    r.vec_dot_type = DataType::Q8K;
    t[DataType::Q3K as usize] = r;

    let mut r = codec::<BlockQ2K>(TypeTraits::empty(DataType::Q2K as u32, "q2_k"));
    r.size = size_of::<BlockQ2K>();
    r.blck_size = QK_K;
    r.vec_dot = Some(vec_dot_raw::<BlockQ2K> as VecDotFn);
    r.vec_dot_type = DataType::Q8K;
    t[DataType::Q2K as usize] = r;

    t[DataType::Q1K as usize].name = "q1_k";
    t[DataType::IQ2XXS as usize].name = "iq2_xxs";
    t[DataType::IQ2XS as usize].name = "iq2_xs";
    t[DataType::IQ1S as usize].name = "iq1_s";
    t[DataType::IQ1M as usize].name = "iq1_m";
    t[DataType::IQ2S as usize].name = "iq2_s";
    t[DataType::KleidiAiQ4_0 as usize].name = "kleidiai_q4_0";
    t[DataType::Q8_0F as usize].name = "q8_0f";
    t[DataType::Q2_0 as usize].name = "q2_0";

    t
}

static TYPE_TRAITS: [TypeTraits; TYPE_COUNT] = build_table();

static UNKNOWN: TypeTraits = TypeTraits::empty(u32::MAX, "");

/// Record for a known data type.
pub fn type_traits(dtype: DataType) -> &'static TypeTraits {
    &TYPE_TRAITS[dtype as usize]
}

/// Record for a raw tag. Tags outside the table map to an empty record.
pub fn type_traits_raw(tag: u32) -> &'static TypeTraits {
    TYPE_TRAITS.get(tag as usize).unwrap_or(&UNKNOWN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_sit_at_their_tags() {
        for (i, r) in TYPE_TRAITS.iter().enumerate() {
            assert_eq!(r.tag as usize, i);
        }
        for ty in DataType::ALL {
            assert_eq!(type_traits(ty).name, ty.name());
        }
    }

    #[test]
    fn geometry_matches_block_layouts() {
        assert_eq!(type_traits(DataType::Q4_0).size, 18);
        assert_eq!(type_traits(DataType::Q8K).size, 292);
        assert_eq!(type_traits(DataType::Q4_0_8_8).nrows_interleaved, 8);
        assert_eq!(type_traits(DataType::Q4_0_4_8).blck_size_interleave, 8);
        assert_eq!(type_traits(DataType::Q4K).row_size(512), 288);
    }

    #[test]
    fn out_of_range_tag_is_empty() {
        let r = type_traits_raw(4096);
        assert!(!r.is_supported());
        assert!(matches!(r.require_vec_dot(), Err(QuantError::UnknownType(_))));
    }
}
