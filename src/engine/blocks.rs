//! Binary block layouts.
//!
//! Every record is `#[repr(C)]` and `Pod`, so a weight buffer read from disk
//! can be viewed as a slice of blocks without copying. Field order and sizes
//! are the wire format; the size assertions at the bottom pin them.

use bytemuck::{Pod, Zeroable};
use half::f16;

/// Elements per Q4_0 block.
pub const QK4_0: usize = 32;
/// Elements per Q8_0 block.
pub const QK8_0: usize = 32;
/// Elements per k-quant super-block.
pub const QK_K: usize = 256;
/// Scale/min byte count shared by Q4_K and Q3_K.
pub const K_SCALE_SIZE: usize = 12;

/// Q4_0: 32 signed 4-bit values biased by 8, one f16 scale. 18 bytes.
///
/// `qs[j]` holds element `j` in its low nibble and element `j + 16` in its
/// high nibble.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BlockQ4_0 {
    pub d: f16,
    pub qs: [u8; QK4_0 / 2],
}

/// Q8_0: 32 signed bytes, one f16 scale. 34 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BlockQ8_0 {
    pub d: f16,
    pub qs: [i8; QK8_0],
}

/// Q4_K: 8 sub-blocks of 32 with 6-bit scale and min each. 144 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BlockQ4K {
    pub d: f16,
    pub dmin: f16,
    pub scales: [u8; K_SCALE_SIZE],
    pub qs: [u8; QK_K / 2],
}

/// Q6_K: 16 sub-blocks of 16, 6-bit values biased by 32, i8 scales. 210 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BlockQ6K {
    pub ql: [u8; QK_K / 2],
    pub qh: [u8; QK_K / 4],
    pub scales: [i8; QK_K / 16],
    pub d: f16,
}

/// Q8_K: activation format for k-quant dot products. 292 bytes.
///
/// `bsums[j]` is the sum of `qs[16 * j..16 * j + 16]`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BlockQ8K {
    pub d: f32,
    pub qs: [i8; QK_K],
    pub bsums: [i16; QK_K / 16],
}

/// Q3_K: 16 sub-blocks of 16, 3-bit values, 6-bit signed scales. 110 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BlockQ3K {
    pub hmask: [u8; QK_K / 8],
    pub qs: [u8; QK_K / 4],
    pub scales: [u8; K_SCALE_SIZE],
    pub d: f16,
}

/// Q2_K: 16 sub-blocks of 16, 2-bit values, 4-bit scale and min. 84 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BlockQ2K {
    pub scales: [u8; QK_K / 16],
    pub qs: [u8; QK_K / 4],
    pub d: f16,
    pub dmin: f16,
}

/// Four Q4_0 rows interleaved for the blocked kernels. 72 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BlockQ4_0x4 {
    pub d: [f16; 4],
    pub qs: [u8; QK4_0 * 2],
}

/// Eight Q4_0 rows interleaved for the blocked kernels. 144 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BlockQ4_0x8 {
    pub d: [f16; 8],
    pub qs: [u8; QK4_0 * 4],
}

/// Four Q8_0 activation rows interleaved into one tile. 136 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BlockQ8_0x4 {
    pub d: [f16; 4],
    pub qs: [i8; QK8_0 * 4],
}

/// A group of Q4_0 rows interleaved into one record.
///
/// Implemented by the two packed layouts so the packing routines and the
/// blocked kernels can be written once over the row count.
pub trait InterleavedQ4: Pod {
    /// Rows woven into one record.
    const NROWS: usize;

    fn scales(&self) -> &[f16];
    fn scales_mut(&mut self) -> &mut [f16];
    fn quants(&self) -> &[u8];
    fn quants_mut(&mut self) -> &mut [u8];
}

impl InterleavedQ4 for BlockQ4_0x4 {
    const NROWS: usize = 4;

    fn scales(&self) -> &[f16] {
        &self.d
    }
    fn scales_mut(&mut self) -> &mut [f16] {
        &mut self.d
    }
    fn quants(&self) -> &[u8] {
        &self.qs
    }
    fn quants_mut(&mut self) -> &mut [u8] {
        &mut self.qs
    }
}

impl InterleavedQ4 for BlockQ4_0x8 {
    const NROWS: usize = 8;

    fn scales(&self) -> &[f16] {
        &self.d
    }
    fn scales_mut(&mut self) -> &mut [f16] {
        &mut self.d
    }
    fn quants(&self) -> &[u8] {
        &self.qs
    }
    fn quants_mut(&mut self) -> &mut [u8] {
        &mut self.qs
    }
}

const _: () = assert!(std::mem::size_of::<BlockQ4_0>() == 18);
const _: () = assert!(std::mem::size_of::<BlockQ8_0>() == 34);
const _: () = assert!(std::mem::size_of::<BlockQ4K>() == 144);
const _: () = assert!(std::mem::size_of::<BlockQ6K>() == 210);
const _: () = assert!(std::mem::size_of::<BlockQ8K>() == 292);
const _: () = assert!(std::mem::size_of::<BlockQ3K>() == 110);
const _: () = assert!(std::mem::size_of::<BlockQ2K>() == 84);
const _: () = assert!(std::mem::size_of::<BlockQ4_0x4>() == 72);
const _: () = assert!(std::mem::size_of::<BlockQ4_0x8>() == 144);
const _: () = assert!(std::mem::size_of::<BlockQ8_0x4>() == 136);

/// View a raw byte buffer as `nb` blocks of `T`.
///
/// Panics if the buffer is shorter than `nb` blocks or not aligned for `T`.
/// Both are caller bugs: buffers come from typed allocations or from a
/// loader that aligns tensor data.
pub fn as_blocks<'a, T: Pod>(bytes: &'a [u8], nb: usize, what: &str) -> &'a [T] {
    let len = nb * std::mem::size_of::<T>();
    assert!(
        bytes.len() >= len,
        "{what}: buffer holds {} bytes, need {len} for {nb} blocks",
        bytes.len()
    );
    bytemuck::try_cast_slice(&bytes[..len])
        .unwrap_or_else(|e| panic!("{what}: cannot view buffer as blocks: {e:?}"))
}

/// Mutable counterpart of [`as_blocks`].
pub fn as_blocks_mut<'a, T: Pod>(bytes: &'a mut [u8], nb: usize, what: &str) -> &'a mut [T] {
    let len = nb * std::mem::size_of::<T>();
    assert!(
        bytes.len() >= len,
        "{what}: buffer holds {} bytes, need {len} for {nb} blocks",
        bytes.len()
    );
    bytemuck::try_cast_slice_mut(&mut bytes[..len])
        .unwrap_or_else(|e| panic!("{what}: cannot view buffer as blocks: {e:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn q4_0_field_offsets() {
        let mut block = BlockQ4_0::zeroed();
        block.d = f16::from_f32(1.0);
        block.qs[0] = 0xAB;
        let bytes = bytemuck::bytes_of(&block);
        assert_eq!(&bytes[..2], &f16::from_f32(1.0).to_le_bytes());
        assert_eq!(bytes[2], 0xAB);
    }

    #[test]
    fn q6k_scale_trails_quants() {
        let mut block = BlockQ6K::zeroed();
        block.d = f16::from_f32(2.0);
        let bytes = bytemuck::bytes_of(&block);
        assert_eq!(&bytes[208..], &f16::from_f32(2.0).to_le_bytes());
    }

    #[test]
    fn as_blocks_views_typed_buffer() {
        let blocks = vec![BlockQ8_0::zeroed(); 3];
        let bytes: &[u8] = bytemuck::cast_slice(&blocks);
        let view: &[BlockQ8_0] = as_blocks(bytes, 3, "test");
        assert_eq!(view.len(), 3);
    }

    #[test]
    #[should_panic(expected = "need 68 for 2 blocks")]
    fn as_blocks_rejects_short_buffer() {
        let blocks = vec![BlockQ8_0::zeroed(); 1];
        let bytes: &[u8] = bytemuck::cast_slice(&blocks);
        let _: &[BlockQ8_0] = as_blocks(bytes, 2, "test");
    }
}
