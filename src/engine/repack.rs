//! Row interleaving for the blocked GEMV/GEMM kernels.
//!
//! A group of `N` Q4_0 rows (N = 4 or 8) is woven into one record per
//! 32-column block: the `N` scales first, then the quant bytes in chunks of
//! `bl` (the interleave width, 4 or 8) taken round-robin from each row.
//! Byte `i` of the packed quants comes from
//!
//! ```text
//! row    = (i % (N * bl)) / bl
//! offset = (i / (N * bl)) * bl + i % bl
//! ```
//!
//! Weight bytes are XOR-ed with [`Q4_0_XOR_MASK`] on the way in, turning the
//! `q + 8` nibbles into two's-complement nibbles. Activation tiles
//! ([`BlockQ8_0x4`]) use the same weave with no mask.
//!
//! Packed weights for column group `x` occupy `vx[x * nb..(x + 1) * nb]`;
//! activation tile `y` occupies `vy[y * nb..(y + 1) * nb]`.

use bytemuck::Zeroable;

use super::blocks::{
    as_blocks, as_blocks_mut, BlockQ4_0, BlockQ4_0x4, BlockQ4_0x8, BlockQ8_0, BlockQ8_0x4,
    InterleavedQ4, QK4_0, QK8_0,
};
use super::quantize::quantize_block_symmetric;

/// Flips each nibble's top bit: `q + 8` becomes the two's-complement `q`.
pub const Q4_0_XOR_MASK: u8 = 0x88;

/// Source row and byte offset of interleaved byte `i`.
#[inline]
fn interleave_source(i: usize, nrows: usize, bl: usize) -> (usize, usize) {
    let row = (i % (nrows * bl)) / bl;
    let offset = (i / (nrows * bl)) * bl + i % bl;
    (row, offset)
}

fn check_interleave(bl: usize) {
    assert!(bl == 4 || bl == 8, "interleave width must be 4 or 8, got {bl}");
}

/// Weave `G::NROWS` Q4_0 blocks (one per row, same column) into one group.
pub fn make_group<G: InterleavedQ4>(rows: &[BlockQ4_0], bl: usize, xor_mask: u8) -> G {
    check_interleave(bl);
    assert_eq!(rows.len(), G::NROWS, "expected {} row blocks", G::NROWS);

    let mut out = G::zeroed();
    for (d, row) in out.scales_mut().iter_mut().zip(rows.iter()) {
        *d = row.d;
    }
    for (i, q) in out.quants_mut().iter_mut().enumerate() {
        let (src_id, src_offset) = interleave_source(i, G::NROWS, bl);
        *q = rows[src_id].qs[src_offset] ^ xor_mask;
    }
    out
}

/// Inverse of [`make_group`].
pub fn unpack_group<G: InterleavedQ4>(group: &G, bl: usize, xor_mask: u8, rows: &mut [BlockQ4_0]) {
    check_interleave(bl);
    assert_eq!(rows.len(), G::NROWS, "expected {} row blocks", G::NROWS);

    for (row, &d) in rows.iter_mut().zip(group.scales().iter()) {
        row.d = d;
    }
    for (i, &q) in group.quants().iter().enumerate() {
        let (src_id, src_offset) = interleave_source(i, G::NROWS, bl);
        rows[src_id].qs[src_offset] = q ^ xor_mask;
    }
}

pub fn make_block_q4_0x4(rows: &[BlockQ4_0], bl: usize, xor_mask: u8) -> BlockQ4_0x4 {
    make_group(rows, bl, xor_mask)
}

pub fn make_block_q4_0x8(rows: &[BlockQ4_0], bl: usize, xor_mask: u8) -> BlockQ4_0x8 {
    make_group(rows, bl, xor_mask)
}

pub fn unpack_block_q4_0x4(group: &BlockQ4_0x4, bl: usize, xor_mask: u8) -> [BlockQ4_0; 4] {
    let mut rows = [BlockQ4_0::zeroed(); 4];
    unpack_group(group, bl, xor_mask, &mut rows);
    rows
}

pub fn unpack_block_q4_0x8(group: &BlockQ4_0x8, bl: usize, xor_mask: u8) -> [BlockQ4_0; 8] {
    let mut rows = [BlockQ4_0::zeroed(); 8];
    unpack_group(group, bl, xor_mask, &mut rows);
    rows
}

/// Interleave four Q8_0 activation blocks (one per row) into a tile.
pub fn make_block_q8_0x4(rows: &[BlockQ8_0], bl: usize) -> BlockQ8_0x4 {
    check_interleave(bl);
    assert_eq!(rows.len(), 4, "expected 4 row blocks");

    let mut out = BlockQ8_0x4::zeroed();
    for (d, row) in out.d.iter_mut().zip(rows.iter()) {
        *d = row.d;
    }
    for (i, q) in out.qs.iter_mut().enumerate() {
        let (src_id, src_offset) = interleave_source(i, 4, bl);
        *q = rows[src_id].qs[src_offset];
    }
    out
}

/// Repack row-major Q4_0 blocks (`nrows` rows of `nb` blocks) into groups.
pub fn repack_q4_0<G: InterleavedQ4>(rows: &[BlockQ4_0], nrows: usize, nb: usize, bl: usize) -> Vec<G> {
    assert!(
        nrows % G::NROWS == 0,
        "repack_q4_0: {nrows} rows is not a multiple of {}",
        G::NROWS
    );
    assert!(rows.len() >= nrows * nb, "repack_q4_0: need {} blocks, got {}", nrows * nb, rows.len());

    let mut out = Vec::with_capacity(nrows * nb / G::NROWS);
    let mut column = [BlockQ4_0::zeroed(); 8];
    for g in 0..nrows / G::NROWS {
        for b in 0..nb {
            for (i, slot) in column[..G::NROWS].iter_mut().enumerate() {
                *slot = rows[(g * G::NROWS + i) * nb + b];
            }
            out.push(make_group(&column[..G::NROWS], bl, Q4_0_XOR_MASK));
        }
    }
    out
}

/// Quantize `nrows` rows of `n_per_row` floats straight into interleaved
/// groups. Returns the number of bytes written, which equals the plain
/// Q4_0 size of the same matrix.
pub fn quantize_q4_0_nr_bl<G: InterleavedQ4>(
    src: &[f32],
    dst: &mut [G],
    nrows: usize,
    n_per_row: usize,
    bl: usize,
) -> usize {
    check_interleave(bl);
    assert!(
        n_per_row % QK4_0 == 0,
        "quantize_q4_0_nr_bl: {n_per_row} is not divisible by {QK4_0}"
    );
    assert!(
        nrows % G::NROWS == 0,
        "quantize_q4_0_nr_bl: {nrows} rows is not a multiple of {}",
        G::NROWS
    );
    assert!(src.len() >= nrows * n_per_row, "quantize_q4_0_nr_bl: source too short");

    let nb = n_per_row / QK4_0;
    assert!(dst.len() >= nrows / G::NROWS * nb, "quantize_q4_0_nr_bl: destination too short");

    let mut column = [BlockQ4_0::zeroed(); 8];
    for g in 0..nrows / G::NROWS {
        for x in 0..nb {
            for (i, slot) in column[..G::NROWS].iter_mut().enumerate() {
                let start = (g * G::NROWS + i) * n_per_row + x * QK4_0;
                quantize_block_symmetric(&src[start..start + QK4_0], slot);
            }
            dst[g * nb + x] = make_group(&column[..G::NROWS], bl, Q4_0_XOR_MASK);
        }
    }

    nrows * n_per_row / QK4_0 * std::mem::size_of::<BlockQ4_0>()
}

fn quantize_q4_0_raw<G: InterleavedQ4>(
    src: &[f32],
    dst: &mut [u8],
    nrows: usize,
    n_per_row: usize,
    bl: usize,
) -> usize {
    let ngroups = nrows / G::NROWS * (n_per_row / QK4_0);
    let groups = as_blocks_mut::<G>(dst, ngroups, "quantize_q4_0");
    quantize_q4_0_nr_bl(src, groups, nrows, n_per_row, bl)
}

pub fn quantize_q4_0_4x4(src: &[f32], dst: &mut [u8], nrows: usize, n_per_row: usize) -> usize {
    quantize_q4_0_raw::<BlockQ4_0x4>(src, dst, nrows, n_per_row, 4)
}

pub fn quantize_q4_0_4x8(src: &[f32], dst: &mut [u8], nrows: usize, n_per_row: usize) -> usize {
    quantize_q4_0_raw::<BlockQ4_0x4>(src, dst, nrows, n_per_row, 8)
}

pub fn quantize_q4_0_8x8(src: &[f32], dst: &mut [u8], nrows: usize, n_per_row: usize) -> usize {
    quantize_q4_0_raw::<BlockQ4_0x8>(src, dst, nrows, n_per_row, 8)
}

/// Quantize activation rows to Q8_0 and weave each run of four rows into
/// tiles. `nrows` must be a multiple of 4.
///
/// Each row is quantized exactly like `quantize_row::<BlockQ8_0>`, so a row
/// read back out of a tile matches the single-row path bit for bit.
pub fn quantize_mat_q8_0(
    src: &[f32],
    dst: &mut [BlockQ8_0x4],
    nrows: usize,
    n_per_row: usize,
    bl: usize,
) {
    check_interleave(bl);
    assert!(
        n_per_row % QK8_0 == 0,
        "quantize_mat_q8_0: {n_per_row} is not divisible by {QK8_0}"
    );
    assert!(nrows % 4 == 0, "quantize_mat_q8_0: {nrows} rows is not a multiple of 4");
    assert!(src.len() >= nrows * n_per_row, "quantize_mat_q8_0: source too short");

    let nb = n_per_row / QK8_0;
    assert!(dst.len() >= nrows / 4 * nb, "quantize_mat_q8_0: destination too short");

    let mut column = [BlockQ8_0::zeroed(); 4];
    for t in 0..nrows / 4 {
        for x in 0..nb {
            for (m, slot) in column.iter_mut().enumerate() {
                let start = (t * 4 + m) * n_per_row + x * QK8_0;
                quantize_block_symmetric(&src[start..start + QK8_0], slot);
            }
            dst[t * nb + x] = make_block_q8_0x4(&column, bl);
        }
    }
}

/// Byte-buffer form of [`quantize_mat_q8_0`].
pub fn quantize_mat_q8_0_raw(src: &[f32], dst: &mut [u8], nrows: usize, n_per_row: usize, bl: usize) {
    let ntiles = nrows / 4 * (n_per_row / QK8_0);
    let tiles = as_blocks_mut::<BlockQ8_0x4>(dst, ntiles, "quantize_mat_q8_0");
    quantize_mat_q8_0(src, tiles, nrows, n_per_row, bl);
}

/// View a packed byte buffer as groups. Exposed for loaders that receive
/// pre-interleaved weights.
pub fn groups_from_bytes<G: InterleavedQ4>(bytes: &[u8], ngroups: usize) -> &[G] {
    as_blocks(bytes, ngroups, "interleaved q4_0")
}
