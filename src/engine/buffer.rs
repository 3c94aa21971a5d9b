//! Owned, aligned byte storage for quantized tensors.
//!
//! Block records need 2- or 4-byte alignment to be viewed in place; a plain
//! `Vec<u8>` only guarantees 1. `BlockBuf` keeps its bytes in 8-byte words
//! so any block type can be cast out of it.

const WORD: usize = std::mem::size_of::<u64>();

/// Zero-initialized byte buffer aligned to 8 bytes.
#[derive(Debug, Clone, Default)]
pub struct BlockBuf {
    words: Vec<u64>,
    len: usize,
}

impl BlockBuf {
    /// Allocate `len` zero bytes.
    pub fn zeroed(len: usize) -> Self {
        let nwords = (len + WORD - 1) & !(WORD - 1);
        Self {
            words: vec![0u64; nwords / WORD],
            len,
        }
    }

    /// Copy `bytes` into a fresh aligned buffer.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buf = Self::zeroed(bytes.len());
        buf.as_bytes_mut().copy_from_slice(bytes);
        buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..self.len]
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[..self.len]
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::blocks::{as_blocks, BlockQ8K};

    #[test]
    fn rounds_storage_up_to_words() {
        let buf = BlockBuf::zeroed(13);
        assert_eq!(buf.len(), 13);
        assert_eq!(buf.words.len(), 2);
        assert!(buf.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn holds_four_byte_aligned_blocks() {
        let buf = BlockBuf::zeroed(2 * 292);
        let blocks: &[BlockQ8K] = as_blocks(buf.as_bytes(), 2, "test");
        assert_eq!(blocks[1].d, 0.0);
    }

    #[test]
    fn from_bytes_copies() {
        let buf = BlockBuf::from_bytes(&[1, 2, 3]);
        assert_eq!(buf.as_bytes(), &[1, 2, 3]);
    }
}
