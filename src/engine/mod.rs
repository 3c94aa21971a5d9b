//! Quantized tensor kernels for GG-QUANT.
//!
//! Block formats, float conversion, dot products, interleaved packing,
//! blocked GEMV/GEMM and the type-trait dispatch table that ties them
//! together. `matmul` is a small driver over the table.

pub mod add_row;
pub mod blocks;
pub mod buffer;
pub mod error;
pub mod gemm;
pub mod k_quants;
pub mod matmul;
pub mod quantize;
pub mod repack;
pub mod simd_matmul;
mod simd_neon;
pub mod type_traits;
pub mod types;
pub mod vec_dot;

pub use blocks::{
    as_blocks, as_blocks_mut, BlockQ2K, BlockQ3K, BlockQ4K, BlockQ4_0, BlockQ4_0x4, BlockQ4_0x8,
    BlockQ6K, BlockQ8K, BlockQ8_0, BlockQ8_0x4, InterleavedQ4, QK4_0, QK8_0, QK_K,
};
pub use buffer::BlockBuf;
pub use error::QuantError;
pub use gemm::{gemm_typed, gemm_with, gemv_typed, gemv_with, BlockedGemm, Scalar};
pub use matmul::{QuantMatmul, QuantWeight};
pub use quantize::{dequantize_row, quantize_row, AddRow, QuantBlock, VecDot};
pub use repack::{
    make_block_q4_0x4, make_block_q4_0x8, make_block_q8_0x4, quantize_mat_q8_0,
    quantize_q4_0_nr_bl, repack_q4_0, unpack_block_q4_0x4, unpack_block_q4_0x8, Q4_0_XOR_MASK,
};
pub use simd_matmul::{init_simd, kernel_variant, KernelVariant};
pub use type_traits::{type_traits, type_traits_raw, TypeTraits};
pub use types::{DataType, TYPE_COUNT};

#[cfg(target_arch = "x86_64")]
pub use gemm::Avx2;
#[cfg(target_arch = "aarch64")]
pub use gemm::Neon;
