//! Kernel error types for GG-QUANT.
//!
//! Shape and alignment violations are programming errors and panic at the
//! call site. These variants cover the configuration-time failures a caller
//! can check for before invoking a kernel.

use thiserror::Error;

use super::types::DataType;

/// Errors surfaced by the kernel suite.
#[derive(Debug, Error)]
pub enum QuantError {
    #[error("Unknown data type tag: {0}")]
    UnknownType(u32),

    #[error("Operation {op} not implemented for {dtype}")]
    NotImplemented { op: &'static str, dtype: DataType },

    #[error("Row length {n} is not a multiple of block size {block} for {dtype}")]
    Misaligned {
        n: usize,
        block: usize,
        dtype: DataType,
    },

    #[error("Empty rows are not supported for {dtype}")]
    EmptyRow { dtype: DataType },

    #[error("Buffer too small: need {needed} bytes, got {actual}")]
    BufferTooSmall { needed: usize, actual: usize },
}

impl QuantError {
    /// Returns true if the error means the dispatch table has no entry.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::UnknownType(_) | Self::NotImplemented { .. })
    }

    /// Returns true if the error describes a bad shape or buffer size.
    pub fn is_shape_error(&self) -> bool {
        matches!(
            self,
            Self::Misaligned { .. } | Self::EmptyRow { .. } | Self::BufferTooSmall { .. }
        )
    }
}
