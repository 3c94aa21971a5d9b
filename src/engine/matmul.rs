//! Reference matmul driver over the dispatch table.
//!
//! This is the narrow path an operator layer takes to multiply a quantized
//! weight matrix `W` (`nc` rows of `n` elements) by float activations
//! (`nr` rows of `n`), producing `out[r * nc + c] = dot(act[r], W[c]) + bias[c]`.
//!
//! Interleaved Q4_0 weights go through the blocked kernels: full 4-row
//! activation tiles use `gemm`, leftover rows use `gemv`. Every other type
//! quantizes each activation row to the weight's `vec_dot_type` and calls
//! `vec_dot` per output element. Single-threaded; callers that want
//! parallelism split the output columns across `QuantWeight`s.

use tracing::{debug, trace};

use super::blocks::{BlockQ8_0x4, QK8_0};
use super::buffer::BlockBuf;
use super::error::QuantError;
use super::gemm::{gemm_with, gemv_with};
use super::repack::quantize_mat_q8_0_raw;
use super::simd_matmul::{kernel_variant, KernelVariant};
use super::type_traits::{type_traits, TypeTraits};
use super::types::DataType;
use crate::config::KernelConfig;
use crate::telemetry::{MatmulSpan, SpanExt};

/// A weight matrix quantized into one of the table's formats.
#[derive(Debug, Clone)]
pub struct QuantWeight {
    dtype: DataType,
    rows: usize,
    cols: usize,
    data: BlockBuf,
}

fn f32_bytes(n: usize) -> usize {
    n * std::mem::size_of::<f32>()
}

/// Quantize one float row into `dst` using `traits`. F32 has no codec in
/// the table and is copied.
fn encode_row(traits: &TypeTraits, dtype: DataType, src: &[f32], dst: &mut [u8]) -> Result<(), QuantError> {
    if dtype == DataType::F32 {
        dst.copy_from_slice(bytemuck::cast_slice(src));
        return Ok(());
    }
    let from_float = traits.require_from_float()?;
    from_float(src, dst);
    Ok(())
}

impl QuantWeight {
    /// Quantize a row-major `rows x cols` float matrix.
    ///
    /// Fails if the type has no usable multiply path or the shape does not
    /// fit its block geometry.
    pub fn quantize(dtype: DataType, w: &[f32], rows: usize, cols: usize) -> Result<Self, QuantError> {
        let traits = type_traits(dtype);
        check_geometry(traits, dtype, rows, cols)?;
        if w.len() < rows * cols {
            return Err(QuantError::BufferTooSmall {
                needed: f32_bytes(rows * cols),
                actual: f32_bytes(w.len()),
            });
        }

        let row_bytes = traits.row_size(cols);
        let mut data = BlockBuf::zeroed(rows * row_bytes);

        if traits.is_interleaved() {
            let quantize_rows = traits.require_quantize_rows()?;
            let written = quantize_rows(&w[..rows * cols], data.as_bytes_mut(), rows, cols);
            debug_assert_eq!(written, data.len());
        } else {
            for (src, dst) in w
                .chunks_exact(cols)
                .zip(data.as_bytes_mut().chunks_exact_mut(row_bytes))
            {
                encode_row(traits, dtype, src, dst)?;
            }
        }

        debug!(dtype = %dtype, rows, cols, bytes = data.len(), "quantized weight");
        Ok(Self { dtype, rows, cols, data })
    }

    /// Wrap bytes that are already in `dtype`'s layout (for example read
    /// from a model file). The bytes are copied into aligned storage.
    pub fn from_bytes(dtype: DataType, bytes: &[u8], rows: usize, cols: usize) -> Result<Self, QuantError> {
        let traits = type_traits(dtype);
        check_geometry(traits, dtype, rows, cols)?;
        let needed = rows * traits.row_size(cols);
        if bytes.len() < needed {
            return Err(QuantError::BufferTooSmall { needed, actual: bytes.len() });
        }
        Ok(Self {
            dtype,
            rows,
            cols,
            data: BlockBuf::from_bytes(&bytes[..needed]),
        })
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    /// Output columns (weight rows).
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Inner dimension.
    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }
}

fn check_geometry(traits: &TypeTraits, dtype: DataType, rows: usize, cols: usize) -> Result<(), QuantError> {
    if cols == 0 {
        return Err(QuantError::EmptyRow { dtype });
    }
    if traits.is_interleaved() {
        traits.require_gemv()?;
        traits.require_gemm()?;
        if rows % traits.nrows_interleaved != 0 {
            return Err(QuantError::Misaligned {
                n: rows,
                block: traits.nrows_interleaved,
                dtype,
            });
        }
    } else {
        traits.require_vec_dot()?;
    }
    if traits.blck_size == 0 || cols % traits.blck_size != 0 {
        return Err(QuantError::Misaligned {
            n: cols,
            block: traits.blck_size,
            dtype,
        });
    }
    Ok(())
}

/// Matmul driver bound to one kernel variant.
#[derive(Debug, Clone, Copy)]
pub struct QuantMatmul {
    variant: KernelVariant,
}

impl Default for QuantMatmul {
    fn default() -> Self {
        Self::with_variant(kernel_variant())
    }
}

impl QuantMatmul {
    /// Driver honoring `force_scalar` from the configuration.
    pub fn new(config: &KernelConfig) -> Self {
        if config.force_scalar {
            Self::with_variant(KernelVariant::Scalar)
        } else {
            Self::default()
        }
    }

    pub fn with_variant(variant: KernelVariant) -> Self {
        Self { variant }
    }

    pub fn variant(&self) -> KernelVariant {
        self.variant
    }

    /// `out[r * nc + c] = dot(act[r], W[c]) (+ bias[c])` for `nr` rows.
    pub fn forward(
        &self,
        weight: &QuantWeight,
        act: &[f32],
        nr: usize,
        out: &mut [f32],
        bias: Option<&[f32]>,
    ) -> Result<(), QuantError> {
        let (n, nc) = (weight.cols, weight.rows);
        let span = MatmulSpan::new(weight.dtype.name(), self.variant.name(), nr, nc, n);
        let _guard = span.enter();

        let result = self.check_buffers(n, nc, act, nr, out, bias).and_then(|()| {
            let traits = type_traits(weight.dtype);
            if traits.is_interleaved() {
                span.record("path", "blocked");
                self.forward_blocked(traits, weight, act, nr, out, bias)
            } else {
                span.record("path", "vec_dot");
                self.forward_vec_dot(traits, weight, act, nr, out, bias)
            }
        });
        span.record_result(&result);
        result
    }

    fn check_buffers(
        &self,
        n: usize,
        nc: usize,
        act: &[f32],
        nr: usize,
        out: &[f32],
        bias: Option<&[f32]>,
    ) -> Result<(), QuantError> {
        let checks = [
            (act.len(), nr * n),
            (out.len(), nr * nc),
            (bias.map_or(nc, <[f32]>::len), nc),
        ];
        for (actual, needed) in checks {
            if actual < needed {
                return Err(QuantError::BufferTooSmall {
                    needed: f32_bytes(needed),
                    actual: f32_bytes(actual),
                });
            }
        }
        Ok(())
    }

    fn forward_blocked(
        &self,
        traits: &TypeTraits,
        weight: &QuantWeight,
        act: &[f32],
        nr: usize,
        out: &mut [f32],
        bias: Option<&[f32]>,
    ) -> Result<(), QuantError> {
        let (n, nc, dtype) = (weight.cols, weight.rows, weight.dtype);
        let nb = n / QK8_0;
        let tiled = nr / 4 * 4;

        if tiled > 0 {
            let mut tiles = BlockBuf::zeroed(tiled / 4 * nb * std::mem::size_of::<BlockQ8_0x4>());
            quantize_mat_q8_0_raw(
                &act[..tiled * n],
                tiles.as_bytes_mut(),
                tiled,
                n,
                traits.blck_size_interleave,
            );
            trace!(rows = tiled, "gemm over activation tiles");
            gemm_with(
                self.variant,
                dtype,
                n,
                &mut out[..tiled * nc],
                nc,
                weight.as_bytes(),
                tiles.as_bytes(),
                tiled,
                nc,
                bias,
            )?;
        }

        if tiled < nr {
            let q8 = type_traits(DataType::Q8_0);
            let mut row = BlockBuf::zeroed(q8.row_size(n));
            for r in tiled..nr {
                encode_row(q8, DataType::Q8_0, &act[r * n..(r + 1) * n], row.as_bytes_mut())?;
                trace!(row = r, "gemv over leftover row");
                gemv_with(
                    self.variant,
                    dtype,
                    n,
                    &mut out[r * nc..(r + 1) * nc],
                    weight.as_bytes(),
                    row.as_bytes(),
                    nc,
                    bias,
                )?;
            }
        }
        Ok(())
    }

    fn forward_vec_dot(
        &self,
        traits: &TypeTraits,
        weight: &QuantWeight,
        act: &[f32],
        nr: usize,
        out: &mut [f32],
        bias: Option<&[f32]>,
    ) -> Result<(), QuantError> {
        let (n, nc) = (weight.cols, weight.rows);
        let vec_dot = traits.require_vec_dot()?;
        let act_type = traits.vec_dot_type;
        let act_traits = type_traits(act_type);
        if act_traits.blck_size == 0 || n % act_traits.blck_size != 0 {
            return Err(QuantError::Misaligned {
                n,
                block: act_traits.blck_size,
                dtype: act_type,
            });
        }

        let w_row = traits.row_size(n);
        let mut row = BlockBuf::zeroed(act_traits.row_size(n));
        debug!(act_type = %act_type, rows = nr, "vec_dot path");

        for r in 0..nr {
            encode_row(act_traits, act_type, &act[r * n..(r + 1) * n], row.as_bytes_mut())?;
            let dst = &mut out[r * nc..(r + 1) * nc];
            for (c, (y, w)) in dst
                .iter_mut()
                .zip(weight.as_bytes().chunks_exact(w_row))
                .enumerate()
            {
                let dot = vec_dot(n, w, row.as_bytes());
                *y = match bias {
                    Some(b) => dot + b[c],
                    None => dot,
                };
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: usize, cols: usize, seed: usize) -> Vec<f32> {
        (0..rows * cols)
            .map(|i| (((i + seed).wrapping_mul(2654435761) % 1000) as f32 - 500.0) / 400.0)
            .collect()
    }

    #[test]
    fn f32_weights_are_exact() {
        let w = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let weight = QuantWeight::quantize(DataType::F32, &w, 2, 3).unwrap();
        let act = vec![1.0, 0.0, -1.0];
        let mut out = vec![0f32; 2];
        QuantMatmul::with_variant(KernelVariant::Scalar)
            .forward(&weight, &act, 1, &mut out, Some(&[0.5, -0.5]))
            .unwrap();
        assert_eq!(out, vec![-1.5, -2.5]);
    }

    #[test]
    fn blocked_path_handles_leftover_rows() {
        let (nc, n, nr) = (8, 64, 6);
        let weight = QuantWeight::quantize(DataType::Q4_0_4_4, &matrix(nc, n, 1), nc, n).unwrap();
        let act = matrix(nr, n, 7);
        let mut out = vec![0f32; nr * nc];
        QuantMatmul::with_variant(KernelVariant::Scalar)
            .forward(&weight, &act, nr, &mut out, None)
            .unwrap();

        // rows 4 and 5 go through gemv; compare with a single-row call
        let mut single = vec![0f32; nc];
        QuantMatmul::with_variant(KernelVariant::Scalar)
            .forward(&weight, &act[5 * n..], 1, &mut single, None)
            .unwrap();
        assert_eq!(&out[5 * nc..], &single[..]);
    }

    #[test]
    fn rejects_short_output() {
        let weight = QuantWeight::quantize(DataType::Q8_0, &matrix(2, 32, 0), 2, 32).unwrap();
        let mut out = vec![0f32; 1];
        let err = QuantMatmul::default()
            .forward(&weight, &matrix(1, 32, 3), 1, &mut out, None)
            .unwrap_err();
        assert!(err.is_shape_error());
    }

    #[test]
    fn rejects_types_without_multiply() {
        let err = QuantWeight::quantize(DataType::Q8K, &[0.0; 256], 1, 256).unwrap_err();
        assert!(err.is_unsupported());
        let err = QuantWeight::quantize(DataType::Q4_0_8_8, &[0.0; 4 * 32], 4, 32).unwrap_err();
        assert!(err.is_shape_error());
    }
}
