//! Span utilities and extension traits for GG-QUANT tracing.
//!
//! Provides standardized span creation and result recording.

use tracing::{debug_span, Span};

/// Extension trait for adding context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for matmul driver spans.
pub struct MatmulSpan;

impl MatmulSpan {
    /// Create a span for one `forward` call.
    ///
    /// Fields included:
    /// - `dtype`: weight type name
    /// - `kernel`: kernel variant name
    /// - `nr`, `nc`, `n`: activation rows, output columns, inner dimension
    /// - `path`: `blocked` or `vec_dot`, filled in once chosen
    /// - `status`, `error.message`: filled in by `SpanExt::record_result`
    pub fn new(dtype: &str, kernel: &str, nr: usize, nc: usize, n: usize) -> Span {
        debug_span!(
            "quant_matmul",
            dtype = %dtype,
            kernel = %kernel,
            nr = nr,
            nc = nc,
            n = n,
            path = tracing::field::Empty,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
        )
    }
}
