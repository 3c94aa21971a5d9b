//! Telemetry module for GG-QUANT.
//!
//! Structured logging setup and span helpers for the matmul driver. Kernels
//! themselves do not log.

mod logging;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat, DEFAULT_FILTER};
pub use spans::{MatmulSpan, SpanExt};
