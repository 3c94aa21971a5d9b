//! GG-QUANT
//!
//! Block-quantized tensor kernels: the wire formats, float conversion,
//! dot products, interleaved Q4_0 packing and blocked GEMV/GEMM, reached
//! through a static type-trait dispatch table.
//!
//! # Layers
//!
//! - **Formats**: `#[repr(C)]` block records shared with model-file loaders
//! - **Kernels**: pure, allocation-free routines over caller-owned buffers
//! - **Dispatch**: `type_traits(tag)` yields size, block size and kernels
//! - **Driver**: `QuantMatmul` multiplies a `QuantWeight` by f32 activations
//!
//! Shape violations are programming errors and panic. Missing table
//! entries surface as `None`, or as `QuantError::NotImplemented` through
//! the `require_*` helpers.

pub mod config;
pub mod engine;
pub mod telemetry;

pub use config::{ConfigError, EffectiveConfig, KernelConfig};
pub use engine::{
    type_traits, type_traits_raw, DataType, KernelVariant, QuantError, QuantMatmul, QuantWeight,
    TypeTraits,
};
pub use telemetry::{LogError, LogFormat};

use tracing::info;

/// Set up logging from `config`, probe the CPU, and report the kernel
/// variant the driver will use.
pub fn init(config: &KernelConfig) -> Result<KernelVariant, LogError> {
    telemetry::init_logging(&config.log_config())?;
    engine::init_simd();

    let variant = QuantMatmul::new(config).variant();
    info!(
        kernel = variant.name(),
        detected = engine::kernel_variant().name(),
        force_scalar = config.force_scalar,
        "gg-quant initialized"
    );
    Ok(variant)
}
