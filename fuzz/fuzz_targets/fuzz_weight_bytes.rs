//! Fuzz target for `QuantWeight::from_bytes` and `QuantMatmul::forward`.
//!
//! Arbitrary tags, shapes and payloads must either be rejected with an
//! error or multiplied without panicking.

#![no_main]

use arbitrary::Arbitrary;
use gg_quant::engine::{DataType, KernelVariant, QuantMatmul, QuantWeight};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    tag: u8,
    rows: u8,
    blocks: u8,
    nr: u8,
    scalar: bool,
    with_bias: bool,
    payload: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let Ok(dtype) = DataType::try_from(input.tag as u32) else {
        return;
    };
    let rows = input.rows as usize % 17;
    let cols = (input.blocks as usize % 4) * 256;
    let nr = input.nr as usize % 9;

    let Ok(weight) = QuantWeight::from_bytes(dtype, &input.payload, rows, cols) else {
        return;
    };

    let act: Vec<f32> = (0..nr * cols).map(|i| (i % 7) as f32 - 3.0).collect();
    let bias = vec![0.25f32; rows];
    let mut out = vec![0f32; nr * rows];
    let driver = if input.scalar {
        QuantMatmul::with_variant(KernelVariant::Scalar)
    } else {
        QuantMatmul::default()
    };
    let _ = driver.forward(
        &weight,
        &act,
        nr,
        &mut out,
        input.with_bias.then_some(bias.as_slice()),
    );
});
