//! Fuzz target for block decoding.
//!
//! Any byte pattern is a valid block of every format, so dequantizing,
//! accumulating and dotting arbitrary bytes must never panic.

#![no_main]

use gg_quant::engine::{type_traits, BlockBuf, DataType};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let buf = BlockBuf::from_bytes(data);

    for dtype in DataType::ALL {
        let traits = type_traits(dtype);
        let Some(to_float) = traits.to_float else { continue };
        let nb = data.len() / traits.size;
        if nb == 0 {
            continue;
        }
        let n = nb * traits.blck_size;
        let src = &buf.as_bytes()[..nb * traits.size];

        let mut out = vec![0f32; n];
        to_float(src, &mut out);

        if let Some(add_row_to) = traits.add_row_to {
            add_row_to(n, src, &mut out, 0.5);
        }

        if let Some(vec_dot) = traits.vec_dot {
            let act = type_traits(traits.vec_dot_type);
            if let Some(from_float) = act.from_float {
                let mut y = BlockBuf::zeroed(act.row_size(n));
                from_float(&vec![1.0; n], y.as_bytes_mut());
                let _ = vec_dot(n, src, y.as_bytes());
            }
        }
    }
});
