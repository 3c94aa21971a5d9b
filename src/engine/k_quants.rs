//! Super-block ("k-quant") formats: Q4_K, Q6_K, Q3_K, Q2_K.
//!
//! Each 256-element super-block carries one f16 scale (plus an f16 min scale
//! for the asymmetric formats) and small integer codes per sub-block. The
//! bit-packing of those codes is the wire format. Code selection is a plain
//! min-max search: every sub-block code is rounded up, so the encoded
//! sub-block step always covers the sub-block's range and round-trip error
//! stays within half an encoded step.

use half::f16;

use super::blocks::{BlockQ2K, BlockQ3K, BlockQ4K, BlockQ6K, BlockQ8K, QK_K};
use super::quantize::{check_add_row, check_row, AddRow, QuantBlock, VecDot};
use super::types::DataType;

/// Smallest f16 that is not below `x` (for finite, non-negative `x`).
fn f16_at_least(x: f32) -> f16 {
    let h = f16::from_f32(x);
    if h.to_f32() < x {
        f16::from_bits(h.to_bits() + 1)
    } else {
        h
    }
}

fn min_max(xs: &[f32]) -> (f32, f32) {
    xs.iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), &x| (lo.min(x), hi.max(x)))
}

/// Scale codes for a symmetric super-block.
///
/// Sub-block `j` needs a step of at least `need[j]`; the super-block scale is
/// `max(need) / code_max` rounded up to f16 and each code is rounded up.
fn encode_steps<const NSUB: usize>(need: &[f32; NSUB], code_max: u8) -> (f16, [u8; NSUB]) {
    let max_need = need.iter().fold(0f32, |m, &v| m.max(v));
    let d = f16_at_least(max_need / code_max as f32);
    let d_f = d.to_f32();
    let mut codes = [0u8; NSUB];
    if d_f > 0.0 {
        for (code, &v) in codes.iter_mut().zip(need.iter()) {
            *code = ((v / d_f).ceil() as u32).min(code_max as u32) as u8;
        }
    }
    (d, codes)
}

/// Scale and min codes for an asymmetric super-block where values decode as
/// `d * sc * q - dmin * m` with `q` in `0..=qmax`.
struct AsymmetricCodes<const NSUB: usize> {
    d: f16,
    dmin: f16,
    sc: [u8; NSUB],
    m: [u8; NSUB],
}

fn encode_asymmetric<const NSUB: usize>(
    xs: &[f32],
    qmax: u8,
    code_max: u8,
) -> AsymmetricCodes<NSUB> {
    let sub = xs.len() / NSUB;
    let mut offset = [0f32; NSUB];
    let mut top = [0f32; NSUB];
    for (j, chunk) in xs.chunks_exact(sub).enumerate() {
        let (lo, hi) = min_max(chunk);
        offset[j] = (-lo).max(0.0);
        top[j] = hi;
    }

    let (dmin, m) = encode_steps(&offset, code_max);
    let dmin_f = dmin.to_f32();

    let mut need = [0f32; NSUB];
    for j in 0..NSUB {
        let shift = dmin_f * m[j] as f32;
        need[j] = ((top[j] + shift) / qmax as f32).max(0.0);
    }
    let (d, sc) = encode_steps(&need, code_max);
    AsymmetricCodes { d, dmin, sc, m }
}

fn quantize_asymmetric(x: f32, step: f32, shift: f32, qmax: u8) -> u8 {
    if step == 0.0 {
        return 0;
    }
    ((x + shift) / step).round().clamp(0.0, qmax as f32) as u8
}

fn quantize_signed(x: f32, step: f32, qmin: i32, qmax: i32) -> i32 {
    if step == 0.0 {
        return 0;
    }
    ((x / step).round() as i32).clamp(qmin, qmax)
}

/// Step needed for a signed sub-block with codes in `qmin..=qmax`.
fn signed_need(chunk: &[f32], qmin: i32, qmax: i32) -> f32 {
    let (lo, hi) = min_max(chunk);
    (hi / qmax as f32).max(lo / qmin as f32).max(0.0)
}

// ============================================================================
// Q4_K
// ============================================================================

/// Unpack the 6-bit scale and min of sub-block `j` from a Q4_K header.
pub fn get_scale_min_k4(j: usize, q: &[u8]) -> (u8, u8) {
    if j < 4 {
        (q[j] & 63, q[j + 4] & 63)
    } else {
        let d = (q[j + 4] & 0xF) | ((q[j - 4] >> 6) << 4);
        let m = (q[j + 4] >> 4) | ((q[j] >> 6) << 4);
        (d, m)
    }
}

fn pack_scale_min_k4(sc: &[u8; 8], m: &[u8; 8]) -> [u8; 12] {
    let mut out = [0u8; 12];
    for j in 0..8 {
        if j < 4 {
            out[j] = sc[j];
            out[j + 4] = m[j];
        } else {
            out[j + 4] = (sc[j] & 0xF) | ((m[j] & 0xF) << 4);
            out[j - 4] |= (sc[j] >> 4) << 6;
            out[j] |= (m[j] >> 4) << 6;
        }
    }
    out
}

/// Codes of one Q4_K block, element order.
fn unpack_q4k(x: &BlockQ4K) -> [u8; QK_K] {
    let mut out = [0u8; QK_K];
    for (c, q) in x.qs.chunks_exact(32).enumerate() {
        for (l, &byte) in q.iter().enumerate() {
            out[64 * c + l] = byte & 0xF;
            out[64 * c + 32 + l] = byte >> 4;
        }
    }
    out
}

impl QuantBlock for BlockQ4K {
    const DTYPE: DataType = DataType::Q4K;
    const BLCK_SIZE: usize = QK_K;

    fn to_float(xs: &[Self], ys: &mut [f32]) {
        let nb = check_row::<Self>("dequantize_row", ys.len(), xs.len());
        for (x, out) in xs[..nb].iter().zip(ys.chunks_exact_mut(QK_K)) {
            let d = x.d.to_f32();
            let min = x.dmin.to_f32();
            let codes = unpack_q4k(x);
            for (j, (o, q)) in out.chunks_exact_mut(32).zip(codes.chunks_exact(32)).enumerate() {
                let (sc, m) = get_scale_min_k4(j, &x.scales);
                let d1 = d * sc as f32;
                let m1 = min * m as f32;
                for (y, &q) in o.iter_mut().zip(q.iter()) {
                    *y = d1 * q as f32 - m1;
                }
            }
        }
    }

    fn from_float(xs: &[f32], ys: &mut [Self]) {
        let nb = check_row::<Self>("quantize_row", xs.len(), ys.len());
        for (x, y) in xs.chunks_exact(QK_K).zip(ys[..nb].iter_mut()) {
            let codes = encode_asymmetric::<8>(x, 15, 63);
            let d = codes.d.to_f32();
            let min = codes.dmin.to_f32();

            let mut l = [0u8; QK_K];
            for (j, (chunk, out)) in x.chunks_exact(32).zip(l.chunks_exact_mut(32)).enumerate() {
                let step = d * codes.sc[j] as f32;
                let shift = min * codes.m[j] as f32;
                for (q, &v) in out.iter_mut().zip(chunk.iter()) {
                    *q = quantize_asymmetric(v, step, shift, 15);
                }
            }

            y.d = codes.d;
            y.dmin = codes.dmin;
            y.scales = pack_scale_min_k4(&codes.sc, &codes.m);
            for c in 0..4 {
                for i in 0..32 {
                    y.qs[32 * c + i] = l[64 * c + i] | (l[64 * c + 32 + i] << 4);
                }
            }
        }
    }
}

impl VecDot for BlockQ4K {
    type Rhs = BlockQ8K;

    fn vec_dot(n: usize, xs: &[Self], ys: &[Self::Rhs]) -> f32 {
        let nb = check_row::<Self>("vec_dot", n, xs.len().min(ys.len()));
        let mut sumf = 0f32;
        for (x, y) in xs[..nb].iter().zip(ys.iter()) {
            let codes = unpack_q4k(x);
            let mut sumi = 0i32;
            let mut summ = 0i32;
            for j in 0..8 {
                let (sc, m) = get_scale_min_k4(j, &x.scales);
                let dot: i32 = codes[32 * j..32 * j + 32]
                    .iter()
                    .zip(y.qs[32 * j..32 * j + 32].iter())
                    .map(|(&q, &a)| q as i32 * a as i32)
                    .sum();
                sumi += sc as i32 * dot;
                summ += m as i32 * (y.bsums[2 * j] as i32 + y.bsums[2 * j + 1] as i32);
            }
            sumf += x.d.to_f32() * y.d * sumi as f32 - x.dmin.to_f32() * y.d * summ as f32;
        }
        sumf
    }
}

impl AddRow for BlockQ4K {
    fn add_row_to(n: usize, xs: &[Self], ys: &mut [f32], alpha: f32) {
        let nb = check_add_row::<Self>(n, xs.len(), ys.len());
        for (x, out) in xs[..nb].iter().zip(ys.chunks_exact_mut(QK_K)) {
            let d = x.d.to_f32();
            let min = x.dmin.to_f32();
            let codes = unpack_q4k(x);
            for (j, (o, q)) in out.chunks_exact_mut(32).zip(codes.chunks_exact(32)).enumerate() {
                let (sc, m) = get_scale_min_k4(j, &x.scales);
                let d1 = d * sc as f32;
                let m1 = min * m as f32;
                for (y, &q) in o.iter_mut().zip(q.iter()) {
                    *y += (d1 * q as f32 - m1) * alpha;
                }
            }
        }
    }
}

// ============================================================================
// Q6_K
// ============================================================================

/// Signed codes (-32..=31) of one Q6_K block, element order.
fn unpack_q6k(x: &BlockQ6K) -> [i8; QK_K] {
    let mut out = [0i8; QK_K];
    for half in 0..2 {
        let ql = &x.ql[64 * half..];
        let qh = &x.qh[32 * half..];
        let o = &mut out[128 * half..];
        for l in 0..32 {
            o[l] = ((ql[l] & 0xF) | ((qh[l] & 3) << 4)) as i8 - 32;
            o[l + 32] = ((ql[l + 32] & 0xF) | (((qh[l] >> 2) & 3) << 4)) as i8 - 32;
            o[l + 64] = ((ql[l] >> 4) | (((qh[l] >> 4) & 3) << 4)) as i8 - 32;
            o[l + 96] = ((ql[l + 32] >> 4) | (((qh[l] >> 6) & 3) << 4)) as i8 - 32;
        }
    }
    out
}

impl QuantBlock for BlockQ6K {
    const DTYPE: DataType = DataType::Q6K;
    const BLCK_SIZE: usize = QK_K;

    fn to_float(xs: &[Self], ys: &mut [f32]) {
        let nb = check_row::<Self>("dequantize_row", ys.len(), xs.len());
        for (x, out) in xs[..nb].iter().zip(ys.chunks_exact_mut(QK_K)) {
            let d = x.d.to_f32();
            let codes = unpack_q6k(x);
            for (j, (o, q)) in out.chunks_exact_mut(16).zip(codes.chunks_exact(16)).enumerate() {
                let step = d * x.scales[j] as f32;
                for (y, &q) in o.iter_mut().zip(q.iter()) {
                    *y = step * q as f32;
                }
            }
        }
    }

    fn from_float(xs: &[f32], ys: &mut [Self]) {
        let nb = check_row::<Self>("quantize_row", xs.len(), ys.len());
        for (x, y) in xs.chunks_exact(QK_K).zip(ys[..nb].iter_mut()) {
            let mut need = [0f32; 16];
            for (v, chunk) in need.iter_mut().zip(x.chunks_exact(16)) {
                *v = signed_need(chunk, -32, 31);
            }
            let (d, sc) = encode_steps(&need, 127);
            let d_f = d.to_f32();

            let mut l = [0u8; QK_K];
            for (j, (chunk, out)) in x.chunks_exact(16).zip(l.chunks_exact_mut(16)).enumerate() {
                let step = d_f * sc[j] as f32;
                for (q, &v) in out.iter_mut().zip(chunk.iter()) {
                    *q = (quantize_signed(v, step, -32, 31) + 32) as u8;
                }
            }

            y.d = d;
            for (dst, &code) in y.scales.iter_mut().zip(sc.iter()) {
                *dst = code as i8;
            }
            for half in 0..2 {
                let l = &l[128 * half..];
                for i in 0..32 {
                    let q1 = l[i] & 0xF;
                    let q2 = l[i + 32] & 0xF;
                    let q3 = l[i + 64] & 0xF;
                    let q4 = l[i + 96] & 0xF;
                    y.ql[64 * half + i] = q1 | (q3 << 4);
                    y.ql[64 * half + i + 32] = q2 | (q4 << 4);
                    y.qh[32 * half + i] = (l[i] >> 4)
                        | ((l[i + 32] >> 4) << 2)
                        | ((l[i + 64] >> 4) << 4)
                        | ((l[i + 96] >> 4) << 6);
                }
            }
        }
    }
}

impl VecDot for BlockQ6K {
    type Rhs = BlockQ8K;

    fn vec_dot(n: usize, xs: &[Self], ys: &[Self::Rhs]) -> f32 {
        let nb = check_row::<Self>("vec_dot", n, xs.len().min(ys.len()));
        let mut sumf = 0f32;
        for (x, y) in xs[..nb].iter().zip(ys.iter()) {
            let codes = unpack_q6k(x);
            let mut sumi = 0i32;
            for (j, &sc) in x.scales.iter().enumerate() {
                let dot: i32 = codes[16 * j..16 * j + 16]
                    .iter()
                    .zip(y.qs[16 * j..16 * j + 16].iter())
                    .map(|(&q, &a)| q as i32 * a as i32)
                    .sum();
                sumi += sc as i32 * dot;
            }
            sumf += x.d.to_f32() * y.d * sumi as f32;
        }
        sumf
    }
}

impl AddRow for BlockQ6K {
    fn add_row_to(n: usize, xs: &[Self], ys: &mut [f32], alpha: f32) {
        let nb = check_add_row::<Self>(n, xs.len(), ys.len());
        for (x, out) in xs[..nb].iter().zip(ys.chunks_exact_mut(QK_K)) {
            let scale = x.d.to_f32() * alpha;
            let codes = unpack_q6k(x);
            for (j, (o, q)) in out.chunks_exact_mut(16).zip(codes.chunks_exact(16)).enumerate() {
                let sc = x.scales[j] as f32;
                for (y, &q) in o.iter_mut().zip(q.iter()) {
                    *y += scale * sc * q as f32;
                }
            }
        }
    }
}

// ============================================================================
// Q3_K
// ============================================================================

/// Unpack the sixteen signed 6-bit scales of a Q3_K header.
pub fn q3k_scales(scales: &[u8; 12]) -> [i8; 16] {
    let mut out = [0i8; 16];
    for (j, o) in out.iter_mut().enumerate() {
        let low = if j < 8 { scales[j] & 0xF } else { scales[j - 8] >> 4 };
        let high = (scales[8 + j % 4] >> (2 * (j / 4))) & 3;
        *o = (low | (high << 4)) as i8 - 32;
    }
    out
}

fn pack_q3k_scales(codes: &[i8; 16]) -> [u8; 12] {
    let mut out = [0u8; 12];
    for (j, &code) in codes.iter().enumerate() {
        let l = (code as i32 + 32) as u8;
        if j < 8 {
            out[j] = l & 0xF;
        } else {
            out[j - 8] |= (l & 0xF) << 4;
        }
        out[8 + j % 4] |= (l >> 4) << (2 * (j / 4));
    }
    out
}

/// Signed codes (-4..=3) of one Q3_K block, element order.
fn unpack_q3k(x: &BlockQ3K) -> [i8; QK_K] {
    let mut out = [0i8; QK_K];
    for (e, o) in out.iter_mut().enumerate() {
        let half = e / 128;
        let s = (e % 128) / 32;
        let l = e % 32;
        let low = (x.qs[32 * half + l] >> (2 * s)) & 3;
        let high = (x.hmask[l] >> (4 * half + s)) & 1;
        *o = (low | (high << 2)) as i8 - 4;
    }
    out
}

impl QuantBlock for BlockQ3K {
    const DTYPE: DataType = DataType::Q3K;
    const BLCK_SIZE: usize = QK_K;

    fn to_float(xs: &[Self], ys: &mut [f32]) {
        let nb = check_row::<Self>("dequantize_row", ys.len(), xs.len());
        for (x, out) in xs[..nb].iter().zip(ys.chunks_exact_mut(QK_K)) {
            let d = x.d.to_f32();
            let scales = q3k_scales(&x.scales);
            let codes = unpack_q3k(x);
            for (j, (o, q)) in out.chunks_exact_mut(16).zip(codes.chunks_exact(16)).enumerate() {
                let dl = d * scales[j] as f32;
                for (y, &q) in o.iter_mut().zip(q.iter()) {
                    *y = dl * q as f32;
                }
            }
        }
    }

    fn from_float(xs: &[f32], ys: &mut [Self]) {
        let nb = check_row::<Self>("quantize_row", xs.len(), ys.len());
        for (x, y) in xs.chunks_exact(QK_K).zip(ys[..nb].iter_mut()) {
            let mut need = [0f32; 16];
            for (v, chunk) in need.iter_mut().zip(x.chunks_exact(16)) {
                *v = signed_need(chunk, -4, 3);
            }
            let (d, sc) = encode_steps(&need, 31);
            let d_f = d.to_f32();

            let mut l = [0u8; QK_K];
            for (j, (chunk, out)) in x.chunks_exact(16).zip(l.chunks_exact_mut(16)).enumerate() {
                let step = d_f * sc[j] as f32;
                for (q, &v) in out.iter_mut().zip(chunk.iter()) {
                    *q = (quantize_signed(v, step, -4, 3) + 4) as u8;
                }
            }

            let mut codes = [0i8; 16];
            for (c, &s) in codes.iter_mut().zip(sc.iter()) {
                *c = s as i8;
            }
            y.d = d;
            y.scales = pack_q3k_scales(&codes);
            y.hmask = [0u8; QK_K / 8];
            y.qs = [0u8; QK_K / 4];
            for (e, &q) in l.iter().enumerate() {
                let half = e / 128;
                let s = (e % 128) / 32;
                let i = e % 32;
                y.qs[32 * half + i] |= (q & 3) << (2 * s);
                y.hmask[i] |= (q >> 2) << (4 * half + s);
            }
        }
    }
}

impl VecDot for BlockQ3K {
    type Rhs = BlockQ8K;

    fn vec_dot(n: usize, xs: &[Self], ys: &[Self::Rhs]) -> f32 {
        let nb = check_row::<Self>("vec_dot", n, xs.len().min(ys.len()));
        let mut sumf = 0f32;
        for (x, y) in xs[..nb].iter().zip(ys.iter()) {
            let scales = q3k_scales(&x.scales);
            let codes = unpack_q3k(x);
            let mut sumi = 0i32;
            for (j, &sc) in scales.iter().enumerate() {
                let dot: i32 = codes[16 * j..16 * j + 16]
                    .iter()
                    .zip(y.qs[16 * j..16 * j + 16].iter())
                    .map(|(&q, &a)| q as i32 * a as i32)
                    .sum();
                sumi += sc as i32 * dot;
            }
            sumf += x.d.to_f32() * y.d * sumi as f32;
        }
        sumf
    }
}

// ============================================================================
// Q2_K
// ============================================================================

/// Codes (0..=3) of one Q2_K block, element order.
fn unpack_q2k(x: &BlockQ2K) -> [u8; QK_K] {
    let mut out = [0u8; QK_K];
    for (e, o) in out.iter_mut().enumerate() {
        let half = e / 128;
        let s = (e % 128) / 32;
        let l = e % 32;
        *o = (x.qs[32 * half + l] >> (2 * s)) & 3;
    }
    out
}

impl QuantBlock for BlockQ2K {
    const DTYPE: DataType = DataType::Q2K;
    const BLCK_SIZE: usize = QK_K;

    fn to_float(xs: &[Self], ys: &mut [f32]) {
        let nb = check_row::<Self>("dequantize_row", ys.len(), xs.len());
        for (x, out) in xs[..nb].iter().zip(ys.chunks_exact_mut(QK_K)) {
            let d = x.d.to_f32();
            let min = x.dmin.to_f32();
            let codes = unpack_q2k(x);
            for (j, (o, q)) in out.chunks_exact_mut(16).zip(codes.chunks_exact(16)).enumerate() {
                let sc = x.scales[j];
                let dl = d * (sc & 0xF) as f32;
                let ml = min * (sc >> 4) as f32;
                for (y, &q) in o.iter_mut().zip(q.iter()) {
                    *y = dl * q as f32 - ml;
                }
            }
        }
    }

    fn from_float(xs: &[f32], ys: &mut [Self]) {
        let nb = check_row::<Self>("quantize_row", xs.len(), ys.len());
        for (x, y) in xs.chunks_exact(QK_K).zip(ys[..nb].iter_mut()) {
            let codes = encode_asymmetric::<16>(x, 3, 15);
            let d = codes.d.to_f32();
            let min = codes.dmin.to_f32();

            let mut l = [0u8; QK_K];
            for (j, (chunk, out)) in x.chunks_exact(16).zip(l.chunks_exact_mut(16)).enumerate() {
                let step = d * codes.sc[j] as f32;
                let shift = min * codes.m[j] as f32;
                for (q, &v) in out.iter_mut().zip(chunk.iter()) {
                    *q = quantize_asymmetric(v, step, shift, 3);
                }
            }

            y.d = codes.d;
            y.dmin = codes.dmin;
            for (j, s) in y.scales.iter_mut().enumerate() {
                *s = codes.sc[j] | (codes.m[j] << 4);
            }
            y.qs = [0u8; QK_K / 4];
            for (e, &q) in l.iter().enumerate() {
                let half = e / 128;
                let s = (e % 128) / 32;
                y.qs[32 * half + e % 32] |= q << (2 * s);
            }
        }
    }
}

impl VecDot for BlockQ2K {
    type Rhs = BlockQ8K;

    fn vec_dot(n: usize, xs: &[Self], ys: &[Self::Rhs]) -> f32 {
        let nb = check_row::<Self>("vec_dot", n, xs.len().min(ys.len()));
        let mut sumf = 0f32;
        for (x, y) in xs[..nb].iter().zip(ys.iter()) {
            let codes = unpack_q2k(x);
            let mut sumi = 0i32;
            let mut summ = 0i32;
            for (j, &sc) in x.scales.iter().enumerate() {
                let dot: i32 = codes[16 * j..16 * j + 16]
                    .iter()
                    .zip(y.qs[16 * j..16 * j + 16].iter())
                    .map(|(&q, &a)| q as i32 * a as i32)
                    .sum();
                sumi += (sc & 0xF) as i32 * dot;
                summ += (sc >> 4) as i32 * y.bsums[j] as i32;
            }
            sumf += x.d.to_f32() * y.d * sumi as f32 - x.dmin.to_f32() * y.d * summ as f32;
        }
        sumf
    }
}
