//! Data type tags.
//!
//! The numeric values are part of the on-disk format shared with the model
//! loader and must never be renumbered.

use std::fmt;

use super::error::QuantError;

/// Number of slots in the dispatch table (one past the highest tag).
pub const TYPE_COUNT: usize = 34;

/// Tensor element / block encoding tag.
#[allow(non_camel_case_types)]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    F32 = 0,
    F16 = 1,
    Q4_0 = 2,
    Q4_1 = 3,
    Q8_0 = 8,
    Q8_1 = 9,
    Q8PerTensor = 10,
    Q4K = 12,
    Q6K = 14,
    Q8K = 15,
    I8 = 16,
    I16 = 17,
    I32 = 18,
    Q4_0_4_4 = 19,
    Q4_0_4_8 = 20,
    Q4_0_8_8 = 21,
    Q8_0_4_4 = 22,
    Q3K = 23,
    Q2K = 24,
    Q1K = 25,
    IQ2XXS = 26,
    IQ2XS = 27,
    IQ1S = 28,
    IQ1M = 29,
    IQ2S = 30,
    KleidiAiQ4_0 = 31,
    Q8_0F = 32,
    Q2_0 = 33,
}

impl DataType {
    /// Every tag, in ascending numeric order.
    pub const ALL: [DataType; 28] = [
        Self::F32,
        Self::F16,
        Self::Q4_0,
        Self::Q4_1,
        Self::Q8_0,
        Self::Q8_1,
        Self::Q8PerTensor,
        Self::Q4K,
        Self::Q6K,
        Self::Q8K,
        Self::I8,
        Self::I16,
        Self::I32,
        Self::Q4_0_4_4,
        Self::Q4_0_4_8,
        Self::Q4_0_8_8,
        Self::Q8_0_4_4,
        Self::Q3K,
        Self::Q2K,
        Self::Q1K,
        Self::IQ2XXS,
        Self::IQ2XS,
        Self::IQ1S,
        Self::IQ1M,
        Self::IQ2S,
        Self::KleidiAiQ4_0,
        Self::Q8_0F,
        Self::Q2_0,
    ];

    /// Numeric tag.
    pub fn tag(self) -> u32 {
        self as u32
    }

    /// Canonical lowercase name, as written in model manifests.
    pub fn name(self) -> &'static str {
        match self {
            Self::F32 => "f32",
            Self::F16 => "f16",
            Self::Q4_0 => "q4_0",
            Self::Q4_1 => "q4_1",
            Self::Q8_0 => "q8_0",
            Self::Q8_1 => "q8_1",
            Self::Q8PerTensor => "q8_per_tensor",
            Self::Q4K => "q4_k",
            Self::Q6K => "q6_k",
            Self::Q8K => "q8_k",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::Q4_0_4_4 => "q4_0_4x4",
            Self::Q4_0_4_8 => "q4_0_4x8",
            Self::Q4_0_8_8 => "q4_0_8x8",
            Self::Q8_0_4_4 => "q8_0_4x4",
            Self::Q3K => "q3_k",
            Self::Q2K => "q2_k",
            Self::Q1K => "q1_k",
            Self::IQ2XXS => "iq2_xxs",
            Self::IQ2XS => "iq2_xs",
            Self::IQ1S => "iq1_s",
            Self::IQ1M => "iq1_m",
            Self::IQ2S => "iq2_s",
            Self::KleidiAiQ4_0 => "kleidiai_q4_0",
            Self::Q8_0F => "q8_0f",
            Self::Q2_0 => "q2_0",
        }
    }

    /// True for the block-quantized encodings (anything that is not a plain
    /// scalar element type).
    pub fn is_quantized(self) -> bool {
        !matches!(
            self,
            Self::F32 | Self::F16 | Self::I8 | Self::I16 | Self::I32
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u32> for DataType {
    type Error = QuantError;

    fn try_from(tag: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .iter()
            .copied()
            .find(|ty| ty.tag() == tag)
            .ok_or(QuantError::UnknownType(tag))
    }
}

impl std::str::FromStr for DataType {
    type Err = QuantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|ty| ty.name() == lower)
            .ok_or(QuantError::UnknownType(u32::MAX))
    }
}
