
/// Element types understood by the tile compiler.
///
/// The discriminants and the token spellings returned by [`DType::token`]
/// are shared with the compiler's caching convention; both are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::EnumCount, strum::EnumIter, strum::VariantArray, strum::FromRepr)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DType {
    Bool = 0,

    Int8 = 1,
    Int16 = 2,
    Int32 = 3,
    Int64 = 4,

    UInt8 = 5,
    UInt16 = 6,
    UInt32 = 7,
    UInt64 = 8,

    Float16 = 9,
    BFloat16 = 10,
    Float32 = 11,
    Float64 = 12,
}

impl DType {
    pub const fn bytes(&self) -> usize {
        match self {
            Self::Bool => 1,
            Self::Int8 => 1,
            Self::Int16 => 2,
            Self::Int32 => 4,
            Self::Int64 => 8,
            Self::UInt8 => 1,
            Self::UInt16 => 2,
            Self::UInt32 => 4,
            Self::UInt64 => 8,
            Self::Float16 => 2,
            Self::BFloat16 => 2,
            Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    /// Natural alignment of one element. Equal to the size for every type in
    /// the canonical set.
    pub const fn alignment(&self) -> usize {
        self.bytes()
    }

    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool)
    }

    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub const fn is_unsigned(&self) -> bool {
        matches!(self, Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float16 | Self::BFloat16 | Self::Float32 | Self::Float64)
    }

    /// Canonical signature-token spelling.
    ///
    /// This is the only spelling that may appear in a dynamic signature;
    /// aliases accepted by [`DType::parse_token`] never escape this crate.
    pub const fn token(&self) -> &'static str {
        match self {
            Self::Bool => "i1",
            Self::Int8 => "i8",
            Self::Int16 => "i16",
            Self::Int32 => "i32",
            Self::Int64 => "i64",
            Self::UInt8 => "u8",
            Self::UInt16 => "u16",
            Self::UInt32 => "u32",
            Self::UInt64 => "u64",
            Self::Float16 => "fp16",
            Self::BFloat16 => "bf16",
            Self::Float32 => "fp32",
            Self::Float64 => "fp64",
        }
    }

    /// Parse a token spelling, tolerating the historical `f16`/`f32`/`f64`
    /// aliases next to the canonical `fp*` forms.
    pub fn parse_token(s: &str) -> Option<Self> {
        let dtype = match s {
            "i1" | "bool" => Self::Bool,
            "i8" => Self::Int8,
            "i16" => Self::Int16,
            "i32" => Self::Int32,
            "i64" => Self::Int64,
            "u8" => Self::UInt8,
            "u16" => Self::UInt16,
            "u32" => Self::UInt32,
            "u64" => Self::UInt64,
            "fp16" | "f16" => Self::Float16,
            "bf16" => Self::BFloat16,
            "fp32" | "f32" => Self::Float32,
            "fp64" | "f64" => Self::Float64,
            _ => return None,
        };
        Some(dtype)
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.token())
    }
}
