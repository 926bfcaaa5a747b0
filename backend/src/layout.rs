//! Machine types of packed launch-record slots.

use tilebind_dtype::DType;
use tracing::warn;

/// Machine type of one runtime argument in a packed launch record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSlot {
    Pointer,
    I32,
    I64,
    F32,
    F64,
}

impl ArgSlot {
    pub const fn size(&self) -> usize {
        match self {
            Self::Pointer => std::mem::size_of::<*const ()>(),
            Self::I32 => 4,
            Self::I64 => 8,
            Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    pub const fn align(&self) -> usize {
        self.size()
    }

    /// Parse a metadata `arg_layout` type string.
    ///
    /// Recognized spellings: `ptr`/`pointer`, `i32`/`u32`, `i64`/`u64`,
    /// `f32`/`fp32`, `f64`/`fp64`. `constexpr` entries are the caller's to
    /// skip; anything else is unknown.
    pub fn parse(kind: &str) -> Option<Self> {
        let slot = match kind {
            "ptr" | "pointer" => Self::Pointer,
            "i32" | "u32" => Self::I32,
            "i64" | "u64" => Self::I64,
            "f32" | "fp32" => Self::F32,
            "f64" | "fp64" => Self::F64,
            _ => return None,
        };
        Some(slot)
    }
}

/// Recover the runtime-argument layout from a dynamic-signature string.
///
/// Used when an artifact's metadata carries no `arg_layout`. One slot is
/// produced per token that has a payload entry:
///
/// - `*…` tokens are pointers;
/// - `i32`/`u32` and `i64`/`u64` keep their width, `fp32`/`fp64` stay float,
///   `fp16`/`bf16` scalars are promoted to `fp32`;
/// - numeric literals and `nullopt` are constexpr and have no slot;
/// - an integer token specialized on value 1 (`:1` suffix) was elided from
///   the payload and has no slot either;
/// - other specialization suffixes (`:16`, `:i32`) are stripped before
///   classification.
pub fn layout_from_signature(signature: &str) -> Vec<ArgSlot> {
    let mut layout = Vec::new();

    for raw in signature.split(',') {
        let token = raw.trim();
        if token.is_empty() || token == "nullopt" {
            continue;
        }

        // Constexpr values appear as printed literals.
        let mut chars = token.chars();
        let first = chars.next().unwrap_or('\0');
        if first.is_ascii_digit() || (first == '-' && chars.next().is_some_and(|c| c.is_ascii_digit())) {
            continue;
        }

        let (base, suffix) = match token.split_once(':') {
            Some((base, suffix)) => (base, Some(suffix)),
            None => (token, None),
        };

        if first != '*' && suffix == Some("1") {
            // Value-1 specialized integers never reach the payload.
            continue;
        }

        let slot = if first == '*' {
            ArgSlot::Pointer
        } else {
            match DType::parse_token(base) {
                Some(DType::Int64 | DType::UInt64) => ArgSlot::I64,
                Some(DType::Int32 | DType::UInt32) => ArgSlot::I32,
                Some(DType::Float64) => ArgSlot::F64,
                // Half-precision scalars are promoted to fp32 on the wire.
                Some(DType::Float32 | DType::Float16 | DType::BFloat16) => ArgSlot::F32,
                _ => {
                    warn!(token = %token, "unknown type in signature, defaulting to i64");
                    ArgSlot::I64
                }
            }
        };
        layout.push(slot);
    }

    layout
}
