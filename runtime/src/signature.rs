//! Static signatures extracted by the tile compiler.

/// Classification assigned by the compiler to each formal parameter.
///
/// The discriminants are the compiler's wire tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(strum::FromRepr)]
#[repr(i8)]
pub enum ArgClass {
    /// Passed at runtime as-is.
    NonConstexpr = 0,
    /// Participates in specialization: value-1 integers and 16-byte pointer
    /// alignment become signature markers.
    Specialized = 1,
    /// Baked into the compiled artifact; appears in the signature only.
    Constexpr = 2,
}

impl ArgClass {
    /// Decode a compiler wire tag.
    pub fn from_tag(tag: i64) -> Option<Self> {
        i8::try_from(tag).ok().and_then(Self::from_repr)
    }
}

/// Per-entry-point parameter classification, created once from the
/// compiler's introspection and immutable thereafter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticSignature {
    num_args: usize,
    classes: Vec<ArgClass>,
}

impl StaticSignature {
    pub fn new(classes: Vec<ArgClass>) -> Self {
        Self { num_args: classes.len(), classes }
    }

    pub fn num_args(&self) -> usize {
        self.num_args
    }

    pub fn class_at(&self, index: usize) -> Option<ArgClass> {
        self.classes.get(index).copied()
    }

    pub fn classes(&self) -> &[ArgClass] {
        &self.classes
    }
}
