//! The open argument model accepted by the classifier.
//!
//! Callers hand the runtime a flat pack of [`KernelArg`] values: tensor
//! handles, typed scalars, generic scalar boxes, or absent optionals. The
//! static signature decides how each one is classified; nothing here carries
//! ownership of device memory.

use std::ffi::c_void;

use tilebind_dtype::DType;

/// Capability interface for tensor-shaped caller types.
pub trait TensorLike {
    fn dtype(&self) -> DType;
    fn data_ptr(&self) -> *mut c_void;
}

/// A tensor argument reduced to what the launch path needs: a device address
/// and an element type.
#[derive(Debug, Clone, Copy)]
pub struct TensorArg {
    ptr: *mut c_void,
    dtype: DType,
}

// SAFETY: TensorArg is an address-value pair; it never dereferences the
// address itself. Dereferencing happens on the device after launch.
unsafe impl Send for TensorArg {}
unsafe impl Sync for TensorArg {}

impl TensorArg {
    pub fn new(ptr: *mut c_void, dtype: DType) -> Self {
        Self { ptr, dtype }
    }

    pub fn from_tensor<T: TensorLike>(tensor: &T) -> Self {
        Self { ptr: tensor.data_ptr(), dtype: tensor.dtype() }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn data_ptr(&self) -> *mut c_void {
        self.ptr
    }

    pub fn address(&self) -> usize {
        self.ptr as usize
    }
}

impl TensorLike for TensorArg {
    fn dtype(&self) -> DType {
        self.dtype
    }

    fn data_ptr(&self) -> *mut c_void {
        self.ptr
    }
}

/// Generic numeric box, for callers whose scalars are dynamically typed.
///
/// Symbolic values cannot be marshalled and are rejected by the classifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Symbolic,
}

/// One runtime argument.
#[derive(Debug, Clone, Copy)]
pub enum KernelArg {
    Tensor(TensorArg),

    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),

    /// A generic scalar box, unwrapped by the classifier.
    Scalar(Scalar),

    /// An optional parameter the caller did not supply.
    Absent,
}

macro_rules! impl_from_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for KernelArg {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

impl_from_scalar! {
    i8 => I8, i16 => I16, i32 => I32, i64 => I64,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
    f32 => F32, f64 => F64, bool => Bool,
}

impl From<TensorArg> for KernelArg {
    fn from(value: TensorArg) -> Self {
        Self::Tensor(value)
    }
}

impl From<Scalar> for KernelArg {
    fn from(value: Scalar) -> Self {
        Self::Scalar(value)
    }
}

impl<T: Into<KernelArg>> From<Option<T>> for KernelArg {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => Self::Absent,
        }
    }
}

/// Build an argument pack from heterogeneous values.
///
/// ```
/// use tilebind_runtime::kargs;
/// let n: i64 = 131072;
/// let args = kargs![n, 1024i64, Option::<i64>::None];
/// assert_eq!(args.len(), 3);
/// ```
#[macro_export]
macro_rules! kargs {
    ($($arg:expr),* $(,)?) => {{
        let args: $crate::smallvec::SmallVec<[$crate::args::KernelArg; 8]> =
            $crate::smallvec::smallvec![$($crate::args::KernelArg::from($arg)),*];
        args
    }};
}
