//! Argument classification and dynamic-signature construction.
//!
//! The classifier walks the argument pack and the static signature in
//! lock-step, emitting one token per source argument and copying runtime
//! values into the launch payload. The token string is the compiler's cache
//! key: two packs that classify to the same tokens must reach the same
//! compiled artifact.

use smallvec::SmallVec;

use crate::args::{KernelArg, Scalar, TensorArg};
use crate::error::{Result, SignatureMismatchSnafu, UnsupportedArgumentSnafu};
use crate::payload::ParameterBuffer;
use crate::signature::{ArgClass, StaticSignature};

/// Signature tokens of one call, in argument order.
pub type SignatureTokens = SmallVec<[String; 12]>;

/// Classify `args` against `ssig`, producing the launch payload and the
/// dynamic-signature tokens.
pub fn classify_args(
    ssig: &StaticSignature,
    args: &[KernelArg],
) -> Result<(ParameterBuffer, SignatureTokens)> {
    let mut classifier = Classifier {
        ssig,
        buf: ParameterBuffer::with_capacity(ssig.num_args()),
        tokens: SignatureTokens::new(),
        idx: 0,
    };
    for arg in args {
        classifier.handle_arg(arg)?;
    }
    classifier.buf.append_global_scratch();
    Ok((classifier.buf, classifier.tokens))
}

struct Classifier<'a> {
    ssig: &'a StaticSignature,
    buf: ParameterBuffer,
    tokens: SignatureTokens,
    idx: usize,
}

impl Classifier<'_> {
    fn handle_arg(&mut self, arg: &KernelArg) -> Result<()> {
        match *arg {
            KernelArg::Tensor(tensor) => self.tensor(tensor),

            KernelArg::I8(v) => self.integer(v, "i8", v as i128),
            KernelArg::I16(v) => self.integer(v, "i16", v as i128),
            KernelArg::I32(v) => self.integer(v, "i32", v as i128),
            KernelArg::I64(v) => self.integer(v, "i64", v as i128),
            KernelArg::U8(v) => self.integer(v, "u8", v as i128),
            KernelArg::U16(v) => self.integer(v, "u16", v as i128),
            KernelArg::U32(v) => self.integer(v, "u32", v as i128),
            KernelArg::U64(v) => self.integer(v, "u64", v as i128),
            KernelArg::Bool(v) => self.boolean(v),

            KernelArg::F32(v) => self.float(v, "fp32"),
            KernelArg::F64(v) => self.float(v, "fp64"),

            // The generic box is normalized to its underlying width first.
            KernelArg::Scalar(Scalar::Bool(v)) => self.boolean(v),
            KernelArg::Scalar(Scalar::Int(v)) => self.integer(v, "i64", v as i128),
            KernelArg::Scalar(Scalar::UInt(v)) => self.integer(v, "u64", v as i128),
            KernelArg::Scalar(Scalar::Float(v)) => self.float(v, "fp64"),
            KernelArg::Scalar(Scalar::Symbolic) => {
                UnsupportedArgumentSnafu { reason: "symbolic scalar" }.fail()
            }

            KernelArg::Absent => {
                // An absent optional is constexpr by convention, whatever its
                // declared class. It still occupies one signature slot.
                self.tokens.push("nullopt".to_string());
                self.idx += 1;
                Ok(())
            }
        }
    }

    fn class(&self) -> Result<ArgClass> {
        self.ssig.class_at(self.idx).ok_or_else(|| {
            SignatureMismatchSnafu {
                reason: format!(
                    "argument {} exceeds the {} declared parameters",
                    self.idx + 1,
                    self.ssig.num_args()
                ),
            }
            .build()
        })
    }

    fn tensor(&mut self, tensor: TensorArg) -> Result<()> {
        let class = self.class()?;
        if class == ArgClass::Constexpr {
            return SignatureMismatchSnafu {
                reason: format!("tensor argument {} classified constexpr", self.idx + 1),
            }
            .fail();
        }

        self.buf.push(tensor.data_ptr());
        let mut token = format!("*{}", tensor.dtype());
        if class == ArgClass::Specialized && tensor.address() % 16 == 0 {
            token.push_str(":16");
        }
        self.tokens.push(token);
        self.idx += 1;
        Ok(())
    }

    fn integer<T: Copy>(&mut self, value: T, token: &str, wide: i128) -> Result<()> {
        match self.class()? {
            ArgClass::Constexpr => self.tokens.push(wide.to_string()),
            ArgClass::Specialized => {
                if wide == 1 {
                    // The one case where an argument vanishes from the
                    // payload entirely.
                    self.tokens.push(format!("{token}:1"));
                } else if i32::try_from(wide).is_ok() {
                    self.buf.push(value);
                    self.tokens.push(format!("{token}:i32"));
                } else {
                    self.buf.push(value);
                    self.tokens.push(token.to_string());
                }
            }
            ArgClass::NonConstexpr => {
                self.buf.push(value);
                self.tokens.push(token.to_string());
            }
        }
        self.idx += 1;
        Ok(())
    }

    fn boolean(&mut self, value: bool) -> Result<()> {
        if self.class()? == ArgClass::Constexpr {
            self.tokens.push(value.to_string());
            self.idx += 1;
            return Ok(());
        }
        self.integer(value, "i1", value as i128)
    }

    fn float<T: Copy + std::fmt::Display>(&mut self, value: T, token: &str) -> Result<()> {
        match self.class()? {
            ArgClass::Constexpr => self.tokens.push(value.to_string()),
            ArgClass::Specialized | ArgClass::NonConstexpr => {
                self.buf.push(value);
                self.tokens.push(token.to_string());
            }
        }
        self.idx += 1;
        Ok(())
    }
}
