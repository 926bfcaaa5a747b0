//! JIT kernel dispatch runtime for tile-language kernels.
//!
//! Given a source file, an entry name, an argument pack and a launch
//! geometry, the runtime classifies the arguments against the entry point's
//! static signature, derives the dynamic signature that names the
//! specialization, compiles it through the external tile compiler on first
//! use, lazily registers the artifact with the selected backend, and
//! forwards the launch to the vendor driver on the caller's stream.

pub mod args;
pub mod bridge;
pub mod classify;
pub mod error;
pub mod function;
pub mod kernel;
pub mod payload;
pub mod signature;


pub use args::{KernelArg, Scalar, TensorArg, TensorLike};
pub use bridge::{CompileRequest, CompilerBridge, ProcessBridge};
pub use classify::classify_args;
pub use error::{Error, Result};
pub use function::{FunctionRegistry, JitFunction};
pub use kernel::Kernel;
pub use payload::ParameterBuffer;
pub use signature::{ArgClass, StaticSignature};

#[cfg(any(feature = "cuda", feature = "npu"))]
pub use function::registry;

// Re-exported for the `kargs!` macro.
pub use smallvec;
