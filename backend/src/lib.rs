//! Vendor-driver backend policies for the tilebind kernel runtime.
//!
//! Each backend binds one driver family behind the [`BackendPolicy`]
//! contract: artifact loading with per-module caching, context and device
//! queries, and the family's kernel-launch ABI. The GPU-class backend passes
//! arguments as an array of typed slots; the NPU-class backend packs them
//! into a single contiguous record.

pub mod artifact;
pub mod error;
pub mod layout;
pub mod policy;
pub mod record;

#[cfg(feature = "cuda")]
pub mod cuda;

#[cfg(feature = "npu")]
pub mod npu;

#[cfg(feature = "mock")]
pub mod mock;


pub use error::{Error, Result};
pub use layout::ArgSlot;
pub use policy::{BackendPolicy, BlockDims, GridDims};

#[cfg(feature = "cuda")]
pub use cuda::CudaBackend;

#[cfg(feature = "npu")]
pub use npu::NpuBackend;

#[cfg(feature = "mock")]
pub use mock::MockBackend;

/// Backend selected at build time.
///
/// The default favors the GPU-class policy when both families are enabled,
/// mirroring the build-system selection of the driver ABI.
#[cfg(feature = "cuda")]
pub type DefaultBackend = CudaBackend;

#[cfg(all(feature = "npu", not(feature = "cuda")))]
pub type DefaultBackend = NpuBackend;
