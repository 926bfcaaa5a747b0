//! Backend policy contract.
//!
//! A backend policy is a compile-time binding to one vendor driver family.
//! Policies are stateless: every operation is an associated function, and all
//! driver-side caching (loaded modules, function stubs, metadata) lives in
//! process-global registries owned by the policy.

use std::ffi::c_void;
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::layout::ArgSlot;

/// Launch grid dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridDims {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl GridDims {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Total number of blocks. NPU-class drivers take this instead of a
    /// three-dimensional grid.
    pub const fn block_count(&self) -> u32 {
        self.x * self.y * self.z
    }
}

/// Launch block dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDims {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl BlockDims {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }
}

/// Typed interface over one vendor driver.
///
/// Implementations multiplex two structurally different launch ABIs: the
/// GPU-class driver takes an array of pointers to typed argument slots, the
/// NPU-class driver takes one contiguous buffer packed from those slots. The
/// `signature` and `arg_layout` parameters of [`BackendPolicy::launch`] exist
/// for the latter and are ignored by array-of-pointers backends.
pub trait BackendPolicy {
    /// Vendor ordering primitive for asynchronous device work.
    type Stream: Copy;

    /// Vendor context handle.
    type Context;

    /// Opaque token for a loaded kernel.
    type KernelHandle: Copy + Send + Sync + 'static;

    /// Threads per warp. Block width is `num_warps * WARP_SIZE`.
    const WARP_SIZE: u32;

    /// Diagnostic tag for logs and error messages.
    fn backend_name() -> &'static str;

    /// Make sure a device context is current.
    ///
    /// A no-op when a host framework already pinned one; otherwise creates a
    /// default context. Idempotent.
    fn ensure_context() -> Result<()>;

    /// Index of the device owning the current context.
    fn current_device_index() -> Result<i32>;

    /// Load a compiled artifact and resolve its kernel symbol.
    ///
    /// Memoized per `(dir, entry)` under the backend's module-cache mutex:
    /// concurrent callers trigger at most one driver load, and repeated calls
    /// return the cached handle.
    fn load_artifact(dir: &Path, entry: &str) -> Result<Self::KernelHandle>;

    /// Static shared memory (bytes) required by a loaded artifact.
    fn shared_memory(dir: &Path, entry: &str) -> u32;

    /// The artifact's runtime-argument layout, when its metadata declares one.
    ///
    /// Array-of-pointers backends have no use for a layout and return `None`.
    fn arg_layout(dir: &Path, entry: &str) -> Option<Arc<[ArgSlot]>>;

    /// Dispatch a kernel on `stream`.
    ///
    /// `args` holds one pointer per runtime argument slot (plus the trailing
    /// global-scratch slot). Packed-buffer backends derive each slot's
    /// machine type from `arg_layout`, falling back to parsing `signature`.
    ///
    /// # Safety
    ///
    /// Every pointer in `args` must point to a live, correctly typed
    /// argument value, and the tensor addresses those values contain must
    /// stay valid until the device completes the launch.
    unsafe fn launch(
        stream: Self::Stream,
        kernel: Self::KernelHandle,
        grid: GridDims,
        block: BlockDims,
        args: &[*mut c_void],
        shared_bytes: u32,
        signature: &str,
        arg_layout: Option<&[ArgSlot]>,
    ) -> Result<()>;
}
