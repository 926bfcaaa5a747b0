//! Runtime proxy for one compiled specialization.

use std::ffi::c_void;
use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use snafu::ResultExt;
use tilebind_backend::{BackendPolicy, BlockDims, GridDims};

use crate::error::{BackendSnafu, Result};

/// One compiled specialization on disk.
///
/// Construction is cheap: the artifact stays on disk until the first launch
/// registers it with the backend. The `Unloaded → Loaded` transition is
/// one-way and happens at most once; a failed load leaves the handle
/// unloaded so the next launch retries.
pub struct Kernel<B: BackendPolicy> {
    dir: PathBuf,
    entry: String,
    handle: OnceCell<B::KernelHandle>,
}

impl<B: BackendPolicy> std::fmt::Debug for Kernel<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("dir", &self.dir)
            .field("entry", &self.entry)
            .field("handle", &self.handle.get().map(|_| "<loaded>"))
            .finish()
    }
}

impl<B: BackendPolicy> Kernel<B> {
    pub fn new(dir: PathBuf, entry: String) -> Self {
        Self { dir, entry, handle: OnceCell::new() }
    }

    /// Artifact directory backing this kernel.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn is_loaded(&self) -> bool {
        self.handle.get().is_some()
    }

    fn handle(&self) -> Result<B::KernelHandle> {
        self.handle
            .get_or_try_init(|| B::load_artifact(&self.dir, &self.entry))
            .map(|h| *h)
            .context(BackendSnafu)
    }

    /// Launch this specialization on `stream`.
    ///
    /// Block dimensions are `(num_warps * WARP_SIZE, 1, 1)`; shared-memory
    /// size and the optional argument layout come from the backend's cached
    /// artifact metadata. `signature` lets packed-buffer backends recover
    /// slot types when the artifact declares no layout.
    ///
    /// # Safety
    ///
    /// `args` must satisfy the contract of [`BackendPolicy::launch`].
    pub unsafe fn launch(
        &self,
        grid: GridDims,
        num_warps: u32,
        stream: B::Stream,
        args: &[*mut c_void],
        signature: &str,
    ) -> Result<()> {
        let handle = self.handle()?;

        let block = BlockDims::new(num_warps * B::WARP_SIZE, 1, 1);
        let shared_bytes = B::shared_memory(&self.dir, &self.entry);
        let layout = B::arg_layout(&self.dir, &self.entry);

        B::launch(stream, handle, grid, block, args, shared_bytes, signature, layout.as_deref())
            .context(BackendSnafu)
    }
}
