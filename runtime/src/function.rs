//! JIT entry points and their process-wide registry.

use std::collections::HashMap;
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use snafu::ResultExt;
use tilebind_backend::{BackendPolicy, GridDims};
use tracing::debug;

use crate::bridge::{CompileRequest, CompilerBridge};
use crate::classify::classify_args;
use crate::error::{BackendSnafu, Result};
use crate::kernel::Kernel;
use crate::signature::StaticSignature;
use crate::KernelArg;

type OverloadKey = (String, i32);

/// One JIT-compiled entry point: a named kernel in a tile-language source
/// file, plus every specialization compiled for it so far.
///
/// The overload cache maps `(dynamic signature, device index)` to a
/// [`Kernel`]. Each slot is an `Arc<OnceCell>` installed under the map lock;
/// compilation runs inside the cell with the map lock released, so
/// concurrent misses on one key compile at most once while misses on
/// distinct keys compile in parallel. A failed compile leaves the slot
/// empty for a later retry.
pub struct JitFunction<B: BackendPolicy> {
    path: PathBuf,
    name: String,
    static_sig: StaticSignature,
    bridge: Arc<dyn CompilerBridge>,
    overloads: Mutex<HashMap<OverloadKey, Arc<OnceCell<Arc<Kernel<B>>>>>>,
}

impl<B: BackendPolicy> JitFunction<B> {
    /// Introspect the entry point through the bridge and build its static
    /// signature. Normally reached through a [`FunctionRegistry`].
    pub fn new(path: PathBuf, name: String, bridge: Arc<dyn CompilerBridge>) -> Result<Self> {
        let classes = bridge.extract_static_signature(&path, &name)?;
        debug!(
            function.path = %path.display(),
            function.name = %name,
            function.num_args = classes.len(),
            "extracted static signature"
        );
        Ok(Self {
            path,
            name,
            static_sig: StaticSignature::new(classes),
            bridge,
            overloads: Mutex::new(HashMap::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn static_sig(&self) -> &StaticSignature {
        &self.static_sig
    }

    /// Classify `args`, then compile (or look up) and launch the matching
    /// specialization on `stream`.
    ///
    /// # Safety
    ///
    /// Tensor addresses in `args` must stay valid until the device completes
    /// the launch.
    pub unsafe fn launch(
        &self,
        stream: B::Stream,
        grid: GridDims,
        num_warps: u32,
        num_stages: u32,
        args: &[KernelArg],
    ) -> Result<()> {
        let (mut payload, tokens) = classify_args(&self.static_sig, args)?;
        let signature = tokens.join(",");

        B::ensure_context().context(BackendSnafu)?;
        let device_index = B::current_device_index().context(BackendSnafu)?;

        let kernel = self.kernel(&signature, num_warps, num_stages, device_index)?;

        let ptrs = payload.arg_ptrs();
        kernel.launch(grid, num_warps, stream, &ptrs, &signature)
    }

    /// Low-level bypass for callers that already hold a dynamic signature
    /// and a raw slot array. Shares the overload cache and compile path
    /// with [`JitFunction::launch`].
    ///
    /// # Safety
    ///
    /// `args` must satisfy the contract of [`BackendPolicy::launch`] for the
    /// specialization named by `signature`.
    pub unsafe fn launch_prepared(
        &self,
        stream: B::Stream,
        grid: GridDims,
        num_warps: u32,
        num_stages: u32,
        signature: &str,
        args: &[*mut c_void],
    ) -> Result<()> {
        B::ensure_context().context(BackendSnafu)?;
        let device_index = B::current_device_index().context(BackendSnafu)?;

        let kernel = self.kernel(signature, num_warps, num_stages, device_index)?;
        kernel.launch(grid, num_warps, stream, args, signature)
    }

    /// Get or compile the specialization for `(signature, device_index)`.
    pub fn kernel(
        &self,
        signature: &str,
        num_warps: u32,
        num_stages: u32,
        device_index: i32,
    ) -> Result<Arc<Kernel<B>>> {
        let cell = {
            let mut overloads = self.overloads.lock();
            overloads.entry((signature.to_string(), device_index)).or_default().clone()
        };

        let kernel = cell.get_or_try_init(|| {
            debug!(
                function.name = %self.name,
                kernel.signature = %signature,
                kernel.device = device_index,
                "compiling specialization"
            );
            let request = CompileRequest {
                path: &self.path,
                name: &self.name,
                signature,
                num_warps,
                num_stages,
                device_index,
            };
            let dir = self.bridge.compile(&request)?;
            Ok(Arc::new(Kernel::new(dir, self.name.clone())))
        })?;

        Ok(Arc::clone(kernel))
    }
}

/// Process-scoped table of JIT entry points, keyed by `(source path, entry
/// name)`. Creation is serialized so the bridge introspects each entry
/// point exactly once; installed entries are stable for the process
/// lifetime.
pub struct FunctionRegistry<B: BackendPolicy> {
    functions: RwLock<HashMap<String, Arc<JitFunction<B>>>>,
    bridge: Arc<dyn CompilerBridge>,
}

impl<B: BackendPolicy> FunctionRegistry<B> {
    pub fn new(bridge: Arc<dyn CompilerBridge>) -> Self {
        Self { functions: RwLock::new(HashMap::new()), bridge }
    }

    /// Get or create the entry point for `(path, name)`.
    pub fn get(&self, path: impl AsRef<Path>, name: &str) -> Result<Arc<JitFunction<B>>> {
        let path = path.as_ref();
        let key = format!("{}:{name}", path.display());

        if let Some(function) = self.functions.read().get(&key) {
            return Ok(Arc::clone(function));
        }

        let mut functions = self.functions.write();
        if let Some(function) = functions.get(&key) {
            return Ok(Arc::clone(function));
        }

        let function = Arc::new(JitFunction::new(
            path.to_path_buf(),
            name.to_string(),
            Arc::clone(&self.bridge),
        )?);
        functions.insert(key, Arc::clone(&function));
        Ok(function)
    }
}

/// Global registry for the build-time default backend, wired to the tile
/// compiler CLI.
#[cfg(any(feature = "cuda", feature = "npu"))]
pub fn registry() -> &'static FunctionRegistry<tilebind_backend::DefaultBackend> {
    use once_cell::sync::Lazy;

    use crate::bridge::ProcessBridge;

    static REGISTRY: Lazy<FunctionRegistry<tilebind_backend::DefaultBackend>> =
        Lazy::new(|| FunctionRegistry::new(Arc::new(ProcessBridge::default())));
    &REGISTRY
}
