//! GPU-class backend over the CUDA driver API.

use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cudarc::driver::sys;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::artifact::{self, GpuMetadata, GPU_BINARY_EXTS};
use crate::error::{
    ArchMismatchSnafu, DriverLoadSnafu, KernelLaunchSnafu, ResourceLimitExceededSnafu, Result,
};
use crate::layout::ArgSlot;
use crate::policy::{BackendPolicy, BlockDims, GridDims};

/// Static shared memory threshold above which the opt-in carve-out is used.
const SHARED_OPTIN_THRESHOLD: u32 = 48 * 1024;

/// Loaded module plus its metadata, cached per `(dir, entry)`.
struct ModuleData {
    #[allow(dead_code)]
    module: sys::CUmodule,
    function: sys::CUfunction,
    metadata: GpuMetadata,
}

// SAFETY: CUmodule/CUfunction are opaque driver tokens; the driver API is
// thread-safe and the cache mutex serializes all mutation.
unsafe impl Send for ModuleData {}

static MODULE_CACHE: Lazy<Mutex<HashMap<(PathBuf, String), ModuleData>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Resolved kernel symbol in a loaded module.
#[derive(Debug, Clone, Copy)]
pub struct CudaKernelHandle(sys::CUfunction);

// SAFETY: a CUfunction is an immutable driver token once resolved; launches
// through it are serialized by the driver.
unsafe impl Send for CudaKernelHandle {}
unsafe impl Sync for CudaKernelHandle {}

fn error_string(code: sys::CUresult) -> String {
    let mut msg: *const c_char = std::ptr::null();
    // SAFETY: cuGetErrorString only writes the out pointer.
    unsafe {
        if sys::cuGetErrorString(code, &mut msg) == sys::CUresult::CUDA_SUCCESS && !msg.is_null() {
            return CStr::from_ptr(msg).to_string_lossy().into_owned();
        }
    }
    format!("CUDA error {}", code as i32)
}

fn check_load(code: sys::CUresult, what: &str) -> Result<()> {
    if code == sys::CUresult::CUDA_SUCCESS {
        Ok(())
    } else {
        DriverLoadSnafu { reason: format!("{what}: {}", error_string(code)) }.fail()
    }
}

fn current_device() -> Result<sys::CUdevice> {
    let mut device: sys::CUdevice = 0;
    check_load(unsafe { sys::cuCtxGetDevice(&mut device) }, "cuCtxGetDevice")?;
    Ok(device)
}

fn device_attribute(device: sys::CUdevice, attrib: sys::CUdevice_attribute) -> Result<c_int> {
    let mut value: c_int = 0;
    check_load(
        unsafe { sys::cuDeviceGetAttribute(&mut value, attrib, device) },
        "cuDeviceGetAttribute",
    )?;
    Ok(value)
}

fn path_cstring(path: &Path) -> Result<CString> {
    CString::new(path.to_string_lossy().into_owned()).map_err(|_| {
        DriverLoadSnafu { reason: format!("path contains NUL: {}", path.display()) }.build()
    })
}

/// Configure shared memory for a resolved kernel.
///
/// Artifacts requesting more than 48 KiB must opt in to the device's extended
/// carve-out; the dynamic limit is whatever the opt-in maximum leaves after
/// the kernel's static usage.
fn configure_shared_memory(
    function: sys::CUfunction,
    device: sys::CUdevice,
    required: u32,
) -> Result<()> {
    let optin = device_attribute(
        device,
        sys::CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_SHARED_MEMORY_PER_BLOCK_OPTIN,
    )? as u32;

    if required > optin {
        return ResourceLimitExceededSnafu { requested: required, limit: optin }.fail();
    }

    if required > SHARED_OPTIN_THRESHOLD && optin > SHARED_OPTIN_THRESHOLD {
        debug!(shared.required = required, shared.optin = optin, "configuring large shared memory");

        check_load(
            unsafe {
                sys::cuFuncSetCacheConfig(function, sys::CUfunc_cache::CU_FUNC_CACHE_PREFER_SHARED)
            },
            "cuFuncSetCacheConfig",
        )?;

        let mut static_shared: c_int = 0;
        check_load(
            unsafe {
                sys::cuFuncGetAttribute(
                    &mut static_shared,
                    sys::CUfunction_attribute::CU_FUNC_ATTRIBUTE_SHARED_SIZE_BYTES,
                    function,
                )
            },
            "cuFuncGetAttribute",
        )?;

        check_load(
            unsafe {
                sys::cuFuncSetAttribute(
                    function,
                    sys::CUfunction_attribute::CU_FUNC_ATTRIBUTE_MAX_DYNAMIC_SHARED_SIZE_BYTES,
                    optin as c_int - static_shared,
                )
            },
            "cuFuncSetAttribute",
        )?;
    }

    Ok(())
}

/// Backend policy for CUDA devices.
pub struct CudaBackend;

impl BackendPolicy for CudaBackend {
    type Stream = sys::CUstream;
    type Context = sys::CUcontext;
    type KernelHandle = CudaKernelHandle;

    const WARP_SIZE: u32 = 32;

    fn backend_name() -> &'static str {
        "cuda"
    }

    fn ensure_context() -> Result<()> {
        check_load(unsafe { sys::cuInit(0) }, "cuInit")?;

        let mut ctx: sys::CUcontext = std::ptr::null_mut();
        let result = unsafe { sys::cuCtxGetCurrent(&mut ctx) };
        if result == sys::CUresult::CUDA_SUCCESS && !ctx.is_null() {
            return Ok(());
        }

        // Hosts embedding a tensor framework normally arrive with a pinned
        // context; standalone callers get a default one on device 0.
        warn!("no CUDA context current, creating default context on device 0");
        let mut device: sys::CUdevice = 0;
        check_load(unsafe { sys::cuDeviceGet(&mut device, 0) }, "cuDeviceGet")?;
        check_load(unsafe { sys::cuCtxCreate_v2(&mut ctx, 0, device) }, "cuCtxCreate")
    }

    fn current_device_index() -> Result<i32> {
        Ok(current_device()? as i32)
    }

    fn load_artifact(dir: &Path, entry: &str) -> Result<Self::KernelHandle> {
        let key = (dir.to_path_buf(), entry.to_string());
        let mut cache = MODULE_CACHE.lock();
        if let Some(data) = cache.get(&key) {
            return Ok(CudaKernelHandle(data.function));
        }

        let metadata = GpuMetadata::load(dir, entry)?;
        debug!(
            kernel.entry = %entry,
            kernel.arch = metadata.target.arch,
            kernel.shared = metadata.shared,
            "loading kernel"
        );

        let device = current_device()?;
        let major = device_attribute(
            device,
            sys::CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR,
        )?;
        let minor = device_attribute(
            device,
            sys::CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR,
        )?;
        let device_arch = (major * 10 + minor) as u32;
        if device_arch != metadata.target.arch {
            return ArchMismatchSnafu { expected: metadata.target.arch, actual: device_arch }
                .fail();
        }

        let binary = artifact::locate_binary(dir, entry, GPU_BINARY_EXTS)?;
        debug!(kernel.binary = %binary.display(), "loading cubin");

        let binary_c = path_cstring(&binary)?;
        let mut module: sys::CUmodule = std::ptr::null_mut();
        check_load(unsafe { sys::cuModuleLoad(&mut module, binary_c.as_ptr()) }, "cuModuleLoad")?;

        let entry_c = CString::new(entry).map_err(|_| {
            DriverLoadSnafu { reason: format!("entry name contains NUL: {entry}") }.build()
        })?;
        let mut function: sys::CUfunction = std::ptr::null_mut();
        check_load(
            unsafe { sys::cuModuleGetFunction(&mut function, module, entry_c.as_ptr()) },
            "cuModuleGetFunction",
        )?;

        configure_shared_memory(function, device, metadata.shared)?;

        cache.insert(key, ModuleData { module, function, metadata });
        Ok(CudaKernelHandle(function))
    }

    fn shared_memory(dir: &Path, entry: &str) -> u32 {
        let key = (dir.to_path_buf(), entry.to_string());
        if let Some(data) = MODULE_CACHE.lock().get(&key) {
            return data.metadata.shared;
        }
        GpuMetadata::load(dir, entry).map(|m| m.shared).unwrap_or(0)
    }

    fn arg_layout(_dir: &Path, _entry: &str) -> Option<Arc<[ArgSlot]>> {
        None
    }

    unsafe fn launch(
        stream: Self::Stream,
        kernel: Self::KernelHandle,
        grid: GridDims,
        block: BlockDims,
        args: &[*mut c_void],
        shared_bytes: u32,
        _signature: &str,
        _arg_layout: Option<&[ArgSlot]>,
    ) -> Result<()> {
        debug!(
            launch.grid = ?(grid.x, grid.y, grid.z),
            launch.block = ?(block.x, block.y, block.z),
            launch.shared = shared_bytes,
            "cuLaunchKernel"
        );

        let result = sys::cuLaunchKernel(
            kernel.0,
            grid.x,
            grid.y,
            grid.z,
            block.x,
            block.y,
            block.z,
            shared_bytes,
            stream,
            args.as_ptr() as *mut *mut c_void,
            std::ptr::null_mut(),
        );

        if result == sys::CUresult::CUDA_SUCCESS {
            Ok(())
        } else {
            KernelLaunchSnafu { reason: error_string(result) }.fail()
        }
    }
}
