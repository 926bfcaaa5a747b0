//! NPU-class backend over the vendor runtime driver.

pub mod driver;

use std::collections::HashMap;
use std::ffi::{c_int, c_void, CString};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::artifact::{self, NpuMetadata, NPU_BINARY_EXTS};
use crate::error::{DriverLoadSnafu, KernelLaunchSnafu, Result};
use crate::layout::{self, ArgSlot};
use crate::policy::{BackendPolicy, BlockDims, GridDims};

use crate::record::ArgBuffer;
use self::driver::{NpuDriver, RtDevBinary, ACL_SUCCESS, RT_ERROR_NONE};

/// Device-selection variable honored when no context is current.
pub const DEVICE_ID_ENV: &str = "NPU_DEVICE_ID";

struct ModuleData {
    #[allow(dead_code)]
    bin_handle: *mut c_void,
    fn_handle: *const c_void,
    metadata: NpuMetadata,
    slots: Option<Arc<[ArgSlot]>>,
}

// SAFETY: the handles are opaque driver tokens; all cache mutation happens
// under the cache mutex.
unsafe impl Send for ModuleData {}

static MODULE_CACHE: Lazy<Mutex<HashMap<(PathBuf, String), ModuleData>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Stub-name and stub-storage registry.
///
/// The driver retains pointers into the stub storage and the stub-name
/// strings, so both live here for the rest of the process.
#[derive(Default)]
struct StubRegistry {
    counters: HashMap<String, u64>,
    names: Vec<CString>,
    stubs: Vec<Box<u64>>,
}

static STUBS: Lazy<Mutex<StubRegistry>> = Lazy::new(|| Mutex::new(StubRegistry::default()));

/// Registered function stub of a loaded NPU kernel.
#[derive(Debug, Clone, Copy)]
pub struct NpuKernelHandle(*const c_void);

// SAFETY: the stub address is stable for the process lifetime and the driver
// serializes launches through it.
unsafe impl Send for NpuKernelHandle {}
unsafe impl Sync for NpuKernelHandle {}

fn device_from_env() -> c_int {
    match std::env::var(DEVICE_ID_ENV) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(value = %raw, "unparseable {DEVICE_ID_ENV}, using device 0");
            0
        }),
        Err(_) => 0,
    }
}

/// Backend policy for NPU devices.
pub struct NpuBackend;

impl NpuBackend {
    /// Flavor and layout metadata of a loaded artifact, if cached.
    pub fn cached_metadata(dir: &Path, entry: &str) -> Option<NpuMetadata> {
        let key = (dir.to_path_buf(), entry.to_string());
        MODULE_CACHE.lock().get(&key).map(|data| data.metadata.clone())
    }
}

impl BackendPolicy for NpuBackend {
    type Stream = *mut c_void;
    type Context = *mut c_void;
    type KernelHandle = NpuKernelHandle;

    // The NPU has no warp concept; blocks map one-to-one onto grid entries.
    const WARP_SIZE: u32 = 1;

    fn backend_name() -> &'static str {
        "npu"
    }

    fn ensure_context() -> Result<()> {
        let driver = NpuDriver::get()?;

        let mut ctx: *mut c_void = std::ptr::null_mut();
        // SAFETY: driver calls with out-pointers to local storage.
        unsafe {
            if (driver.aclrt_get_current_context)(&mut ctx) == ACL_SUCCESS && !ctx.is_null() {
                return Ok(());
            }

            let device_id = device_from_env();
            warn!(device = device_id, "no NPU context found, creating default context");

            let err = (driver.aclrt_set_device)(device_id);
            if err != ACL_SUCCESS {
                return DriverLoadSnafu { reason: format!("aclrtSetDevice failed: {err}") }.fail();
            }
            let err = (driver.aclrt_create_context)(&mut ctx, device_id);
            if err != ACL_SUCCESS {
                return DriverLoadSnafu { reason: format!("aclrtCreateContext failed: {err}") }
                    .fail();
            }
            let err = (driver.aclrt_set_current_context)(ctx);
            if err != ACL_SUCCESS {
                return DriverLoadSnafu { reason: format!("aclrtSetCurrentContext failed: {err}") }
                    .fail();
            }
        }
        Ok(())
    }

    fn current_device_index() -> Result<i32> {
        let driver = NpuDriver::get()?;
        let mut device_id: c_int = -1;
        // SAFETY: out-pointer to local storage.
        let err = unsafe { (driver.aclrt_get_device)(&mut device_id) };
        if err != ACL_SUCCESS {
            return DriverLoadSnafu { reason: format!("aclrtGetDevice failed: {err}") }.fail();
        }
        Ok(device_id)
    }

    fn load_artifact(dir: &Path, entry: &str) -> Result<Self::KernelHandle> {
        let key = (dir.to_path_buf(), entry.to_string());
        let mut cache = MODULE_CACHE.lock();
        if let Some(data) = cache.get(&key) {
            return Ok(NpuKernelHandle(data.fn_handle));
        }

        let metadata = NpuMetadata::load(dir, entry)?;
        debug!(
            kernel.entry = %entry,
            kernel.mix_mode = %metadata.mix_mode,
            kernel.shared = metadata.shared,
            "loading kernel"
        );

        let binary_path = artifact::locate_binary(dir, entry, NPU_BINARY_EXTS)?;
        let image = artifact::read_binary(&binary_path)?;
        debug!(kernel.binary = %binary_path.display(), kernel.size = image.len(), "registering binary");

        let driver = NpuDriver::get()?;

        // SAFETY: driver calls; `image`, the stub box and the name strings
        // outlive the registration (the latter two for the whole process).
        unsafe {
            let mut device_id: c_int = -1;
            if (driver.aclrt_get_device)(&mut device_id) != ACL_SUCCESS {
                device_id = 0;
            }
            let err = (driver.rt_set_device)(device_id);
            if err != RT_ERROR_NONE {
                return DriverLoadSnafu {
                    reason: format!("rtSetDevice failed for device {device_id}: {err}"),
                }
                .fail();
            }

            let magic = if metadata.is_vector_only() {
                driver::RT_DEV_BINARY_MAGIC_ELF_AIVEC
            } else {
                driver::RT_DEV_BINARY_MAGIC_ELF
            };
            let binary = RtDevBinary {
                magic,
                version: 0,
                data: image.as_ptr() as *const c_void,
                length: image.len() as u64,
            };

            let mut bin_handle: *mut c_void = std::ptr::null_mut();
            let err = (driver.rt_dev_binary_register)(&binary, &mut bin_handle);
            if err != RT_ERROR_NONE {
                return DriverLoadSnafu { reason: format!("rtDevBinaryRegister failed: {err}") }
                    .fail();
            }

            let mut stubs = STUBS.lock();
            let counter = stubs.counters.entry(entry.to_string()).or_insert(0);
            let stub_name = CString::new(format!("{entry}_{counter}")).map_err(|_| {
                DriverLoadSnafu { reason: format!("entry name contains NUL: {entry}") }.build()
            })?;
            *counter += 1;
            let entry_name = CString::new(entry).map_err(|_| {
                DriverLoadSnafu { reason: format!("entry name contains NUL: {entry}") }.build()
            })?;

            let mut stub = Box::new(0u64);
            let stub_ptr = (&mut *stub) as *mut u64 as *mut c_void;

            let err = (driver.rt_function_register)(
                bin_handle,
                stub_ptr,
                stub_name.as_ptr(),
                entry_name.as_ptr() as *const c_void,
                0,
            );
            if err != RT_ERROR_NONE {
                return DriverLoadSnafu { reason: format!("rtFunctionRegister failed: {err}") }
                    .fail();
            }

            stubs.names.push(stub_name);
            stubs.names.push(entry_name);
            stubs.stubs.push(stub);

            let slots = metadata.arg_slots().map(Arc::from);
            cache.insert(key, ModuleData { bin_handle, fn_handle: stub_ptr, metadata, slots });
            Ok(NpuKernelHandle(stub_ptr))
        }
    }

    fn shared_memory(dir: &Path, entry: &str) -> u32 {
        let key = (dir.to_path_buf(), entry.to_string());
        if let Some(data) = MODULE_CACHE.lock().get(&key) {
            return data.metadata.shared;
        }
        NpuMetadata::load(dir, entry).map(|m| m.shared).unwrap_or(0)
    }

    fn arg_layout(dir: &Path, entry: &str) -> Option<Arc<[ArgSlot]>> {
        let key = (dir.to_path_buf(), entry.to_string());
        if let Some(data) = MODULE_CACHE.lock().get(&key) {
            return data.slots.clone();
        }
        NpuMetadata::load(dir, entry).ok()?.arg_slots().map(Arc::from)
    }

    unsafe fn launch(
        stream: Self::Stream,
        kernel: Self::KernelHandle,
        grid: GridDims,
        _block: BlockDims,
        args: &[*mut c_void],
        _shared_bytes: u32,
        signature: &str,
        arg_layout: Option<&[ArgSlot]>,
    ) -> Result<()> {
        let driver = NpuDriver::get()?;

        let parsed;
        let slots: &[ArgSlot] = match arg_layout {
            Some(slots) if !slots.is_empty() => slots,
            _ if !signature.is_empty() => {
                parsed = layout::layout_from_signature(signature);
                &parsed
            }
            _ => {
                return KernelLaunchSnafu {
                    reason: "no signature or arg_layout to derive the launch record from",
                }
                .fail();
            }
        };
        if args.len() < slots.len() {
            return KernelLaunchSnafu {
                reason: format!("launch record wants {} args, got {}", slots.len(), args.len()),
            }
            .fail();
        }

        let mut ffts_addr: u64 = 0;
        let mut ffts_len: u32 = 0;
        let err = (driver.rt_get_c2c_ctrl_addr)(&mut ffts_addr, &mut ffts_len);
        if err != RT_ERROR_NONE {
            return KernelLaunchSnafu { reason: format!("rtGetC2cCtrlAddr failed: {err}") }.fail();
        }

        let mut record = ArgBuffer::new(slots.len() * 8 + 16);
        record.set_system_args(ffts_addr);
        for (slot_ptr, slot) in args.iter().zip(slots) {
            if !slot_ptr.is_null() {
                record.push_slot(*slot_ptr, *slot);
            }
        }
        record.set_grid(grid);

        let block_count = grid.block_count();
        debug!(
            launch.blocks = block_count,
            launch.record_bytes = record.len(),
            launch.grid = ?(grid.x, grid.y, grid.z),
            "rtKernelLaunch"
        );

        let err = (driver.rt_kernel_launch)(
            kernel.0,
            block_count,
            record.as_mut_ptr(),
            record.len() as u32,
            std::ptr::null_mut(),
            stream,
        );
        if err != RT_ERROR_NONE {
            return KernelLaunchSnafu { reason: format!("rtKernelLaunch failed: {err}") }.fail();
        }
        Ok(())
    }
}
