//! Runtime-resolved binding to the NPU vendor driver.
//!
//! The driver ships as two shared libraries (`libascendcl.so` for context and
//! device management, `libruntime.so` for binary registration and launch).
//! Symbols are resolved once with `libloading` and kept as raw function
//! pointers beside the libraries that own them.

use std::ffi::{c_char, c_int, c_void};

use libloading::Library;
use once_cell::sync::OnceCell;

use crate::error::{DriverLoadSnafu, Result};

pub type AclError = c_int;
pub type RtError = c_int;

pub const ACL_SUCCESS: AclError = 0;
pub const RT_ERROR_NONE: RtError = 0;

/// Binary-image magic for mixed cube/vector kernels.
pub const RT_DEV_BINARY_MAGIC_ELF: u32 = 0x43554245;
/// Binary-image magic for vector-only (`"aiv"`) kernels.
pub const RT_DEV_BINARY_MAGIC_ELF_AIVEC: u32 = 0x4141_5246;

/// Device binary descriptor handed to `rtDevBinaryRegister`.
#[repr(C)]
pub struct RtDevBinary {
    pub magic: u32,
    pub version: u32,
    pub data: *const c_void,
    pub length: u64,
}

type AclrtGetDeviceFn = unsafe extern "C" fn(*mut c_int) -> AclError;
type AclrtSetDeviceFn = unsafe extern "C" fn(c_int) -> AclError;
type AclrtGetCurrentContextFn = unsafe extern "C" fn(*mut *mut c_void) -> AclError;
type AclrtCreateContextFn = unsafe extern "C" fn(*mut *mut c_void, c_int) -> AclError;
type AclrtSetCurrentContextFn = unsafe extern "C" fn(*mut c_void) -> AclError;

type RtSetDeviceFn = unsafe extern "C" fn(c_int) -> RtError;
type RtDevBinaryRegisterFn = unsafe extern "C" fn(*const RtDevBinary, *mut *mut c_void) -> RtError;
type RtFunctionRegisterFn =
    unsafe extern "C" fn(*mut c_void, *const c_void, *const c_char, *const c_void, u32) -> RtError;
type RtGetC2cCtrlAddrFn = unsafe extern "C" fn(*mut u64, *mut u32) -> RtError;
type RtKernelLaunchFn =
    unsafe extern "C" fn(*const c_void, u32, *mut c_void, u32, *mut c_void, *mut c_void) -> RtError;

/// Resolved driver symbol table. The libraries are kept alive beside the raw
/// function pointers that reference them.
pub struct NpuDriver {
    _acl: Library,
    _rt: Library,

    pub aclrt_get_device: AclrtGetDeviceFn,
    pub aclrt_set_device: AclrtSetDeviceFn,
    pub aclrt_get_current_context: AclrtGetCurrentContextFn,
    pub aclrt_create_context: AclrtCreateContextFn,
    pub aclrt_set_current_context: AclrtSetCurrentContextFn,

    pub rt_set_device: RtSetDeviceFn,
    pub rt_dev_binary_register: RtDevBinaryRegisterFn,
    pub rt_function_register: RtFunctionRegisterFn,
    pub rt_get_c2c_ctrl_addr: RtGetC2cCtrlAddrFn,
    pub rt_kernel_launch: RtKernelLaunchFn,
}

fn open_library(name: &str) -> Result<Library> {
    // SAFETY: loading the vendor driver runs its initializers, which is the
    // documented way to bring the runtime up.
    unsafe { Library::new(name) }.map_err(|e| {
        DriverLoadSnafu { reason: format!("failed to load {name}: {e}") }.build()
    })
}

fn symbol<T: Copy>(lib: &Library, name: &'static [u8]) -> Result<T> {
    // SAFETY: the fn-pointer types above mirror the vendor headers; the
    // library outlives the copied pointer because both live in NpuDriver.
    unsafe { lib.get::<T>(name) }.map(|s| *s).map_err(|e| {
        DriverLoadSnafu {
            reason: format!("missing driver symbol {}: {e}", String::from_utf8_lossy(name)),
        }
        .build()
    })
}

impl NpuDriver {
    fn open() -> Result<Self> {
        let acl = open_library("libascendcl.so")?;
        let rt = open_library("libruntime.so")?;

        Ok(Self {
            aclrt_get_device: symbol(&acl, b"aclrtGetDevice\0")?,
            aclrt_set_device: symbol(&acl, b"aclrtSetDevice\0")?,
            aclrt_get_current_context: symbol(&acl, b"aclrtGetCurrentContext\0")?,
            aclrt_create_context: symbol(&acl, b"aclrtCreateContext\0")?,
            aclrt_set_current_context: symbol(&acl, b"aclrtSetCurrentContext\0")?,
            rt_set_device: symbol(&rt, b"rtSetDevice\0")?,
            rt_dev_binary_register: symbol(&rt, b"rtDevBinaryRegister\0")?,
            rt_function_register: symbol(&rt, b"rtFunctionRegister\0")?,
            rt_get_c2c_ctrl_addr: symbol(&rt, b"rtGetC2cCtrlAddr\0")?,
            rt_kernel_launch: symbol(&rt, b"rtKernelLaunch\0")?,
            _acl: acl,
            _rt: rt,
        })
    }

    /// The process-wide driver instance, resolved on first use.
    ///
    /// A failed resolution is cached: every subsequent call reports the same
    /// diagnostic without retrying the dlopen.
    pub fn get() -> Result<&'static NpuDriver> {
        static DRIVER: OnceCell<std::result::Result<NpuDriver, String>> = OnceCell::new();
        match DRIVER.get_or_init(|| Self::open().map_err(|e| e.to_string())) {
            Ok(driver) => Ok(driver),
            Err(reason) => DriverLoadSnafu { reason: reason.clone() }.fail(),
        }
    }
}
