//! In-memory backend policy for tests.
//!
//! `MockBackend` conforms to [`BackendPolicy`] without a device: artifacts
//! are still located and their metadata parsed from disk, but "loading" just
//! hands out a fresh handle and every operation is recorded in process-global
//! state for inspection. Call [`MockBackend::reset`] between tests.

use std::collections::HashMap;
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::artifact::{self, NpuMetadata, NPU_BINARY_EXTS};
use crate::error::{DriverLoadSnafu, Result};
use crate::layout::{self, ArgSlot};
use crate::policy::{BackendPolicy, BlockDims, GridDims};
use crate::record::ArgBuffer;

/// Extensions the mock accepts, GPU-class first.
pub const MOCK_BINARY_EXTS: &[&str] = &["cubin", "npubin", "o", "ttadapter", "bin"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedLoad {
    pub dir: PathBuf,
    pub entry: String,
}

#[derive(Debug, Clone)]
pub struct RecordedLaunch {
    pub handle: MockKernelHandle,
    pub grid: GridDims,
    pub block: BlockDims,
    pub shared_bytes: u32,
    pub signature: String,
    /// One entry per payload slot handed to the driver.
    pub slot_ptrs: Vec<usize>,
    /// The packed single-buffer record, built the way an NPU-class driver
    /// would see it (absent when neither signature nor layout was supplied).
    pub packed: Option<Vec<u8>>,
}

#[derive(Default)]
struct MockState {
    next_handle: u64,
    cache: HashMap<(PathBuf, String), ModuleData>,
    loads: Vec<RecordedLoad>,
    launches: Vec<RecordedLaunch>,
    fail_loads: bool,
    device_index: i32,
    context_calls: u64,
}

struct ModuleData {
    handle: MockKernelHandle,
    metadata: NpuMetadata,
    slots: Option<Arc<[ArgSlot]>>,
}

static STATE: Lazy<Mutex<MockState>> = Lazy::new(|| Mutex::new(MockState::default()));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockKernelHandle(pub u64);

pub struct MockBackend;

impl MockBackend {
    /// Drop all recorded state. Tests sharing the process must call this (or
    /// use disjoint artifacts) for isolation.
    pub fn reset() {
        *STATE.lock() = MockState::default();
    }

    pub fn loads() -> Vec<RecordedLoad> {
        STATE.lock().loads.clone()
    }

    pub fn load_count() -> usize {
        STATE.lock().loads.len()
    }

    pub fn launches() -> Vec<RecordedLaunch> {
        STATE.lock().launches.clone()
    }

    pub fn context_calls() -> u64 {
        STATE.lock().context_calls
    }

    /// Make every subsequent driver load fail, without touching the cache.
    pub fn set_fail_loads(fail: bool) {
        STATE.lock().fail_loads = fail;
    }

    pub fn set_device_index(index: i32) {
        STATE.lock().device_index = index;
    }
}

impl BackendPolicy for MockBackend {
    type Stream = usize;
    type Context = ();
    type KernelHandle = MockKernelHandle;

    const WARP_SIZE: u32 = 32;

    fn backend_name() -> &'static str {
        "mock"
    }

    fn ensure_context() -> Result<()> {
        STATE.lock().context_calls += 1;
        Ok(())
    }

    fn current_device_index() -> Result<i32> {
        Ok(STATE.lock().device_index)
    }

    fn load_artifact(dir: &Path, entry: &str) -> Result<Self::KernelHandle> {
        let key = (dir.to_path_buf(), entry.to_string());
        let mut state = STATE.lock();
        if let Some(data) = state.cache.get(&key) {
            return Ok(data.handle);
        }

        if state.fail_loads {
            return DriverLoadSnafu { reason: "mock load failure" }.fail();
        }

        let metadata = NpuMetadata::load(dir, entry)?;
        let binary = artifact::locate_binary(dir, entry, MOCK_BINARY_EXTS)?;
        artifact::read_binary(&binary)?;

        state.next_handle += 1;
        let handle = MockKernelHandle(state.next_handle);
        state.loads.push(RecordedLoad { dir: dir.to_path_buf(), entry: entry.to_string() });

        let slots = metadata.arg_slots().map(Arc::from);
        state.cache.insert(key, ModuleData { handle, metadata, slots });
        Ok(handle)
    }

    fn shared_memory(dir: &Path, entry: &str) -> u32 {
        let key = (dir.to_path_buf(), entry.to_string());
        if let Some(data) = STATE.lock().cache.get(&key) {
            return data.metadata.shared;
        }
        NpuMetadata::load(dir, entry).map(|m| m.shared).unwrap_or(0)
    }

    fn arg_layout(dir: &Path, entry: &str) -> Option<Arc<[ArgSlot]>> {
        let key = (dir.to_path_buf(), entry.to_string());
        STATE.lock().cache.get(&key).and_then(|data| data.slots.clone())
    }

    unsafe fn launch(
        _stream: Self::Stream,
        kernel: Self::KernelHandle,
        grid: GridDims,
        block: BlockDims,
        args: &[*mut c_void],
        shared_bytes: u32,
        signature: &str,
        arg_layout: Option<&[ArgSlot]>,
    ) -> Result<()> {
        let parsed;
        let slots: Option<&[ArgSlot]> = match arg_layout {
            Some(slots) if !slots.is_empty() => Some(slots),
            _ if !signature.is_empty() => {
                parsed = layout::layout_from_signature(signature);
                Some(&parsed)
            }
            _ => None,
        };

        let packed = slots.map(|slots| {
            let mut record = ArgBuffer::new(slots.len() * 8 + 16);
            record.set_system_args(0xffff_0000);
            for (slot_ptr, slot) in args.iter().zip(slots) {
                if !slot_ptr.is_null() {
                    // SAFETY: forwarded from this function's own contract.
                    unsafe { record.push_slot(*slot_ptr, *slot) };
                }
            }
            record.set_grid(grid);
            record.as_bytes().to_vec()
        });

        STATE.lock().launches.push(RecordedLaunch {
            handle: kernel,
            grid,
            block,
            shared_bytes,
            signature: signature.to_string(),
            slot_ptrs: args.iter().map(|p| *p as usize).collect(),
            packed,
        });
        Ok(())
    }
}
