//! Shared fixtures for runtime tests.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::bridge::{CompileRequest, CompilerBridge};
use crate::error::{CompilerSnafu, Result};
use crate::signature::ArgClass;

/// Serializes tests that inspect the process-global mock-backend state.
pub static BACKEND_LOCK: Mutex<()> = Mutex::new(());

/// Bridge double: returns a fixed static signature and materializes artifact
/// directories under a tempdir, content-addressed by the request tuple.
pub struct MockBridge {
    classes: Vec<ArgClass>,
    root: tempfile::TempDir,
    metadata: Option<String>,
    extracts: AtomicUsize,
    compiles: AtomicUsize,
    fail_compiles: AtomicBool,
    compile_delay: Option<Duration>,
}

impl MockBridge {
    pub fn new(classes: Vec<ArgClass>) -> Self {
        Self {
            classes,
            root: tempfile::tempdir().unwrap(),
            metadata: None,
            extracts: AtomicUsize::new(0),
            compiles: AtomicUsize::new(0),
            fail_compiles: AtomicBool::new(false),
            compile_delay: None,
        }
    }

    /// Write this JSON as the artifact's `<entry>.json`.
    pub fn with_metadata(mut self, json: &str) -> Self {
        self.metadata = Some(json.to_string());
        self
    }

    /// Sleep inside every compile, to widen race windows.
    pub fn with_compile_delay(mut self, delay: Duration) -> Self {
        self.compile_delay = Some(delay);
        self
    }

    pub fn set_fail_compiles(&self, fail: bool) {
        self.fail_compiles.store(fail, Ordering::SeqCst);
    }

    pub fn extracts(&self) -> usize {
        self.extracts.load(Ordering::SeqCst)
    }

    pub fn compiles(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }
}

impl CompilerBridge for MockBridge {
    fn extract_static_signature(&self, _path: &Path, _name: &str) -> Result<Vec<ArgClass>> {
        self.extracts.fetch_add(1, Ordering::SeqCst);
        Ok(self.classes.clone())
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<PathBuf> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.compile_delay {
            std::thread::sleep(delay);
        }
        if self.fail_compiles.load(Ordering::SeqCst) {
            return CompilerSnafu { diagnostic: "mock compile failure" }.fail();
        }

        let mut hasher = DefaultHasher::new();
        (request.name, request.signature, request.num_warps, request.num_stages)
            .hash(&mut hasher);
        request.device_index.hash(&mut hasher);
        let dir = self.root.path().join(format!("{:016x}", hasher.finish()));

        if !dir.exists() {
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(format!("{}.o", request.name)), b"\x7fELF-mock-kernel").unwrap();
            if let Some(metadata) = &self.metadata {
                fs::write(dir.join(format!("{}.json", request.name)), metadata).unwrap();
            }
        }
        Ok(dir)
    }
}

/// A 16-byte-aligned host buffer standing in for tensor storage.
pub struct AlignedBuffer {
    storage: Vec<u128>,
}

impl AlignedBuffer {
    pub fn new(len_bytes: usize) -> Self {
        Self { storage: vec![0u128; len_bytes.div_ceil(16)] }
    }

    pub fn ptr(&self) -> *mut std::ffi::c_void {
        self.storage.as_ptr() as *mut std::ffi::c_void
    }

    /// Pointer offset by `bytes` from the aligned base.
    pub fn ptr_at(&self, bytes: usize) -> *mut std::ffi::c_void {
        (self.storage.as_ptr() as usize + bytes) as *mut std::ffi::c_void
    }
}
