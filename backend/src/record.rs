//! Packed launch-record builder for single-buffer driver ABIs.
//!
//! NPU-class drivers take one contiguous buffer per launch:
//!
//! ```text
//! [0..8)    system: ffts control address
//! [8..16)   system: sync-block lock (null)
//! [16..24)  system: workspace address (null)
//! [24..)    user arguments, each aligned to its native type
//! [end]     grid_x, grid_y, grid_z as 32-bit integers
//! ```

use std::ffi::c_void;

use crate::layout::ArgSlot;
use crate::policy::GridDims;

const SYSTEM_ARGS_SIZE: usize = 3 * std::mem::size_of::<*const c_void>();

/// Growable byte buffer with an alignment-respecting cursor.
pub struct ArgBuffer {
    buf: Vec<u8>,
    cursor: usize,
}

impl ArgBuffer {
    pub fn new(estimated_user_bytes: usize) -> Self {
        Self {
            buf: vec![0u8; SYSTEM_ARGS_SIZE + estimated_user_bytes + 16],
            cursor: SYSTEM_ARGS_SIZE,
        }
    }

    /// Fill the three system slots. Sync lock and workspace are unused by the
    /// current ABI and stay null.
    pub fn set_system_args(&mut self, ffts_addr: u64) {
        self.buf[0..8].copy_from_slice(&ffts_addr.to_ne_bytes());
        self.buf[8..24].fill(0);
    }

    fn push<T: Copy>(&mut self, value: T) {
        let align = std::mem::align_of::<T>();
        let size = std::mem::size_of::<T>();
        let offset = self.cursor.next_multiple_of(align);
        if offset + size > self.buf.len() {
            self.buf.resize(offset + size + 32, 0);
        }
        // SAFETY: the range [offset, offset + size) is in bounds after the
        // resize above, and T is Copy.
        unsafe {
            std::ptr::copy_nonoverlapping(
                &value as *const T as *const u8,
                self.buf.as_mut_ptr().add(offset),
                size,
            );
        }
        self.cursor = offset + size;
    }

    /// Append one user argument read from a typed payload slot.
    ///
    /// # Safety
    ///
    /// `slot_ptr` must point to a live value of the machine type named by
    /// `slot`.
    pub unsafe fn push_slot(&mut self, slot_ptr: *mut c_void, slot: ArgSlot) {
        match slot {
            ArgSlot::Pointer => self.push(*(slot_ptr as *const *const c_void)),
            ArgSlot::I32 => self.push(*(slot_ptr as *const i32)),
            ArgSlot::I64 => self.push(*(slot_ptr as *const i64)),
            ArgSlot::F32 => self.push(*(slot_ptr as *const f32)),
            ArgSlot::F64 => self.push(*(slot_ptr as *const f64)),
        }
    }

    /// Append the trailing grid triple.
    pub fn set_grid(&mut self, grid: GridDims) {
        self.push(grid.x as i32);
        self.push(grid.y as i32);
        self.push(grid.z as i32);
    }

    pub fn as_mut_ptr(&mut self) -> *mut c_void {
        self.buf.as_mut_ptr() as *mut c_void
    }

    pub fn len(&self) -> usize {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    /// The packed record built so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.cursor]
    }
}
