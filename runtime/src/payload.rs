//! Launch payload assembly.

use std::ffi::c_void;

use smallvec::SmallVec;

/// Rough per-argument byte estimate used to presize the buffer.
const ESTIMATED_BYTES_PER_ARG: usize = 8;

/// Contiguous byte image of the runtime arguments plus one offset per slot.
///
/// Each push rounds the cursor up to the value's natural alignment before
/// copying, so the image doubles as a packed record for single-buffer
/// backends while [`ParameterBuffer::arg_ptrs`] provides the
/// array-of-pointers view for the GPU-class ABI.
#[derive(Debug, Default)]
pub struct ParameterBuffer {
    buf: SmallVec<[u8; 64]>,
    offsets: SmallVec<[usize; 12]>,
    cursor: usize,
}

impl ParameterBuffer {
    pub fn with_capacity(num_args: usize) -> Self {
        let mut this = Self::default();
        this.buf.reserve(num_args * ESTIMATED_BYTES_PER_ARG);
        this.offsets.reserve(num_args + 1);
        this
    }

    pub fn push<T: Copy>(&mut self, value: T) {
        let align = std::mem::align_of::<T>();
        let size = std::mem::size_of::<T>();
        let offset = self.cursor.next_multiple_of(align);
        self.buf.resize(offset + size, 0);
        // SAFETY: the resize above makes [offset, offset + size) valid, and
        // T is Copy.
        unsafe {
            std::ptr::copy_nonoverlapping(
                &value as *const T as *const u8,
                self.buf.as_mut_ptr().add(offset),
                size,
            );
        }
        self.offsets.push(offset);
        self.cursor = offset + size;
    }

    /// Trailing null pointer required by the compiler ABI as an implicit
    /// final argument.
    pub fn append_global_scratch(&mut self) {
        self.push(std::ptr::null_mut::<c_void>());
    }

    /// Number of argument slots pushed so far.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.cursor]
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// One pointer per slot, into this buffer's storage.
    ///
    /// The pointers alias `self`; they stay valid until the buffer is moved,
    /// mutated or dropped, so materialize them right before the launch call.
    pub fn arg_ptrs(&mut self) -> SmallVec<[*mut c_void; 12]> {
        let base = self.buf.as_mut_ptr();
        self.offsets
            .iter()
            // SAFETY: every offset was produced by push and lies within the
            // buffer.
            .map(|off| unsafe { base.add(*off) } as *mut c_void)
            .collect()
    }
}
