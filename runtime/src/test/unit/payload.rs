use std::ffi::c_void;

use crate::payload::ParameterBuffer;

#[test]
fn offsets_respect_natural_alignment() {
    let mut buf = ParameterBuffer::with_capacity(4);
    buf.push(7u8);
    buf.push(9i32); // aligned up to 4
    buf.push(11i64); // aligned up to 8
    buf.push(3u8);

    assert_eq!(buf.offsets(), &[0, 4, 8, 16]);
    assert_eq!(buf.len(), 4);
    assert_eq!(buf.bytes().len(), 17);
}

#[test]
fn values_land_at_their_offsets() {
    let mut buf = ParameterBuffer::with_capacity(2);
    buf.push(0x0102_0304i32);
    buf.push(2.5f64);

    let bytes = buf.bytes();
    assert_eq!(&bytes[0..4], &0x0102_0304i32.to_ne_bytes());
    assert_eq!(&bytes[8..16], &2.5f64.to_ne_bytes());
}

#[test]
fn global_scratch_is_a_null_pointer_slot() {
    let mut buf = ParameterBuffer::with_capacity(1);
    buf.push(1i64);
    buf.append_global_scratch();

    assert_eq!(buf.len(), 2);
    let ptrs = buf.arg_ptrs();
    // SAFETY: the slot pointer aliases the live buffer.
    let scratch = unsafe { *(ptrs[1] as *const *mut c_void) };
    assert!(scratch.is_null());
}

#[test]
fn arg_ptrs_alias_the_byte_image() {
    let mut buf = ParameterBuffer::with_capacity(2);
    buf.push(42i64);
    buf.push(-1i32);

    let ptrs = buf.arg_ptrs();
    assert_eq!(ptrs.len(), 2);
    // SAFETY: as above.
    unsafe {
        assert_eq!(*(ptrs[0] as *const i64), 42);
        assert_eq!(*(ptrs[1] as *const i32), -1);
    }
}

#[test]
fn identical_pushes_produce_identical_images() {
    let build = || {
        let mut buf = ParameterBuffer::with_capacity(3);
        buf.push(0xdeadbeefusize as *mut c_void);
        buf.push(131072i64);
        buf.push(0.5f32);
        buf.append_global_scratch();
        buf
    };
    let a = build();
    let b = build();
    assert_eq!(a.bytes(), b.bytes());
    assert_eq!(a.offsets(), b.offsets());
}
