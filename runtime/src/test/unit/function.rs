use std::sync::Arc;
use std::time::Duration;

use tilebind_backend::mock::MockBackend;
use tilebind_backend::{BlockDims, GridDims};
use tilebind_dtype::DType;

use crate::args::TensorArg;
use crate::error::Error;
use crate::function::FunctionRegistry;
use crate::kargs;
use crate::signature::ArgClass::{Constexpr, NonConstexpr, Specialized};
use crate::test::support::{AlignedBuffer, MockBridge, BACKEND_LOCK};

fn add_bridge() -> Arc<MockBridge> {
    Arc::new(MockBridge::new(vec![
        Specialized,
        Specialized,
        Specialized,
        NonConstexpr,
        Constexpr,
    ]))
}

#[test]
fn classifies_compiles_and_launches() {
    let _guard = BACKEND_LOCK.lock();
    MockBackend::reset();

    let bridge = add_bridge();
    let registry = FunctionRegistry::<MockBackend>::new(bridge.clone());
    let f = registry.get("add.tl", "binary_pointwise_kernel").unwrap();

    let a = AlignedBuffer::new(1024);
    let b = AlignedBuffer::new(1024);
    let out = AlignedBuffer::new(1024);
    let args = kargs![
        TensorArg::new(a.ptr(), DType::Float32),
        TensorArg::new(b.ptr(), DType::Float32),
        TensorArg::new(out.ptr(), DType::Float32),
        131072i64,
        1024i64,
    ];

    // SAFETY: all tensor addresses point at live aligned buffers.
    unsafe { f.launch(0, GridDims::new(128, 1, 1), 8, 1, &args) }.unwrap();

    assert_eq!(bridge.compiles(), 1);
    assert_eq!(MockBackend::load_count(), 1);

    let launches = MockBackend::launches();
    assert_eq!(launches.len(), 1);
    let launch = &launches[0];
    assert_eq!(launch.signature, "*fp32:16,*fp32:16,*fp32:16,i64,1024");
    assert_eq!(launch.grid, GridDims::new(128, 1, 1));
    assert_eq!(launch.block, BlockDims::new(8 * 32, 1, 1));
    // Three tensor pointers, the length scalar, and the scratch slot.
    assert_eq!(launch.slot_ptrs.len(), 5);

    // Second identical call: pure cache hit, same handle, no new compile.
    unsafe { f.launch(0, GridDims::new(128, 1, 1), 8, 1, &args) }.unwrap();
    assert_eq!(bridge.compiles(), 1);
    assert_eq!(MockBackend::load_count(), 1);
    let launches = MockBackend::launches();
    assert_eq!(launches[0].handle, launches[1].handle);
}

#[test]
fn alignment_change_is_a_distinct_specialization() {
    let _guard = BACKEND_LOCK.lock();
    MockBackend::reset();

    let bridge = add_bridge();
    let registry = FunctionRegistry::<MockBackend>::new(bridge.clone());
    let f = registry.get("add.tl", "binary_pointwise_kernel").unwrap();

    let a = AlignedBuffer::new(1024);
    let b = AlignedBuffer::new(1024);
    let out = AlignedBuffer::new(1024);

    let aligned = kargs![
        TensorArg::new(a.ptr(), DType::Float32),
        TensorArg::new(b.ptr(), DType::Float32),
        TensorArg::new(out.ptr(), DType::Float32),
        131072i64,
        1024i64,
    ];
    let shifted = kargs![
        TensorArg::new(a.ptr_at(8), DType::Float32),
        TensorArg::new(b.ptr(), DType::Float32),
        TensorArg::new(out.ptr(), DType::Float32),
        131072i64,
        1024i64,
    ];

    // SAFETY: as above.
    unsafe {
        f.launch(0, GridDims::new(128, 1, 1), 8, 1, &aligned).unwrap();
        f.launch(0, GridDims::new(128, 1, 1), 8, 1, &shifted).unwrap();
    }

    assert_eq!(bridge.compiles(), 2);
    let launches = MockBackend::launches();
    assert_eq!(launches[1].signature, "*fp32,*fp32:16,*fp32:16,i64,1024");
    assert_ne!(launches[0].handle, launches[1].handle);
}

#[test]
fn overload_cache_returns_identical_kernel_objects() {
    let _guard = BACKEND_LOCK.lock();
    MockBackend::reset();

    let bridge = Arc::new(MockBridge::new(vec![NonConstexpr]));
    let registry = FunctionRegistry::<MockBackend>::new(bridge.clone());
    let f = registry.get("k.tl", "kernel").unwrap();

    let first = f.kernel("i64", 4, 1, 0).unwrap();
    let second = f.kernel("i64", 4, 1, 0).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(bridge.compiles(), 1);

    // A different device index is a different specialization slot.
    let other_device = f.kernel("i64", 4, 1, 1).unwrap();
    assert!(!Arc::ptr_eq(&first, &other_device));
    assert_eq!(bridge.compiles(), 2);
}

#[test]
fn concurrent_callers_compile_at_most_once() {
    let _guard = BACKEND_LOCK.lock();
    MockBackend::reset();

    let bridge = Arc::new(
        MockBridge::new(vec![NonConstexpr]).with_compile_delay(Duration::from_millis(30)),
    );
    let registry = FunctionRegistry::<MockBackend>::new(bridge.clone());
    let f = registry.get("k.tl", "kernel").unwrap();

    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                let args = kargs![5i64];
                // SAFETY: no tensor addresses involved.
                unsafe { f.launch(0, GridDims::new(1, 1, 1), 1, 1, &args) }.unwrap();
            });
        }
    });

    assert_eq!(bridge.compiles(), 1);
    assert_eq!(MockBackend::load_count(), 1);
    assert_eq!(MockBackend::launches().len(), 8);
}

#[test]
fn failed_compile_leaves_the_slot_empty() {
    let _guard = BACKEND_LOCK.lock();
    MockBackend::reset();

    let bridge = Arc::new(MockBridge::new(vec![NonConstexpr]));
    let registry = FunctionRegistry::<MockBackend>::new(bridge.clone());
    let f = registry.get("k.tl", "kernel").unwrap();

    bridge.set_fail_compiles(true);
    let err = f.kernel("i64", 4, 1, 0).unwrap_err();
    assert!(matches!(err, Error::Compiler { .. }), "{err}");
    assert_eq!(bridge.compiles(), 1);

    bridge.set_fail_compiles(false);
    f.kernel("i64", 4, 1, 0).unwrap();
    assert_eq!(bridge.compiles(), 2);
}

#[test]
fn failed_load_is_retried_on_the_next_launch() {
    let _guard = BACKEND_LOCK.lock();
    MockBackend::reset();

    let bridge = Arc::new(MockBridge::new(vec![NonConstexpr]));
    let registry = FunctionRegistry::<MockBackend>::new(bridge.clone());
    let f = registry.get("k.tl", "kernel").unwrap();

    let kernel = f.kernel("i64", 4, 1, 0).unwrap();
    assert!(!kernel.is_loaded());

    MockBackend::set_fail_loads(true);
    let args = kargs![5i64];
    // SAFETY: no tensor addresses involved.
    let err = unsafe { f.launch(0, GridDims::new(1, 1, 1), 1, 1, &args) }.unwrap_err();
    assert!(matches!(err, Error::Backend { .. }), "{err}");
    assert!(!kernel.is_loaded());

    MockBackend::set_fail_loads(false);
    unsafe { f.launch(0, GridDims::new(1, 1, 1), 1, 1, &args) }.unwrap();
    assert!(kernel.is_loaded());
    assert_eq!(MockBackend::load_count(), 1);
    assert_eq!(bridge.compiles(), 1);
}

#[test]
fn registry_serves_one_instance_per_entry_point() {
    let _guard = BACKEND_LOCK.lock();
    MockBackend::reset();

    let bridge = Arc::new(MockBridge::new(vec![NonConstexpr]));
    let registry = FunctionRegistry::<MockBackend>::new(bridge.clone());

    let f1 = registry.get("k.tl", "kernel").unwrap();
    let f2 = registry.get("k.tl", "kernel").unwrap();
    assert!(Arc::ptr_eq(&f1, &f2));
    assert_eq!(bridge.extracts(), 1);

    let other = registry.get("k.tl", "other_kernel").unwrap();
    assert!(!Arc::ptr_eq(&f1, &other));
    assert_eq!(bridge.extracts(), 2);
}

#[test]
fn prepared_launch_shares_the_overload_cache() {
    let _guard = BACKEND_LOCK.lock();
    MockBackend::reset();

    let bridge = Arc::new(MockBridge::new(vec![NonConstexpr]));
    let registry = FunctionRegistry::<MockBackend>::new(bridge.clone());
    let f = registry.get("k.tl", "kernel").unwrap();

    let args = kargs![5i64];
    // SAFETY: no tensor addresses involved.
    unsafe { f.launch(0, GridDims::new(1, 1, 1), 1, 1, &args) }.unwrap();
    assert_eq!(bridge.compiles(), 1);

    let mut value: i64 = 5;
    let mut scratch: *mut std::ffi::c_void = std::ptr::null_mut();
    let slots = [
        (&mut value) as *mut i64 as *mut std::ffi::c_void,
        (&mut scratch) as *mut *mut std::ffi::c_void as *mut std::ffi::c_void,
    ];
    // SAFETY: the slots point at live locals matching the signature.
    unsafe { f.launch_prepared(0, GridDims::new(1, 1, 1), 1, 1, "i64", &slots) }.unwrap();

    // The caller-supplied signature matches what the classifier produced,
    // so the prepared path hits the same cache slot.
    assert_eq!(bridge.compiles(), 1);
    assert_eq!(MockBackend::launches().len(), 2);
}

#[test]
fn packed_record_from_signature_when_metadata_lacks_layout() {
    let _guard = BACKEND_LOCK.lock();
    MockBackend::reset();

    let bridge = add_bridge();
    let registry = FunctionRegistry::<MockBackend>::new(bridge.clone());
    let f = registry.get("add.tl", "binary_pointwise_kernel").unwrap();

    let a = AlignedBuffer::new(1024);
    let b = AlignedBuffer::new(1024);
    let out = AlignedBuffer::new(1024);
    let n: i64 = 131072;
    let args = kargs![
        TensorArg::new(a.ptr(), DType::Float32),
        TensorArg::new(b.ptr(), DType::Float32),
        TensorArg::new(out.ptr(), DType::Float32),
        n,
        1024i64,
    ];

    // SAFETY: as above.
    unsafe { f.launch(0, GridDims::new(128, 1, 1), 8, 1, &args) }.unwrap();

    let launches = MockBackend::launches();
    let packed = launches[0].packed.as_ref().unwrap();

    // System prologue, three pointers, one i64, grid triple: the constexpr
    // tile size and the scratch slot contribute nothing.
    assert_eq!(packed.len(), 24 + 3 * 8 + 8 + 12);
    assert_eq!(&packed[24..32], &(a.ptr() as u64).to_ne_bytes());
    assert_eq!(&packed[32..40], &(b.ptr() as u64).to_ne_bytes());
    assert_eq!(&packed[40..48], &(out.ptr() as u64).to_ne_bytes());
    assert_eq!(&packed[48..56], &n.to_ne_bytes());
    assert_eq!(&packed[56..60], &128i32.to_ne_bytes());
    assert_eq!(&packed[60..64], &1i32.to_ne_bytes());
    assert_eq!(&packed[64..68], &1i32.to_ne_bytes());
}

#[test]
fn metadata_arg_layout_takes_precedence_over_the_signature() {
    let _guard = BACKEND_LOCK.lock();
    MockBackend::reset();

    // The artifact declares a single-pointer layout even though the
    // signature names two runtime arguments.
    let bridge = Arc::new(
        MockBridge::new(vec![NonConstexpr, NonConstexpr])
            .with_metadata(r#"{"arg_layout": [{"type": "ptr"}, {"type": "constexpr"}]}"#),
    );
    let registry = FunctionRegistry::<MockBackend>::new(bridge.clone());
    let f = registry.get("k.tl", "kernel").unwrap();

    let buf = AlignedBuffer::new(64);
    let args = kargs![TensorArg::new(buf.ptr(), DType::Float32), 9i64];

    // SAFETY: as above.
    unsafe { f.launch(0, GridDims::new(1, 1, 1), 1, 1, &args) }.unwrap();

    let launches = MockBackend::launches();
    let packed = launches[0].packed.as_ref().unwrap();
    // One pointer slot plus the grid triple: the i64 is not packed because
    // the metadata layout governs.
    assert_eq!(packed.len(), 24 + 8 + 12);
}

#[test]
fn backend_never_influences_classification() {
    let _guard = BACKEND_LOCK.lock();
    MockBackend::reset();

    let classes = vec![Specialized, NonConstexpr, Constexpr];
    let sig = crate::signature::StaticSignature::new(classes.clone());

    let buf = AlignedBuffer::new(64);
    let args = kargs![TensorArg::new(buf.ptr(), DType::Float16), 3i64, 64i64];

    let (payload, tokens) = crate::classify::classify_args(&sig, &args).unwrap();

    let bridge = Arc::new(MockBridge::new(classes));
    let registry = FunctionRegistry::<MockBackend>::new(bridge);
    let f = registry.get("k.tl", "kernel").unwrap();
    // SAFETY: as above.
    unsafe { f.launch(0, GridDims::new(1, 1, 1), 1, 1, &args) }.unwrap();

    // What the backend saw is exactly what the classifier computed.
    let launches = MockBackend::launches();
    assert_eq!(launches[0].signature, tokens.join(","));
    assert_eq!(launches[0].slot_ptrs.len(), payload.len());
}
