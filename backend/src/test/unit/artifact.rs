use std::fs;

use crate::artifact::{
    locate_binary, read_binary, GpuMetadata, NpuMetadata, GPU_BINARY_EXTS, NPU_BINARY_EXTS,
};
use crate::error::Error;
use crate::layout::ArgSlot;

#[test]
fn binary_fallback_order() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("k.bin"), b"late").unwrap();
    fs::write(dir.path().join("k.o"), b"early").unwrap();

    let found = locate_binary(dir.path(), "k", NPU_BINARY_EXTS).unwrap();
    assert_eq!(found.extension().unwrap(), "o");
}

#[test]
fn missing_binary_is_artifact_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let err = locate_binary(dir.path(), "k", GPU_BINARY_EXTS).unwrap_err();
    assert!(matches!(err, Error::ArtifactNotFound { .. }), "{err}");
}

#[test]
fn zero_length_binary_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("k.cubin");
    fs::write(&path, b"").unwrap();
    let err = read_binary(&path).unwrap_err();
    assert!(matches!(err, Error::InvalidArtifact { .. }), "{err}");
}

#[test]
fn gpu_metadata_requires_all_fields() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("k.json"), r#"{"shared": 4096, "target": {"arch": 80}}"#).unwrap();

    let meta = GpuMetadata::load(dir.path(), "k").unwrap();
    assert_eq!(meta.shared, 4096);
    assert_eq!(meta.target.arch, 80);

    fs::write(dir.path().join("bad.json"), r#"{"shared": 4096}"#).unwrap();
    let err = GpuMetadata::load(dir.path(), "bad").unwrap_err();
    assert!(matches!(err, Error::Metadata { .. }), "{err}");
}

#[test]
fn negative_shared_is_a_metadata_error() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("k.json"), r#"{"shared": -1, "target": {"arch": 80}}"#).unwrap();
    assert!(GpuMetadata::load(dir.path(), "k").is_err());

    fs::write(dir.path().join("n.json"), r#"{"shared": -1}"#).unwrap();
    assert!(NpuMetadata::load(dir.path(), "n").is_err());
}

#[test]
fn npu_metadata_defaults() {
    let dir = tempfile::tempdir().unwrap();

    // No metadata file at all.
    let meta = NpuMetadata::load(dir.path(), "k").unwrap();
    assert_eq!(meta.shared, 0);
    assert_eq!(meta.mix_mode, "mix");
    assert!(!meta.is_vector_only());
    assert!(meta.arg_slots().is_none());

    // Partial file.
    fs::write(dir.path().join("v.json"), r#"{"mix_mode": "aiv"}"#).unwrap();
    let meta = NpuMetadata::load(dir.path(), "v").unwrap();
    assert!(meta.is_vector_only());
    assert_eq!(meta.shared, 0);
}

#[test]
fn npu_arg_layout_skips_constexpr_and_accepts_aliases() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("k.json"),
        r#"{
            "arg_layout": [
                {"type": "ptr"},
                {"type": "pointer"},
                {"type": "constexpr"},
                {"type": "i64"},
                {"type": "fp32"},
                {"type": "f32"}
            ]
        }"#,
    )
    .unwrap();

    let meta = NpuMetadata::load(dir.path(), "k").unwrap();
    let slots = meta.arg_slots().unwrap();
    assert_eq!(
        slots,
        vec![ArgSlot::Pointer, ArgSlot::Pointer, ArgSlot::I64, ArgSlot::F32, ArgSlot::F32]
    );
}
