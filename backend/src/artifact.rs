//! On-disk artifact bundles.
//!
//! One compilation produces a directory holding a device binary plus a JSON
//! metadata record. The binary's extension differs per target family, so
//! lookup walks a fixed ordered fallback list.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use snafu::ResultExt;
use tracing::warn;

use crate::error::{ArtifactNotFoundSnafu, InvalidArtifactSnafu, IoSnafu, MetadataSnafu, Result};
use crate::layout::ArgSlot;

/// Binary extensions tried by the GPU-class backend.
pub const GPU_BINARY_EXTS: &[&str] = &["cubin"];

/// Binary extensions tried by the NPU-class backend, in order.
pub const NPU_BINARY_EXTS: &[&str] = &["npubin", "o", "ttadapter", "bin"];

pub fn metadata_path(dir: &Path, entry: &str) -> PathBuf {
    dir.join(format!("{entry}.json"))
}

/// Locate the device binary for `entry`, trying each extension in order.
pub fn locate_binary(dir: &Path, entry: &str, extensions: &[&str]) -> Result<PathBuf> {
    for ext in extensions {
        let candidate = dir.join(format!("{entry}.{ext}"));
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    ArtifactNotFoundSnafu { dir: dir.to_path_buf(), entry: entry.to_string() }.fail()
}

/// Read a device binary, rejecting empty files.
pub fn read_binary(path: &Path) -> Result<Vec<u8>> {
    let bytes = fs::read(path).context(IoSnafu { path: path.to_path_buf() })?;
    if bytes.is_empty() {
        return InvalidArtifactSnafu { path: path.to_path_buf(), reason: "zero-length binary" }
            .fail();
    }
    Ok(bytes)
}

/// Metadata record of a GPU-class artifact. All fields are required.
#[derive(Debug, Clone, Deserialize)]
pub struct GpuMetadata {
    /// Static shared memory per block, in bytes.
    pub shared: u32,
    pub target: GpuTarget,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GpuTarget {
    /// Compute capability as `major * 10 + minor`.
    pub arch: u32,
}

impl GpuMetadata {
    pub fn load(dir: &Path, entry: &str) -> Result<Self> {
        let path = metadata_path(dir, entry);
        let text = fs::read_to_string(&path).context(IoSnafu { path: path.clone() })?;
        serde_json::from_str(&text).map_err(|e| {
            MetadataSnafu { path: path.clone(), reason: e.to_string() }.build()
        })
    }
}

/// Metadata record of an NPU-class artifact. Every field is optional and a
/// missing metadata file is tolerated.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NpuMetadata {
    /// Static shared memory per block, in bytes.
    pub shared: u32,
    /// Artifact flavor; `"aiv"` marks a vector-only binary.
    pub mix_mode: String,
    arg_layout: Option<Vec<ArgLayoutEntry>>,
}

#[derive(Debug, Clone, Deserialize)]
struct ArgLayoutEntry {
    #[serde(rename = "type")]
    kind: String,
}

impl Default for NpuMetadata {
    fn default() -> Self {
        Self { shared: 0, mix_mode: "mix".to_string(), arg_layout: None }
    }
}

impl NpuMetadata {
    pub fn load(dir: &Path, entry: &str) -> Result<Self> {
        let path = metadata_path(dir, entry);
        if !path.is_file() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path).context(IoSnafu { path: path.clone() })?;
        serde_json::from_str(&text).map_err(|e| {
            MetadataSnafu { path: path.clone(), reason: e.to_string() }.build()
        })
    }

    pub fn is_vector_only(&self) -> bool {
        self.mix_mode == "aiv"
    }

    /// The declared runtime-argument layout, with `constexpr` entries
    /// skipped. `None` when the metadata carries no layout at all.
    pub fn arg_slots(&self) -> Option<Vec<ArgSlot>> {
        let entries = self.arg_layout.as_ref()?;
        let mut slots = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.kind == "constexpr" {
                continue;
            }
            match ArgSlot::parse(&entry.kind) {
                Some(slot) => slots.push(slot),
                None => {
                    warn!(kind = %entry.kind, "unknown arg type in metadata, defaulting to i64");
                    slots.push(ArgSlot::I64);
                }
            }
        }
        Some(slots)
    }
}
