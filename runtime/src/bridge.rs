//! Boundary to the external tile-language compiler.
//!
//! The compiler lives in another toolchain entirely; the runtime treats it
//! as an opaque service with two blocking operations. Its on-disk output
//! convention (artifact directory with `<entry>.json` metadata beside the
//! device binary) is consumed by the backends, never produced here.

use std::path::{Path, PathBuf};
use std::process::Command;

use snafu::ensure;
use tracing::debug;

use crate::error::{CompilerSnafu, Result};
use crate::signature::ArgClass;

/// One compilation request. The result directory is content-addressed by
/// this tuple (with the device index resolved to its architecture), so
/// repeated requests return the same directory.
#[derive(Debug, Clone)]
pub struct CompileRequest<'a> {
    pub path: &'a Path,
    pub name: &'a str,
    pub signature: &'a str,
    pub num_warps: u32,
    pub num_stages: u32,
    pub device_index: i32,
}

pub trait CompilerBridge: Send + Sync {
    /// Introspect `name` in `path` and return the per-parameter argument
    /// classes, in declaration order. Pure; called once per entry point.
    fn extract_static_signature(&self, path: &Path, name: &str) -> Result<Vec<ArgClass>>;

    /// Compile one specialization and return its artifact directory.
    fn compile(&self, request: &CompileRequest<'_>) -> Result<PathBuf>;
}

/// Bridge that shells out to the tile compiler CLI.
///
/// `<tool> signature <path> <entry>` prints one argument-class tag per
/// parameter; `<tool> compile <path> <entry> <signature> <warps> <stages>
/// <device>` prints the artifact directory.
pub struct ProcessBridge {
    program: PathBuf,
}

impl ProcessBridge {
    pub const DEFAULT_PROGRAM: &'static str = "tilec";

    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        debug!(compiler = %self.program.display(), compiler.args = ?args, "invoking tile compiler");

        let output = Command::new(&self.program).args(args).output().map_err(|e| {
            CompilerSnafu {
                diagnostic: format!("failed to run {}: {e}", self.program.display()),
            }
            .build()
        })?;

        ensure!(
            output.status.success(),
            CompilerSnafu {
                diagnostic: format!(
                    "{} exited with {}: {}",
                    self.program.display(),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            }
        );

        String::from_utf8(output.stdout).map_err(|_| {
            CompilerSnafu { diagnostic: "compiler produced non-UTF-8 output".to_string() }.build()
        })
    }
}

impl Default for ProcessBridge {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PROGRAM)
    }
}

impl CompilerBridge for ProcessBridge {
    fn extract_static_signature(&self, path: &Path, name: &str) -> Result<Vec<ArgClass>> {
        let stdout = self.run(&["signature", &path.to_string_lossy(), name])?;

        let mut classes = Vec::new();
        for word in stdout.split_whitespace() {
            let tag: i64 = word.parse().map_err(|_| {
                CompilerSnafu { diagnostic: format!("bad argument-class tag {word:?}") }.build()
            })?;
            let class = ArgClass::from_tag(tag).ok_or_else(|| {
                CompilerSnafu { diagnostic: format!("unknown argument-class tag {tag}") }.build()
            })?;
            classes.push(class);
        }
        Ok(classes)
    }

    fn compile(&self, request: &CompileRequest<'_>) -> Result<PathBuf> {
        let stdout = self.run(&[
            "compile",
            &request.path.to_string_lossy(),
            request.name,
            request.signature,
            &request.num_warps.to_string(),
            &request.num_stages.to_string(),
            &request.device_index.to_string(),
        ])?;

        let dir = stdout.trim();
        ensure!(
            !dir.is_empty(),
            CompilerSnafu { diagnostic: "compiler printed no artifact directory" }
        );
        Ok(PathBuf::from(dir))
    }
}
