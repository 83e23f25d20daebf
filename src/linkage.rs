//! Dynamic-library linkage verification for packaged executables.
//!
//! A packaged build must load the packaged library at runtime, not a copy
//! vendored into the executable at build time. The check asks the platform
//! linker tool which shared libraries the executable records, keeps only
//! entries under the install prefix, and compares them to the expected
//! library by canonical path.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::debug;

#[cfg(target_os = "macos")]
const LINKAGE_TOOL: &str = "otool";
#[cfg(not(target_os = "macos"))]
const LINKAGE_TOOL: &str = "ldd";

/// Errors from linkage inspection.
#[derive(Debug, Error)]
pub enum LinkageError {
    #[error("Failed to run {tool}: {source}")]
    Inspect {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} failed on '{binary}': {stderr}")]
    ToolFailed {
        tool: &'static str,
        binary: PathBuf,
        stderr: String,
    },

    #[error("No install prefix configured; set one in the scenario, pass --prefix, or export HOMEBREW_PREFIX")]
    NoPrefix,
}

/// Verify that `binary` loads `expected` from under `prefix`.
///
/// Returns `Ok(false)` when no recorded dependency under the prefix resolves
/// to the expected library, the signal that the build embedded a vendored
/// copy instead of linking the packaged one.
pub fn verify(binary: &Path, expected: &Path, prefix: &Path) -> Result<bool, LinkageError> {
    let libraries = linked_libraries(binary)?;
    debug!(
        binary = %binary.display(),
        count = libraries.len(),
        "enumerated dynamic dependencies"
    );
    Ok(links_against(&libraries, prefix, expected))
}

/// List the dynamic libraries `binary` records, as reported by the platform
/// tool (`otool -L` on macOS, `ldd` elsewhere).
pub fn linked_libraries(binary: &Path) -> Result<Vec<PathBuf>, LinkageError> {
    let output = linkage_command(binary)
        .output()
        .map_err(|source| LinkageError::Inspect {
            tool: LINKAGE_TOOL,
            source,
        })?;

    if !output.status.success() {
        return Err(LinkageError::ToolFailed {
            tool: LINKAGE_TOOL,
            binary: binary.to_path_buf(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_tool_output(&stdout))
}

/// Check whether `expected` is among `libraries`, considering only entries
/// under `prefix` and resolving symlinks on both sides before comparing.
/// Paths that cannot be resolved are compared as written.
pub fn links_against(libraries: &[PathBuf], prefix: &Path, expected: &Path) -> bool {
    let expected = canonical_or_raw(expected);
    libraries
        .iter()
        .filter(|lib| lib.starts_with(prefix))
        .any(|lib| canonical_or_raw(lib) == expected)
}

/// Pick the install prefix: explicit configuration wins, then the
/// HOMEBREW_PREFIX environment variable.
pub fn resolve_prefix(explicit: Option<&Path>) -> Result<PathBuf, LinkageError> {
    prefix_from(explicit, std::env::var_os("HOMEBREW_PREFIX"))
}

fn prefix_from(explicit: Option<&Path>, env: Option<OsString>) -> Result<PathBuf, LinkageError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    match env {
        Some(value) if !value.is_empty() => Ok(PathBuf::from(value)),
        _ => Err(LinkageError::NoPrefix),
    }
}

fn canonical_or_raw(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(target_os = "macos")]
fn linkage_command(binary: &Path) -> Command {
    let mut cmd = Command::new("otool");
    cmd.arg("-L").arg(binary);
    cmd
}

#[cfg(not(target_os = "macos"))]
fn linkage_command(binary: &Path) -> Command {
    let mut cmd = Command::new("ldd");
    cmd.arg(binary);
    cmd
}

fn parse_tool_output(output: &str) -> Vec<PathBuf> {
    if cfg!(target_os = "macos") {
        parse_otool_output(output)
    } else {
        parse_ldd_output(output)
    }
}

/// Parse `otool -L` output. The first line names the inspected file; each
/// following line is an indented "<path> (compatibility version ...)".
fn parse_otool_output(output: &str) -> Vec<PathBuf> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let entry = line.trim();
            let path = entry.split(" (").next().unwrap_or(entry).trim();
            if path.is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            }
        })
        .collect()
}

/// Parse `ldd` output. Resolved entries look like "libfoo.so.1 =>
/// /usr/lib/libfoo.so.1 (0x...)"; the loader appears as a bare absolute
/// path, and vdso or unresolved entries carry no path at all.
fn parse_ldd_output(output: &str) -> Vec<PathBuf> {
    output
        .lines()
        .filter_map(|line| {
            let entry = line.trim();
            let resolved = match entry.split_once("=>") {
                Some((_, rhs)) => rhs.trim(),
                None => entry,
            };
            let path = resolved.split(" (").next().unwrap_or(resolved).trim();
            if path.starts_with('/') {
                Some(PathBuf::from(path))
            } else {
                None
            }
        })
        .collect()
}
