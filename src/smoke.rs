//! One-shot smoke invocation of the target without a terminal.
//!
//! Runs `program <flag>` with piped stdio to completion. Used for the
//! non-interactive mode of a scenario, where only the exit code and printed
//! output matter.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Errors from a smoke run.
#[derive(Debug, Error)]
pub enum SmokeError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to collect output from '{program}': {source}")]
    Collect {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Output captured from a smoke run.
#[derive(Debug, Clone)]
pub struct SmokeOutput {
    /// Standard output.
    pub stdout: String,

    /// Standard error.
    pub stderr: String,

    /// Exit code, if the process exited rather than died on a signal.
    pub exit_code: Option<i32>,

    /// Duration of the run.
    pub duration: Duration,
}

impl SmokeOutput {
    /// Combined stdout + stderr.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }

    /// Check if the process exited with code zero.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run `program` with `args` to completion, capturing its output.
///
/// Stdin is closed so a target that unexpectedly prompts cannot hang the
/// run.
pub fn run_smoke(
    program: &Path,
    args: &[String],
    cwd: Option<&Path>,
) -> Result<SmokeOutput, SmokeError> {
    let start = Instant::now();

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let child = cmd.spawn().map_err(|source| SmokeError::Spawn {
        program: program.to_path_buf(),
        source,
    })?;

    let output = child
        .wait_with_output()
        .map_err(|source| SmokeError::Collect {
            program: program.to_path_buf(),
            source,
        })?;

    Ok(SmokeOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code(),
        duration: start.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoke_output_helpers() {
        let output = SmokeOutput {
            stdout: "Squiid 1.3.2\n".to_string(),
            stderr: "warning: test\n".to_string(),
            exit_code: Some(0),
            duration: Duration::from_millis(100),
        };

        assert!(output.success());
        assert!(output.combined().contains("Squiid"));
        assert!(output.combined().contains("warning"));

        let failed = SmokeOutput {
            exit_code: Some(1),
            ..output
        };
        assert!(!failed.success());
    }

    #[cfg(unix)]
    #[test]
    fn runs_a_program_to_completion() {
        let output = run_smoke(
            Path::new("sh"),
            &["-c".to_string(), "echo smoke-ok".to_string()],
            None,
        )
        .unwrap();

        assert!(output.success());
        assert!(output.stdout.contains("smoke-ok"));
        assert!(output.stderr.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn captures_nonzero_exit() {
        let output = run_smoke(
            Path::new("sh"),
            &["-c".to_string(), "echo oops >&2; exit 3".to_string()],
            None,
        )
        .unwrap();

        assert!(!output.success());
        assert_eq!(output.exit_code, Some(3));
        assert!(output.stderr.contains("oops"));
    }

    #[test]
    fn spawn_failure_is_reported() {
        let err = run_smoke(Path::new("/nonexistent/packtest-target"), &[], None);
        assert!(matches!(err, Err(SmokeError::Spawn { .. })));
    }
}
