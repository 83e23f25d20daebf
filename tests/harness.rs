//! End-to-end harness tests driving real child processes through a
//! pseudo-terminal, using small `sh` fixtures in place of a packaged binary.

#![cfg(unix)]

use std::path::PathBuf;
use std::time::{Duration, Instant};

use packtest::runner::{Runner, RunnerConfig};
use packtest::scenario::Scenario;
use packtest::session::{Session, SessionConfig};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Write an executable `sh` script into `dir` and return its path.
fn fixture(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.path().join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A line-oriented calculator: echoes each expression back with whitespace
/// removed, followed by `=` and the evaluated result. Exits on `quit`, and
/// answers `--version` without entering interactive mode.
const CALCULATOR: &str = r#"
if [ "$1" = "--version" ]; then
  echo "minicalc 1.0.0"
  exit 0
fi
echo "minicalc ready"
while IFS= read -r line; do
  case "$line" in
    quit) exit 0 ;;
    "") ;;
    *)
      compact=$(printf '%s' "$line" | tr -d ' ')
      printf '%s=%s\n' "$compact" "$(($compact))"
      ;;
  esac
done
"#;

fn spawn_fixture(dir: &tempfile::TempDir, name: &str, body: &str) -> Session {
    let path = fixture(dir, name, body);
    Session::spawn(&SessionConfig::new(path)).expect("failed to spawn fixture")
}

// ---------------------------------------------------------------------------
// InteractiveSession
// ---------------------------------------------------------------------------

#[test]
fn arithmetic_exchange_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = spawn_fixture(&dir, "calc", CALCULATOR);

    assert!(session.wait_for_output(Duration::from_secs(5)));

    session.send("(10 - 2) * (3 + 5) / 4").unwrap();
    let output = session.read_available(Duration::from_secs(1));
    assert!(
        output.contains("(10-2)*(3+5)/4=16"),
        "unexpected output: {output:?}"
    );

    session.send("quit").unwrap();
    let status = session.close().unwrap();
    assert!(status.success(), "calculator exited with {status}");
}

#[test]
fn close_succeeds_when_the_child_already_exited() {
    let dir = tempfile::tempdir().unwrap();
    let session = spawn_fixture(&dir, "instant", "exit 0\n");

    // Give the child time to be gone before close observes it.
    std::thread::sleep(Duration::from_millis(300));

    let status = session.close().unwrap();
    assert!(status.success());
}

#[test]
fn idle_quiescence_accumulates_chunked_output() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = spawn_fixture(
        &dir,
        "chunked",
        "printf one; sleep 0.3; printf two; sleep 0.3; printf three; sleep 30\n",
    );

    // Gaps between chunks stay under the idle window, so one read collects
    // everything.
    let output = session.read_available(Duration::from_secs(1));
    assert!(output.contains("onetwothree"), "unexpected output: {output:?}");
    // Dropping the session reaps the still-sleeping child.
}

#[test]
fn closed_stream_returns_before_the_idle_window() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = spawn_fixture(&dir, "oneshot", "echo farewell\n");

    let start = Instant::now();
    let output = session.read_available(Duration::from_secs(30));
    assert!(output.contains("farewell"));
    assert!(
        start.elapsed() < Duration::from_secs(10),
        "read waited out the idle window on a closed stream"
    );

    let status = session.close().unwrap();
    assert!(status.success());
}

#[test]
fn read_until_returns_on_the_sentinel() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = spawn_fixture(
        &dir,
        "prompting",
        "printf 'thinking\\n'; sleep 0.3; printf 'done> '; sleep 30\n",
    );

    let start = Instant::now();
    let output = session.read_until("done>", Duration::from_secs(30));
    assert!(output.contains("thinking"));
    assert!(output.contains("done>"));
    assert!(
        start.elapsed() < Duration::from_secs(10),
        "read_until waited past the sentinel"
    );
}

#[test]
fn terminal_escape_sequences_are_stripped() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = spawn_fixture(
        &dir,
        "colorful",
        "printf '\\033[1;32mgreen\\033[0m plain\\n'\n",
    );

    let output = session.read_available(Duration::from_secs(1));
    assert!(output.contains("green plain"), "unexpected output: {output:?}");
    assert!(!output.contains('\x1b'), "escape sequence survived: {output:?}");
}

#[test]
fn repeated_reads_carry_the_stream_position() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = spawn_fixture(&dir, "echoer", CALCULATOR);
    assert!(session.wait_for_output(Duration::from_secs(5)));

    session.send("1 + 1").unwrap();
    let first = session.read_available(Duration::from_secs(1));
    assert!(first.contains("1+1=2"), "unexpected output: {first:?}");

    session.send("2 + 3").unwrap();
    let second = session.read_available(Duration::from_secs(1));
    assert!(second.contains("2+3=5"), "unexpected output: {second:?}");
    // Each read starts a fresh accumulation.
    assert!(!second.contains("1+1=2"), "stale output re-read: {second:?}");

    session.send("quit").unwrap();
    assert!(session.close().unwrap().success());
}

#[test]
fn spawning_a_missing_executable_fails() {
    let config = SessionConfig::new("/nonexistent/packtest-target");
    assert!(Session::spawn(&config).is_err());
}

// ---------------------------------------------------------------------------
// Scenario runner
// ---------------------------------------------------------------------------

#[test]
fn runner_executes_a_full_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let program = fixture(&dir, "calc", CALCULATOR);

    let yaml = format!(
        r#"
scenario: minicalc
program: {}
settle_ms: 5000
idle_ms: 1000

checks:
  - name: arithmetic
    steps:
      - send: "(10 - 2) * (3 + 5) / 4"
        expect_contains: "(10-2)*(3+5)/4=16"
      - send: "2 + 2"
        expect_contains: "2+2=4"
        expect_not_contains: "error"
    quit: "quit"

  - name: version-flag
    arg: "--version"
    expect_exit: 0
    expect_contains: "minicalc"
"#,
        program.display()
    );

    let scenario = Scenario::from_yaml(&yaml).unwrap();
    let mut runner = Runner::new(RunnerConfig::default());
    let result = runner.run_scenario(&scenario);

    assert!(
        result.all_passed(),
        "scenario did not pass: {:?}",
        result.check_results
    );
    assert_eq!(result.total_count(), 2);
}

#[test]
fn runner_reports_a_failing_expectation_with_output() {
    let dir = tempfile::tempdir().unwrap();
    let program = fixture(&dir, "calc", CALCULATOR);

    let yaml = format!(
        r#"
scenario: minicalc
program: {}
settle_ms: 5000
idle_ms: 1000

checks:
  - steps:
      - send: "2 + 2"
        expect_contains: "2+2=5"
    quit: "quit"
"#,
        program.display()
    );

    let scenario = Scenario::from_yaml(&yaml).unwrap();
    let mut runner = Runner::new(RunnerConfig::default());
    let result = runner.run_scenario(&scenario);

    assert_eq!(result.failed_count(), 1);
    match &result.check_results[0].outcome {
        packtest::runner::CheckOutcome::Failed {
            error,
            output,
            step_index,
            ..
        } => {
            assert!(error.contains("2+2=5"), "unexpected error: {error}");
            assert_eq!(*step_index, Some(0));
            // Diagnostics carry what the target actually printed.
            assert!(
                output.as_deref().unwrap_or("").contains("2+2=4"),
                "captured output missing: {output:?}"
            );
        }
        other => panic!("expected a failure, got {other:?}"),
    }
}
