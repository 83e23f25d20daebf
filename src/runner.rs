//! Scenario execution.
//!
//! Runs the checks of a scenario strictly in order, collecting one outcome
//! per check. Interactive checks drive the target through a pseudo-terminal
//! inside a scratch directory; smoke checks run it once without a terminal;
//! linkage checks inspect the built binary.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use regex::Regex;
use tracing::{debug, warn};

use crate::linkage;
use crate::scenario::{Check, InteractiveCheck, LinkageCheck, Scenario, SmokeCheck, Step};
use crate::session::{Session, SessionConfig};
use crate::smoke;

/// Quiescence window for draining farewell output after the quit command.
const DRAIN_IDLE: Duration = Duration::from_millis(500);

/// Result of running one check.
#[derive(Debug, Clone)]
pub enum CheckOutcome {
    /// Check passed.
    Passed { duration: Duration },

    /// An assertion failed.
    Failed {
        duration: Duration,
        error: String,
        /// Sanitized output captured up to the failure, for diagnostics.
        output: Option<String>,
        /// Index of the failing step, for interactive checks.
        step_index: Option<usize>,
    },

    /// The check could not run at all (spawn failure, broken session,
    /// inspection tool missing).
    Error { error: String },
}

impl CheckOutcome {
    /// Check if the outcome is a pass.
    pub fn is_passed(&self) -> bool {
        matches!(self, CheckOutcome::Passed { .. })
    }

    /// Check if the outcome is a failure.
    pub fn is_failed(&self) -> bool {
        matches!(self, CheckOutcome::Failed { .. })
    }

    /// Check if the outcome is an error.
    pub fn is_error(&self) -> bool {
        matches!(self, CheckOutcome::Error { .. })
    }

    /// Get duration if available.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            CheckOutcome::Passed { duration } => Some(*duration),
            CheckOutcome::Failed { duration, .. } => Some(*duration),
            CheckOutcome::Error { .. } => None,
        }
    }
}

/// Result of executing a single check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    /// Check label (configured name or kind plus position).
    pub label: String,

    /// Check kind: "interactive", "smoke", or "linkage".
    pub kind: &'static str,

    /// Check outcome.
    pub outcome: CheckOutcome,
}

/// Result of executing a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario name.
    pub scenario_name: String,

    /// Individual check results, in execution order.
    pub check_results: Vec<CheckResult>,

    /// Total duration.
    pub duration: Duration,
}

impl ScenarioResult {
    /// Count of passed checks.
    pub fn passed_count(&self) -> usize {
        self.check_results
            .iter()
            .filter(|r| r.outcome.is_passed())
            .count()
    }

    /// Count of failed checks.
    pub fn failed_count(&self) -> usize {
        self.check_results
            .iter()
            .filter(|r| r.outcome.is_failed())
            .count()
    }

    /// Count of checks that errored before asserting anything.
    pub fn error_count(&self) -> usize {
        self.check_results
            .iter()
            .filter(|r| r.outcome.is_error())
            .count()
    }

    /// Total check count.
    pub fn total_count(&self) -> usize {
        self.check_results.len()
    }

    /// Check if every check passed.
    pub fn all_passed(&self) -> bool {
        self.failed_count() == 0 && self.error_count() == 0
    }
}

/// Configuration for the runner.
#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    /// Override for the scenario's target executable.
    pub binary: Option<PathBuf>,

    /// Fallback install prefix for linkage checks.
    pub prefix: Option<PathBuf>,

    /// Stop at the first check that does not pass.
    pub fail_fast: bool,
}

/// Scenario runner.
pub struct Runner {
    config: RunnerConfig,
    /// Compiled regex cache for expect_matches patterns.
    regex_cache: HashMap<String, Regex>,
}

impl Runner {
    /// Create a new runner with the given configuration.
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            regex_cache: HashMap::new(),
        }
    }

    /// Execute every check of a scenario, in order.
    pub fn run_scenario(&mut self, scenario: &Scenario) -> ScenarioResult {
        let start = Instant::now();
        let program = self.program(scenario);

        let mut check_results = Vec::with_capacity(scenario.checks.len());
        for (index, check) in scenario.checks.iter().enumerate() {
            let result = self.run_check(scenario, &program, check, index);
            let passed = result.outcome.is_passed();
            check_results.push(result);
            if self.config.fail_fast && !passed {
                break;
            }
        }

        ScenarioResult {
            scenario_name: scenario.scenario.clone(),
            check_results,
            duration: start.elapsed(),
        }
    }

    /// Target executable: the CLI override wins over the scenario.
    fn program(&self, scenario: &Scenario) -> PathBuf {
        self.config
            .binary
            .clone()
            .unwrap_or_else(|| scenario.program.clone())
    }

    fn run_check(
        &mut self,
        scenario: &Scenario,
        program: &Path,
        check: &Check,
        index: usize,
    ) -> CheckResult {
        debug!(check = %check.label(index), kind = check.kind(), "running check");
        let outcome = match check {
            Check::Interactive(c) => self.run_interactive(scenario, program, c),
            Check::Smoke(c) => self.run_smoke(program, c),
            Check::Linkage(c) => self.run_linkage(program, c),
        };

        CheckResult {
            label: check.label(index),
            kind: check.kind(),
            outcome,
        }
    }

    /// Drive the target through a scripted terminal exchange.
    ///
    /// The session runs in a scratch directory so the target cannot litter
    /// the caller's working directory. The session owns its cleanup, so an
    /// assertion failure partway through still reaps the child.
    fn run_interactive(
        &mut self,
        scenario: &Scenario,
        program: &Path,
        check: &InteractiveCheck,
    ) -> CheckOutcome {
        let start = Instant::now();

        let scratch = match tempfile::Builder::new()
            .prefix("packtest_")
            .tempdir()
        {
            Ok(dir) => dir,
            Err(e) => {
                return CheckOutcome::Error {
                    error: format!("Failed to create scratch directory: {e}"),
                }
            }
        };

        let mut config = SessionConfig::new(program);
        config.cwd = Some(scratch.path().to_path_buf());
        config.env = scenario.env.clone();
        config.exit_timeout = scenario.exit_timeout();

        let mut session = match Session::spawn(&config) {
            Ok(session) => session,
            Err(e) => {
                return CheckOutcome::Error {
                    error: format!("Failed to spawn '{}': {e}", program.display()),
                }
            }
        };

        if !session.wait_for_output(scenario.settle()) {
            warn!(
                settle = ?scenario.settle(),
                "target produced no output within the settle window"
            );
        }

        // Full transcript of the exchange, for diagnostics on failure.
        let mut transcript = String::new();

        for (step_index, step) in check.steps.iter().enumerate() {
            if let Err(e) = session.send(&step.send) {
                return CheckOutcome::Error {
                    error: format!("Failed to send step {}: {e}", step_index + 1),
                };
            }

            let output = match &step.wait_for {
                Some(needle) => session.read_until(needle, scenario.idle()),
                None => session.read_available(scenario.idle()),
            };
            transcript.push_str(&output);

            if let Err(error) = self.check_step(step, &output) {
                return CheckOutcome::Failed {
                    duration: start.elapsed(),
                    error: format!("Step {}: {error}", step_index + 1),
                    output: Some(transcript),
                    step_index: Some(step_index),
                };
            }
        }

        if let Err(e) = session.send(&check.quit) {
            return CheckOutcome::Error {
                error: format!("Failed to send quit command: {e}"),
            };
        }
        // Drain farewell output so a target blocked on a full terminal
        // buffer can finish exiting.
        transcript.push_str(&session.read_available(DRAIN_IDLE));

        let status = match session.close() {
            Ok(status) => status,
            Err(e) => {
                return CheckOutcome::Error {
                    error: format!("Failed to close session: {e}"),
                }
            }
        };

        if check.expect_clean_exit && !status.success() {
            return CheckOutcome::Failed {
                duration: start.elapsed(),
                error: format!("Target exited with {status} after '{}'", check.quit),
                output: Some(transcript),
                step_index: None,
            };
        }

        CheckOutcome::Passed {
            duration: start.elapsed(),
        }
    }

    /// Validate one step's expectations against its sanitized output.
    fn check_step(&mut self, step: &Step, output: &str) -> Result<(), String> {
        if let Some(expected) = &step.expect_contains {
            for needle in expected.to_vec() {
                if !output.contains(&needle) {
                    return Err(format!("expected output to contain '{needle}'"));
                }
            }
        }

        if let Some(unexpected) = &step.expect_not_contains {
            for needle in unexpected.to_vec() {
                if output.contains(&needle) {
                    return Err(format!("output should not contain '{needle}'"));
                }
            }
        }

        if let Some(patterns) = &step.expect_matches {
            for pattern in patterns.to_vec() {
                let regex = self.compile(&pattern)?;
                if !regex.is_match(output) {
                    return Err(format!("pattern '{pattern}' did not match output"));
                }
            }
        }

        Ok(())
    }

    fn compile(&mut self, pattern: &str) -> Result<&Regex, String> {
        if !self.regex_cache.contains_key(pattern) {
            let regex = Regex::new(pattern)
                .map_err(|e| format!("invalid pattern '{pattern}': {e}"))?;
            self.regex_cache.insert(pattern.to_string(), regex);
        }
        Ok(&self.regex_cache[pattern])
    }

    /// Run the target once with a flag and no terminal.
    fn run_smoke(&mut self, program: &Path, check: &SmokeCheck) -> CheckOutcome {
        let start = Instant::now();

        let output = match smoke::run_smoke(program, &[check.arg.clone()], None) {
            Ok(output) => output,
            Err(e) => return CheckOutcome::Error { error: e.to_string() },
        };

        let combined = output.combined();

        if output.exit_code != Some(check.expect_exit) {
            return CheckOutcome::Failed {
                duration: start.elapsed(),
                error: format!(
                    "'{} {}' exited with {:?}, expected {}",
                    program.display(),
                    check.arg,
                    output.exit_code,
                    check.expect_exit
                ),
                output: Some(combined),
                step_index: None,
            };
        }

        if let Some(expected) = &check.expect_contains {
            for needle in expected.to_vec() {
                if !combined.contains(&needle) {
                    return CheckOutcome::Failed {
                        duration: start.elapsed(),
                        error: format!("expected output to contain '{needle}'"),
                        output: Some(combined),
                        step_index: None,
                    };
                }
            }
        }

        CheckOutcome::Passed {
            duration: start.elapsed(),
        }
    }

    /// Verify the target is dynamically linked against the expected library.
    fn run_linkage(&mut self, program: &Path, check: &LinkageCheck) -> CheckOutcome {
        let start = Instant::now();

        let prefix = match linkage::resolve_prefix(
            check.prefix.as_deref().or(self.config.prefix.as_deref()),
        ) {
            Ok(prefix) => prefix,
            Err(e) => return CheckOutcome::Error { error: e.to_string() },
        };

        match linkage::verify(program, &check.library, &prefix) {
            Ok(true) => CheckOutcome::Passed {
                duration: start.elapsed(),
            },
            Ok(false) => CheckOutcome::Failed {
                duration: start.elapsed(),
                error: format!(
                    "No linkage with {}! The build is likely using a statically vendored copy.",
                    check.library.display()
                ),
                output: None,
                step_index: None,
            },
            Err(e) => CheckOutcome::Error { error: e.to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::StringOrVec;

    fn step(send: &str) -> Step {
        Step {
            send: send.to_string(),
            wait_for: None,
            expect_contains: None,
            expect_not_contains: None,
            expect_matches: None,
        }
    }

    #[test]
    fn check_outcome_helpers() {
        let passed = CheckOutcome::Passed {
            duration: Duration::from_secs(1),
        };
        assert!(passed.is_passed());
        assert!(!passed.is_failed());
        assert_eq!(passed.duration(), Some(Duration::from_secs(1)));

        let failed = CheckOutcome::Failed {
            duration: Duration::from_secs(1),
            error: "assertion failed".to_string(),
            output: None,
            step_index: Some(0),
        };
        assert!(failed.is_failed());
        assert!(!failed.is_passed());

        let error = CheckOutcome::Error {
            error: "spawn failed".to_string(),
        };
        assert!(error.is_error());
        assert_eq!(error.duration(), None);
    }

    #[test]
    fn scenario_result_counts() {
        let result = ScenarioResult {
            scenario_name: "calc".to_string(),
            check_results: vec![
                CheckResult {
                    label: "arithmetic".to_string(),
                    kind: "interactive",
                    outcome: CheckOutcome::Passed {
                        duration: Duration::from_millis(100),
                    },
                },
                CheckResult {
                    label: "smoke-2".to_string(),
                    kind: "smoke",
                    outcome: CheckOutcome::Failed {
                        duration: Duration::from_millis(50),
                        error: "bad exit".to_string(),
                        output: None,
                        step_index: None,
                    },
                },
                CheckResult {
                    label: "linkage-3".to_string(),
                    kind: "linkage",
                    outcome: CheckOutcome::Error {
                        error: "no prefix".to_string(),
                    },
                },
            ],
            duration: Duration::from_secs(1),
        };

        assert_eq!(result.passed_count(), 1);
        assert_eq!(result.failed_count(), 1);
        assert_eq!(result.error_count(), 1);
        assert_eq!(result.total_count(), 3);
        assert!(!result.all_passed());
    }

    #[test]
    fn step_expectations_pass_and_fail() {
        let mut runner = Runner::new(RunnerConfig::default());

        let mut s = step("(10 - 2) * (3 + 5) / 4");
        s.expect_contains = Some(StringOrVec::Single("(10-2)*(3+5)/4=16".to_string()));
        assert!(runner.check_step(&s, "(10-2)*(3+5)/4=16\r\n").is_ok());
        assert!(runner.check_step(&s, "something else").is_err());

        let mut s = step("2 + 2");
        s.expect_not_contains = Some(StringOrVec::Single("error".to_string()));
        assert!(runner.check_step(&s, "2+2=4").is_ok());
        assert!(runner.check_step(&s, "parse error").is_err());

        let mut s = step("2 ^ 10");
        s.expect_matches = Some(StringOrVec::Multiple(vec![
            r"2\^10".to_string(),
            r"=\s*1024".to_string(),
        ]));
        assert!(runner.check_step(&s, "2^10=1024").is_ok());
        assert!(runner.check_step(&s, "2^10=1023").is_err());
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let mut runner = Runner::new(RunnerConfig::default());
        let mut s = step("x");
        s.expect_matches = Some(StringOrVec::Single("(unclosed".to_string()));
        let err = runner.check_step(&s, "anything").unwrap_err();
        assert!(err.contains("invalid pattern"), "unexpected error: {err}");
    }

    #[test]
    fn binary_override_wins_over_scenario() {
        let scenario = Scenario::from_yaml(
            "scenario: calc\nprogram: /usr/bin/calc\nchecks: []\n",
        )
        .unwrap();

        let runner = Runner::new(RunnerConfig::default());
        assert_eq!(runner.program(&scenario), PathBuf::from("/usr/bin/calc"));

        let runner = Runner::new(RunnerConfig {
            binary: Some(PathBuf::from("/tmp/calc-under-test")),
            ..RunnerConfig::default()
        });
        assert_eq!(runner.program(&scenario), PathBuf::from("/tmp/calc-under-test"));
    }

    #[test]
    fn fail_fast_stops_after_first_error() {
        let scenario = Scenario::from_yaml(
            r#"
scenario: missing
program: /nonexistent/packtest-target
checks:
  - arg: "--version"
  - arg: "--help"
"#,
        )
        .unwrap();

        let mut runner = Runner::new(RunnerConfig {
            fail_fast: true,
            ..RunnerConfig::default()
        });
        let result = runner.run_scenario(&scenario);
        assert_eq!(result.total_count(), 1);
        assert!(result.check_results[0].outcome.is_error());

        let mut runner = Runner::new(RunnerConfig::default());
        let result = runner.run_scenario(&scenario);
        assert_eq!(result.total_count(), 2);
    }

    #[test]
    fn linkage_inspection_failure_is_an_error() {
        let mut runner = Runner::new(RunnerConfig::default());
        // Pin an explicit prefix so the HOMEBREW_PREFIX fallback of the host
        // running these tests cannot change the outcome.
        let check = LinkageCheck {
            name: None,
            library: PathBuf::from("/opt/homebrew/opt/nng/lib/libnng.dylib"),
            prefix: Some(PathBuf::from("/nonexistent-prefix")),
        };
        let outcome = runner.run_linkage(Path::new("/nonexistent/binary"), &check);
        // The inspection tool fails on a missing binary.
        assert!(outcome.is_error());
    }
}
