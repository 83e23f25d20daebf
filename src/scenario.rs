//! Scenario schema and YAML parsing.
//!
//! A scenario file names one target executable and the checks to run
//! against it: interactive exchanges over a pseudo-terminal, one-shot smoke
//! runs, and dynamic-linkage verification.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root structure of a scenario YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Schema version (currently 1).
    #[serde(default = "default_version")]
    pub version: u32,

    /// Scenario identifier (e.g. "squiid").
    pub scenario: String,

    /// Path to the target executable.
    pub program: PathBuf,

    /// Environment variables set for every run of the target.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Bound in milliseconds on the wait for first output after spawn.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Quiescence window in milliseconds for interactive reads.
    #[serde(default = "default_idle_ms")]
    pub idle_ms: u64,

    /// Bound in milliseconds on the wait for exit after the quit command.
    #[serde(default = "default_exit_ms")]
    pub exit_ms: u64,

    /// Checks to run, in order.
    pub checks: Vec<Check>,
}

fn default_version() -> u32 {
    1
}

fn default_settle_ms() -> u64 {
    1000
}

fn default_idle_ms() -> u64 {
    2000
}

fn default_exit_ms() -> u64 {
    10000
}

/// A single check. The variant is inferred from the fields present:
/// interactive checks have `steps`, smoke checks have `arg`, linkage checks
/// have `library`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Check {
    /// Drive the target through its terminal interface.
    Interactive(InteractiveCheck),

    /// Run the target once with a flag and no terminal.
    Smoke(SmokeCheck),

    /// Verify dynamic linkage against an installed library.
    Linkage(LinkageCheck),
}

impl Check {
    /// Short kind name for reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            Check::Interactive(_) => "interactive",
            Check::Smoke(_) => "smoke",
            Check::Linkage(_) => "linkage",
        }
    }

    /// Display label: the configured name, or kind plus position.
    pub fn label(&self, index: usize) -> String {
        let name = match self {
            Check::Interactive(c) => &c.name,
            Check::Smoke(c) => &c.name,
            Check::Linkage(c) => &c.name,
        };
        name.clone()
            .unwrap_or_else(|| format!("{}-{}", self.kind(), index + 1))
    }
}

/// An interactive check: scripted exchanges ending in a quit command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractiveCheck {
    /// Optional check name for reporting.
    #[serde(default)]
    pub name: Option<String>,

    /// Input lines with expectations, sent in order.
    pub steps: Vec<Step>,

    /// Command that asks the target to exit, sent after the steps.
    #[serde(default = "default_quit")]
    pub quit: String,

    /// Expect a successful exit status after the quit command.
    #[serde(default = "default_true")]
    pub expect_clean_exit: bool,
}

fn default_quit() -> String {
    "quit".to_string()
}

fn default_true() -> bool {
    true
}

/// One interactive exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Input line to send (a carriage return is appended).
    pub send: String,

    /// Return the read once this substring appears, instead of waiting out
    /// the full quiescence window.
    pub wait_for: Option<String>,

    /// Output of this exchange must contain these strings.
    pub expect_contains: Option<StringOrVec>,

    /// Output of this exchange must not contain these strings.
    pub expect_not_contains: Option<StringOrVec>,

    /// Output of this exchange must match these regex patterns.
    pub expect_matches: Option<StringOrVec>,
}

/// A smoke check: run the target once with a flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmokeCheck {
    /// Optional check name for reporting.
    #[serde(default)]
    pub name: Option<String>,

    /// Flag to pass, e.g. "--version".
    pub arg: String,

    /// Expected exit code.
    #[serde(default)]
    pub expect_exit: i32,

    /// Combined output must contain these strings.
    pub expect_contains: Option<StringOrVec>,
}

/// A linkage check: the target must load this library dynamically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkageCheck {
    /// Optional check name for reporting.
    #[serde(default)]
    pub name: Option<String>,

    /// Expected library path.
    pub library: PathBuf,

    /// Install prefix. Falls back to --prefix, then HOMEBREW_PREFIX.
    #[serde(default)]
    pub prefix: Option<PathBuf>,
}

/// Either a single string or a vector of strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrVec {
    Single(String),
    Multiple(Vec<String>),
}

impl StringOrVec {
    /// Convert to a vector of strings.
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            StringOrVec::Single(s) => vec![s.clone()],
            StringOrVec::Multiple(v) => v.clone(),
        }
    }
}

impl Scenario {
    /// Parse a scenario from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, String> {
        serde_yaml::from_str(yaml).map_err(|e| format!("Failed to parse scenario YAML: {e}"))
    }

    /// Load a scenario from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read scenario file {}: {e}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Startup readiness bound.
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Read quiescence window.
    pub fn idle(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }

    /// Exit wait bound after the quit command.
    pub fn exit_timeout(&self) -> Duration {
        Duration::from_millis(self.exit_ms)
    }
}
