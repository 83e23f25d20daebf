#![forbid(unsafe_code)]

//! Acceptance-test harness for packaged interactive terminal binaries.
//!
//! This crate drives a built executable through a pseudo-terminal the way a
//! human operator would (send a line, read the sanitized reply, assert),
//! smoke-runs it with a version-style flag, and verifies that it is
//! dynamically linked against a packaged library rather than a vendored copy.

pub mod linkage;
pub mod report;
pub mod runner;
pub mod sanitize;
pub mod scenario;
pub mod session;
pub mod smoke;

pub use linkage::{verify, LinkageError};
pub use report::{Report, ReportFormat, Reporter};
pub use runner::{CheckOutcome, Runner, RunnerConfig, ScenarioResult};
pub use sanitize::{sanitize_bytes, strip_csi};
pub use scenario::{Check, Scenario};
pub use session::{Session, SessionConfig, SessionError};
pub use smoke::{run_smoke, SmokeError, SmokeOutput};

/// Prelude module for common imports.
pub mod prelude {
    pub use crate::linkage::{verify, LinkageError};
    pub use crate::report::{Report, ReportFormat, Reporter};
    pub use crate::runner::{CheckOutcome, CheckResult, Runner, RunnerConfig, ScenarioResult};
    pub use crate::sanitize::{sanitize_bytes, strip_csi};
    pub use crate::scenario::{Check, Scenario, Step};
    pub use crate::session::{Session, SessionConfig, SessionError};
    pub use crate::smoke::{run_smoke, SmokeError, SmokeOutput};
}
