//! Report generation.
//!
//! Turns scenario results into a terminal report with colors or a JSON
//! document for CI consumption.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::runner::{CheckOutcome, CheckResult, ScenarioResult};

/// Report format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    /// Terminal output with colors.
    Terminal,
    /// JSON format.
    Json,
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "terminal" | "term" | "console" => Ok(ReportFormat::Terminal),
            "json" => Ok(ReportFormat::Json),
            _ => Err(format!("Unknown report format: {s}")),
        }
    }
}

/// Full report over one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Report generation timestamp.
    pub timestamp: DateTime<Utc>,

    /// Scenario results.
    pub scenarios: Vec<ScenarioReport>,

    /// Summary statistics.
    pub summary: ReportSummary,
}

/// Report for a single scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    /// Scenario name.
    pub name: String,

    /// Check results.
    pub checks: Vec<CheckReport>,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Pass count.
    pub passed: usize,

    /// Fail count.
    pub failed: usize,

    /// Error count.
    pub errors: usize,
}

/// Report for a single check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckReport {
    /// Check label.
    pub label: String,

    /// Check kind: "interactive", "smoke", or "linkage".
    pub kind: String,

    /// Status: "passed", "failed", or "error".
    pub status: String,

    /// Duration in milliseconds (if the check ran).
    pub duration_ms: Option<u64>,

    /// Failure or error message.
    pub error: Option<String>,

    /// Index of the failing step (interactive checks).
    pub failed_step: Option<usize>,

    /// Captured output, truncated for large transcripts.
    pub output: Option<String>,
}

/// Summary statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Total check count.
    pub total: usize,

    /// Passed count.
    pub passed: usize,

    /// Failed count.
    pub failed: usize,

    /// Error count.
    pub errors: usize,

    /// Total duration in milliseconds.
    pub duration_ms: u64,

    /// Pass rate (0.0 - 1.0).
    pub pass_rate: f64,
}

/// Report generator.
pub struct Reporter {
    /// Maximum captured-output length to include in reports.
    max_output_length: usize,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter {
    /// Create a new reporter.
    pub fn new() -> Self {
        Self {
            max_output_length: 2000,
        }
    }

    /// Set maximum captured-output length.
    pub fn with_max_output_length(mut self, len: usize) -> Self {
        self.max_output_length = len;
        self
    }

    /// Generate a report from scenario results.
    pub fn generate(&self, results: &[ScenarioResult]) -> Report {
        let scenarios: Vec<ScenarioReport> =
            results.iter().map(|r| self.scenario_report(r)).collect();
        let summary = calculate_summary(&scenarios);

        Report {
            timestamp: Utc::now(),
            scenarios,
            summary,
        }
    }

    fn scenario_report(&self, result: &ScenarioResult) -> ScenarioReport {
        let checks: Vec<CheckReport> = result
            .check_results
            .iter()
            .map(|r| self.check_report(r))
            .collect();

        ScenarioReport {
            name: result.scenario_name.clone(),
            checks,
            duration_ms: result.duration.as_millis() as u64,
            passed: result.passed_count(),
            failed: result.failed_count(),
            errors: result.error_count(),
        }
    }

    fn check_report(&self, result: &CheckResult) -> CheckReport {
        let (status, error, failed_step, output) = match &result.outcome {
            CheckOutcome::Passed { .. } => ("passed", None, None, None),
            CheckOutcome::Failed {
                error,
                output,
                step_index,
                ..
            } => (
                "failed",
                Some(error.clone()),
                *step_index,
                output.as_ref().map(|o| self.truncate(o)),
            ),
            CheckOutcome::Error { error } => ("error", Some(error.clone()), None, None),
        };

        CheckReport {
            label: result.label.clone(),
            kind: result.kind.to_string(),
            status: status.to_string(),
            duration_ms: result.outcome.duration().map(|d| d.as_millis() as u64),
            error,
            failed_step,
            output,
        }
    }

    fn truncate(&self, s: &str) -> String {
        if s.len() <= self.max_output_length {
            s.to_string()
        } else {
            let mut cut = self.max_output_length;
            while !s.is_char_boundary(cut) {
                cut -= 1;
            }
            format!("{}... (truncated)", &s[..cut])
        }
    }

    /// Write report to terminal.
    pub fn write_terminal<W: Write>(&self, report: &Report, writer: &mut W) -> std::io::Result<()> {
        writeln!(writer)?;
        writeln!(writer, "{}", "Acceptance Results".bold())?;
        writeln!(writer, "{}", "=".repeat(60))?;
        writeln!(writer)?;

        for scenario in &report.scenarios {
            self.write_scenario_terminal(scenario, writer)?;
        }

        self.write_summary_terminal(&report.summary, writer)?;

        Ok(())
    }

    fn write_scenario_terminal<W: Write>(
        &self,
        scenario: &ScenarioReport,
        writer: &mut W,
    ) -> std::io::Result<()> {
        writeln!(writer, "{} {}", "Scenario:".bold(), scenario.name)?;
        writeln!(writer, "{}", "-".repeat(60))?;

        for check in &scenario.checks {
            let status_icon = match check.status.as_str() {
                "passed" => "PASS".green(),
                "failed" => "FAIL".red(),
                "error" => "ERR ".red().bold(),
                _ => "????".normal(),
            };

            let duration_str = check
                .duration_ms
                .map(|d| format!(" ({:.2}s)", d as f64 / 1000.0))
                .unwrap_or_default();

            writeln!(
                writer,
                "  [{}] {} ({}){}",
                status_icon,
                check.label,
                check.kind,
                duration_str.dimmed()
            )?;

            if let Some(error) = &check.error {
                writeln!(writer, "         {}: {}", "Error".red(), error)?;
            }
            if let Some(step) = check.failed_step {
                writeln!(writer, "         {}: {}", "Failed step".red(), step + 1)?;
            }
            if let Some(output) = &check.output {
                writeln!(writer, "         {}:", "Captured output".dimmed())?;
                for line in output.lines() {
                    writeln!(writer, "           {}", line.dimmed())?;
                }
            }
        }

        writeln!(writer)?;
        Ok(())
    }

    fn write_summary_terminal<W: Write>(
        &self,
        summary: &ReportSummary,
        writer: &mut W,
    ) -> std::io::Result<()> {
        writeln!(writer, "{}", "=".repeat(60))?;
        writeln!(writer, "{}", "Summary".bold())?;
        writeln!(writer)?;

        writeln!(
            writer,
            "  Total:   {} checks",
            summary.total.to_string().bold()
        )?;
        writeln!(writer, "  Passed:  {}", summary.passed.to_string().green())?;
        writeln!(
            writer,
            "  Failed:  {}",
            if summary.failed > 0 {
                summary.failed.to_string().red()
            } else {
                summary.failed.to_string().normal()
            }
        )?;
        if summary.errors > 0 {
            writeln!(
                writer,
                "  Errors:  {}",
                summary.errors.to_string().red().bold()
            )?;
        }

        writeln!(writer)?;
        writeln!(
            writer,
            "  Duration: {:.2}s",
            summary.duration_ms as f64 / 1000.0
        )?;
        writeln!(writer, "  Pass rate: {:.1}%", summary.pass_rate * 100.0)?;
        writeln!(writer)?;

        if summary.failed == 0 && summary.errors == 0 {
            writeln!(writer, "{}", "All checks passed!".green().bold())?;
        } else {
            writeln!(
                writer,
                "{}",
                format!("{} check(s) failed", summary.failed + summary.errors)
                    .red()
                    .bold()
            )?;
        }

        writeln!(writer)?;
        Ok(())
    }

    /// Write report as JSON.
    pub fn write_json<W: Write>(&self, report: &Report, writer: &mut W) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(report)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        writeln!(writer, "{json}")
    }

    /// Write report in the specified format.
    pub fn write<W: Write>(
        &self,
        report: &Report,
        format: ReportFormat,
        writer: &mut W,
    ) -> std::io::Result<()> {
        match format {
            ReportFormat::Terminal => self.write_terminal(report, writer),
            ReportFormat::Json => self.write_json(report, writer),
        }
    }

    /// Save report to file.
    pub fn save(&self, report: &Report, format: ReportFormat, path: &Path) -> std::io::Result<()> {
        let mut file = std::fs::File::create(path)?;
        self.write(report, format, &mut file)
    }
}

fn calculate_summary(scenarios: &[ScenarioReport]) -> ReportSummary {
    let mut total = 0;
    let mut passed = 0;
    let mut failed = 0;
    let mut errors = 0;
    let mut duration_ms = 0;

    for scenario in scenarios {
        duration_ms += scenario.duration_ms;
        for check in &scenario.checks {
            total += 1;
            match check.status.as_str() {
                "passed" => passed += 1,
                "failed" => failed += 1,
                "error" => errors += 1,
                _ => {}
            }
        }
    }

    let pass_rate = if total > 0 {
        passed as f64 / total as f64
    } else {
        0.0
    };

    ReportSummary {
        total,
        passed,
        failed,
        errors,
        duration_ms,
        pass_rate,
    }
}
