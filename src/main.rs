//! packtest: acceptance-test runner for packaged interactive binaries.
//!
//! Usage:
//!   packtest [OPTIONS] [SCENARIO_PATH]...
//!
//! Examples:
//!   packtest                               # Run all scenarios in scenarios/
//!   packtest --scenario squiid             # Run one scenario by name
//!   packtest --binary target/release/squiid scenarios/squiid.yaml
//!   packtest --format json > report.json

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::prelude::*;

use packtest::report::{ReportFormat, Reporter};
use packtest::runner::{Runner, RunnerConfig};
use packtest::scenario::Scenario;

/// Acceptance-test runner for packaged interactive binaries.
#[derive(Parser, Debug)]
#[command(name = "packtest")]
#[command(version, about, long_about = None)]
struct Args {
    /// Scenario files or directories to run.
    /// If not specified, runs all scenarios in scenarios/
    #[arg(value_name = "SCENARIO_PATH")]
    scenarios: Vec<PathBuf>,

    /// Run only the named scenario.
    #[arg(short, long)]
    scenario: Option<String>,

    /// Path to the target executable, overriding the scenario's program.
    #[arg(long)]
    binary: Option<PathBuf>,

    /// Install prefix for linkage checks (falls back to HOMEBREW_PREFIX).
    #[arg(long)]
    prefix: Option<PathBuf>,

    /// Output format: terminal, json.
    #[arg(short, long, default_value = "terminal")]
    format: String,

    /// Output file (defaults to stdout).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long)]
    verbose: bool,

    /// Stop each scenario at its first failing check.
    #[arg(long)]
    fail_fast: bool,

    /// List available scenarios without running.
    #[arg(long)]
    list: bool,

    /// Dry run (parse scenarios but don't execute).
    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(args.verbose);

    if args.list {
        return list_scenarios(&args);
    }

    let format: ReportFormat = match args.format.parse() {
        Ok(f) => f,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let scenario_files = match find_scenario_files(&args) {
        Ok(files) => files,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    if scenario_files.is_empty() {
        eprintln!("{}: No scenarios found", "Warning".yellow());
        return ExitCode::SUCCESS;
    }

    let scenarios = match parse_scenarios(&scenario_files) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    if args.dry_run {
        return dry_run(&scenarios);
    }

    // Filter by scenario name if specified
    let scenarios: Vec<_> = if let Some(ref name) = args.scenario {
        scenarios.into_iter().filter(|s| s.scenario == *name).collect()
    } else {
        scenarios
    };

    if scenarios.is_empty() {
        if let Some(name) = &args.scenario {
            eprintln!("{}: Scenario '{}' not found", "Error".red(), name);
            return ExitCode::FAILURE;
        }
        return ExitCode::SUCCESS;
    }

    let config = RunnerConfig {
        binary: args.binary,
        prefix: args.prefix,
        fail_fast: args.fail_fast,
    };
    let mut runner = Runner::new(config);

    // Show progress bar for terminal output
    let show_progress = format == ReportFormat::Terminal && !args.verbose;
    let progress = if show_progress {
        let pb = ProgressBar::new(scenarios.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    let mut results = Vec::new();
    for scenario in &scenarios {
        if let Some(ref pb) = progress {
            pb.set_message(format!("Running {}", scenario.scenario));
        }

        let result = runner.run_scenario(scenario);
        results.push(result);

        if let Some(ref pb) = progress {
            pb.inc(1);
        }
    }

    if let Some(pb) = progress {
        pb.finish_with_message("Done");
    }

    let reporter = Reporter::new();
    let report = reporter.generate(&results);

    let write_result = if let Some(output_path) = &args.output {
        reporter.save(&report, format, output_path)
    } else {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        reporter.write(&report, format, &mut handle)
    };

    if let Err(e) = write_result {
        eprintln!("{}: Failed to write report: {}", "Error".red(), e);
        return ExitCode::FAILURE;
    }

    if report.summary.failed == 0 && report.summary.errors == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Initialize logging to stderr. Default: warnings only.
/// Example: RUST_LOG=packtest=debug
fn init_logging(verbose: bool) {
    let default_filter = if verbose { "packtest=debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Find scenario files based on arguments.
fn find_scenario_files(args: &Args) -> Result<Vec<PathBuf>, String> {
    let mut files = Vec::new();

    if args.scenarios.is_empty() {
        let default_dir = PathBuf::from("scenarios");
        if default_dir.exists() {
            collect_yaml_files(&default_dir, &mut files)?;
        }
    } else {
        for path in &args.scenarios {
            if path.is_file() {
                files.push(path.clone());
            } else if path.is_dir() {
                collect_yaml_files(path, &mut files)?;
            } else {
                return Err(format!("Path not found: {}", path.display()));
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Collect YAML files from a directory.
fn collect_yaml_files(dir: &PathBuf, files: &mut Vec<PathBuf>) -> Result<(), String> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| format!("Failed to read directory {}: {}", dir.display(), e))?;

    for entry in entries {
        let entry = entry.map_err(|e| format!("Failed to read entry: {}", e))?;
        let path = entry.path();

        if path.is_file() {
            if let Some(ext) = path.extension() {
                if ext == "yaml" || ext == "yml" {
                    files.push(path);
                }
            }
        }
    }

    Ok(())
}

/// Parse scenario files.
fn parse_scenarios(files: &[PathBuf]) -> Result<Vec<Scenario>, String> {
    let mut scenarios = Vec::new();

    for file in files {
        let scenario = Scenario::from_file(file)?;
        scenarios.push(scenario);
    }

    Ok(scenarios)
}

/// List available scenarios.
fn list_scenarios(args: &Args) -> ExitCode {
    let scenario_files = match find_scenario_files(args) {
        Ok(files) => files,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    println!("{}", "Available scenarios:".bold());
    println!();

    for file in &scenario_files {
        match Scenario::from_file(file) {
            Ok(scenario) => {
                println!(
                    "  {} ({} checks)",
                    scenario.scenario.green(),
                    scenario.checks.len()
                );
                println!("    File: {}", file.display());
                println!("    Program: {}", scenario.program.display());
            }
            Err(e) => {
                eprintln!("  {} (parse error: {})", file.display().to_string().red(), e);
            }
        }
    }

    println!();
    ExitCode::SUCCESS
}

/// Dry run: parse and validate scenarios without executing.
fn dry_run(scenarios: &[Scenario]) -> ExitCode {
    println!("{}", "Dry run - validating scenarios:".bold());
    println!();

    let mut total_checks = 0;
    let mut errors = 0;

    for scenario in scenarios {
        println!("  Scenario: {}", scenario.scenario.green());
        println!("    Program: {}", scenario.program.display());
        println!("    Settle: {}ms, idle: {}ms", scenario.settle_ms, scenario.idle_ms);

        for (index, check) in scenario.checks.iter().enumerate() {
            total_checks += 1;
            print!("    - {}: ", check.label(index));

            match check {
                packtest::scenario::Check::Interactive(c) if c.steps.is_empty() => {
                    println!("{}", "ERROR (no steps)".red());
                    errors += 1;
                }
                packtest::scenario::Check::Interactive(c) => {
                    println!("{} ({} steps)", "OK".green(), c.steps.len());
                }
                _ => println!("{}", "OK".green()),
            }
        }

        println!();
    }

    println!("{}", "Summary:".bold());
    println!("  Scenarios: {}", scenarios.len());
    println!("  Checks: {}", total_checks);

    if errors > 0 {
        println!("  {}: {}", "Errors".red(), errors);
        ExitCode::FAILURE
    } else {
        println!("  {}", "All scenarios valid".green());
        ExitCode::SUCCESS
    }
}
