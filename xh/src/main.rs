//! XHarness - integration test harness runner
//!
//! Loads a TOML harness definition, runs it and writes one XML result
//! record per finished task.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use xh::summary::TestCounter;
use xh::{HarnessFile, RunSummary};
use xh_common::{HarnessConfig, Project};

#[derive(Parser)]
#[command(name = "xh")]
#[command(author, version, about = "XHarness - integration test harness runner")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a harness definition
    Run {
        /// Harness definition (TOML)
        file: PathBuf,

        /// Directory for result records
        #[arg(short, long)]
        results: Option<PathBuf>,

        /// Only run test groups and cases matching this path pattern
        #[arg(short, long)]
        pattern: Option<String>,

        /// Set a user property (repeatable)
        #[arg(
            short = 'D',
            long = "property",
            value_name = "NAME=VALUE",
            value_parser = parse_property
        )]
        properties: Vec<(String, String)>,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Parse and build a harness definition without running it
    Check {
        /// Harness definition (TOML)
        file: PathBuf,
    },
}

fn parse_property(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got '{value}'")),
    }
}

fn harness_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "xharness".to_string())
}

fn base_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Command::Run {
            file,
            results,
            pattern,
            properties,
            json,
        } => run(&file, results, pattern, properties, json),
        Command::Check { file } => check(&file),
    }
}

fn run(
    path: &Path,
    results: Option<PathBuf>,
    pattern: Option<String>,
    properties: Vec<(String, String)>,
    json: bool,
) -> Result<ExitCode> {
    let mut config = HarnessConfig::from_env().map_err(|errors| {
        let lines: Vec<String> = errors.iter().map(ToString::to_string).collect();
        anyhow!("invalid environment:\n  {}", lines.join("\n  "))
    })?;

    let file = HarnessFile::load(path)?;
    file.harness.apply(&mut config);
    if let Some(results) = results {
        config.results_dir = results;
    }
    if pattern.is_some() {
        config.pattern = pattern;
    }

    let fallback = harness_name(path);
    let name = file.name_or(&fallback).to_string();
    let harness = file
        .build(&name)
        .with_context(|| format!("building harness from {}", path.display()))?;

    let project = Arc::new(Project::new(&name, base_dir(path)));
    for (key, value) in &file.properties {
        project.set_property(key, value);
    }
    for (key, value) in properties {
        project.set_user_property(key, value);
    }
    let counter = Arc::new(TestCounter::default());
    let listener = project.add_build_listener(counter.clone());

    let results_dir = project.resolve(&config.results_dir);
    info!(harness = %name, results = %results_dir.display(), "Starting harness");
    debug!(?config, "Run configuration");

    let started_at = Utc::now();
    let result = harness.run(Arc::clone(&project), config);
    project.remove_build_listener(listener);

    let summary = RunSummary::new(name, started_at, results_dir, counter.counts(), &result);
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{summary}");
    }

    Ok(if summary.passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn check(path: &Path) -> Result<ExitCode> {
    let file = HarnessFile::load(path)?;
    let fallback = harness_name(path);
    let name = file.name_or(&fallback);
    file.build(name)
        .with_context(|| format!("building harness from {}", path.display()))?;
    println!("{name}: {} tasks OK", file.task_count());
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_property() {
        assert_eq!(
            parse_property("db.host=localhost").unwrap(),
            ("db.host".to_string(), "localhost".to_string())
        );
        assert_eq!(
            parse_property("url=a=b").unwrap(),
            ("url".to_string(), "a=b".to_string())
        );
        assert!(parse_property("novalue").is_err());
        assert!(parse_property("=x").is_err());
    }

    #[test]
    fn test_harness_name_and_base_dir() {
        assert_eq!(harness_name(Path::new("suites/smoke.toml")), "smoke");
        assert_eq!(base_dir(Path::new("suites/smoke.toml")), PathBuf::from("suites"));
        assert_eq!(base_dir(Path::new("smoke.toml")), PathBuf::from("."));
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "xh", "run", "smoke.toml", "-D", "a=1", "--property", "b=2", "--pattern", "g/*",
        ])
        .unwrap();
        match cli.command {
            Command::Run {
                properties,
                pattern,
                ..
            } => {
                assert_eq!(properties.len(), 2);
                assert_eq!(pattern.as_deref(), Some("g/*"));
            }
            Command::Check { .. } => panic!("expected run"),
        }
    }
}
