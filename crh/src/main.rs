//! Codec Reliability Harness - command line runner
//!
//! Runs lifecycle scenarios and loop stress cases against the in-process
//! mock encoder platform.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crh::catalog::promise_scenarios;
use crh::mock::MockPlatform;
use crh::{HarnessConfig, LoopKind, ScenarioTable, Suite, run_loop};
use crh_common::{LogConfig, init_logging};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "crh")]
#[command(author, version, about = "Codec reliability harness - scripted encoder lifecycle tests")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Harness configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scenarios and report the results
    Run {
        /// Only run scenarios whose name contains this string
        #[arg(short, long)]
        filter: Option<String>,

        /// Scenario table to run instead of the built-in catalog
        #[arg(short, long)]
        table: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
        format: OutputFormat,

        /// Directory for per-scenario output files
        #[arg(long)]
        results_dir: Option<PathBuf>,

        /// Also write the JSON report to this file
        #[arg(long)]
        report: Option<PathBuf>,

        /// Push frames back to back and skip the settle pause
        #[arg(long)]
        unpaced: bool,
    },

    /// List scenarios without running them
    List {
        /// Scenario table to list instead of the built-in catalog
        #[arg(short, long)]
        table: Option<PathBuf>,
    },

    /// Run loop stress cases
    Loops {
        /// Iterations per loop (defaults to the configured count)
        #[arg(short = 'n', long)]
        iterations: Option<u32>,

        /// Run a single loop kind instead of all of them
        #[arg(short, long, value_enum)]
        kind: Option<LoopKind>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Pretty,
    Json,
}

fn load_scenarios(table: Option<&Path>) -> Result<ScenarioTable> {
    match table {
        Some(path) => ScenarioTable::load(path)
            .with_context(|| format!("loading scenario table {}", path.display())),
        None => Ok(ScenarioTable::from(promise_scenarios())),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _guards = init_logging(&log_config)?;

    let (mut config, env_errors) = HarnessConfig::resolve(cli.config.as_deref())?;
    for err in &env_errors {
        warn!(error = %err, "ignoring invalid environment override");
    }

    match cli.command {
        Commands::Run {
            filter,
            table,
            format,
            results_dir,
            report,
            unpaced,
        } => {
            let table = load_scenarios(table.as_deref())?.filtered(filter.as_deref());
            if table.scenarios.is_empty() {
                warn!("no scenarios matched");
                return Ok(ExitCode::SUCCESS);
            }
            for (name, finding) in table.check()? {
                warn!(scenario = %name, finding = %finding, "scenario finding");
            }

            if let Some(dir) = results_dir {
                config = config.with_results_dir(dir);
            }
            let mut platform = MockPlatform::new();
            if unpaced {
                platform = platform.with_time_scale(0.0);
                config = config.without_settle();
            }

            let suite = Suite::new(platform, config);
            let result = suite.run_all(&table.scenarios).await;

            match format {
                OutputFormat::Pretty => print!("{}", result.render_pretty()),
                OutputFormat::Json => println!("{}", result.to_json()?),
            }
            if let Some(path) = report {
                result.write_json(&path)?;
                info!(path = %path.display(), "wrote report");
            }

            Ok(if result.all_passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        Commands::List { table } => {
            let table = load_scenarios(table.as_deref())?;
            for scenario in &table.scenarios {
                println!("{:<16} {}", scenario.name, scenario.title);
                println!("{:<16} {}", "", scenario.rendered_steps());
            }
            println!("\n{} scenarios", table.scenarios.len());
            Ok(ExitCode::SUCCESS)
        }

        Commands::Loops {
            iterations,
            kind,
            format,
        } => {
            let iterations = iterations.unwrap_or(config.loop_iterations);
            let kinds = match kind {
                Some(kind) => vec![kind],
                None => LoopKind::ALL.to_vec(),
            };

            let platform = MockPlatform::new();
            let mut reports = Vec::with_capacity(kinds.len());
            for kind in kinds {
                reports.push(run_loop(&platform, &config, kind, iterations).await);
            }

            match format {
                OutputFormat::Pretty => {
                    for report in &reports {
                        println!(
                            "{:<16} {}  {}/{} iterations  max_live={}  {}ms",
                            report.kind,
                            if report.passed { "PASS" } else { "FAIL" },
                            report.completed,
                            report.iterations,
                            report.max_live,
                            report.duration_ms,
                        );
                        if let Some(failure) = &report.failure {
                            println!("{:<16}   - {failure}", "");
                        }
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
            }

            Ok(if reports.iter().all(|report| report.passed) {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}
