//! CLI entrypoint for the ermalloc harness.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use ermalloc_harness::scenario::{builtin_scenarios, run_suite};
use ermalloc_harness::stress::run_stress;
use ermalloc_harness::{HarnessReport, LogEmitter, LogEntry, LogLevel, Outcome, StressConfig};
use ermalloc_membrane::{HeapMode, ProtectedHeap};

/// Fault-injection and stress tooling for ermalloc.
#[derive(Debug, Parser)]
#[command(name = "ermalloc-harness")]
#[command(about = "Fault-injection scenarios and stress runs for ermalloc")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the built-in fault-injection scenarios.
    Scenario {
        /// Only run scenarios whose name contains this string.
        #[arg(long)]
        filter: Option<String>,
        /// JSONL log output path.
        #[arg(long)]
        log: Option<PathBuf>,
        /// Report output path (markdown; JSON is written next to it).
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Run concurrent allocate/inject/enforce workers.
    Stress {
        /// Root seed (decimal or 0x...).
        #[arg(long, default_value = "0xE24A11")]
        seed: String,
        /// Worker threads.
        #[arg(long, default_value_t = 4)]
        threads: usize,
        /// Steps per worker.
        #[arg(long, default_value_t = 5_000)]
        steps: usize,
        /// Largest logical block size.
        #[arg(long, default_value_t = 512)]
        max_size: usize,
        /// JSONL log output path.
        #[arg(long)]
        log: Option<PathBuf>,
        /// Report output path (markdown; JSON is written next to it).
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

fn parse_seed(raw: &str) -> Result<u64, String> {
    let cleaned = raw.replace('_', "");
    let parsed = match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => cleaned.parse(),
    };
    parsed.map_err(|e| format!("invalid seed '{raw}': {e}"))
}

fn timestamp() -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:03}", now.as_secs(), now.subsec_millis())
}

fn write_report(doc: &HarnessReport, path: &Path) -> std::io::Result<()> {
    eprintln!("Writing report to {}", path.display());
    std::fs::write(path, doc.to_markdown())?;
    std::fs::write(path.with_extension("json"), doc.to_json())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let heap = ProtectedHeap::from_env();
    if heap.config().mode == HeapMode::Passthrough {
        return Err("ERMALLOC_MODE=passthrough disables protection; unset it to run the harness".into());
    }

    match cli.command {
        Command::Scenario {
            filter,
            log,
            report,
        } => {
            let scenarios: Vec<_> = builtin_scenarios()?
                .into_iter()
                .filter(|s| filter.as_deref().is_none_or(|f| s.name.contains(f)))
                .collect();
            if scenarios.is_empty() {
                return Err("No scenario matches the filter".into());
            }

            let results = match log {
                Some(path) => {
                    let mut emitter = LogEmitter::to_file(&path, "scenario")?;
                    run_suite(&heap, &scenarios, &mut emitter)?
                }
                None => {
                    let mut emitter = LogEmitter::new(std::io::sink(), "scenario");
                    run_suite(&heap, &scenarios, &mut emitter)?
                }
            };
            heap.teardown();

            let doc = HarnessReport {
                title: String::from("ermalloc scenario report"),
                mode: String::from("enforcing"),
                timestamp: timestamp(),
                scenarios: results,
                stress: None,
            };
            eprintln!(
                "Scenarios complete: total={}, failed={}",
                doc.scenarios.len(),
                doc.failed()
            );
            if let Some(path) = report {
                write_report(&doc, &path)?;
            } else {
                print!("{}", doc.to_markdown());
            }
            if !doc.all_passed() {
                return Err("Scenario verification failed".into());
            }
        }
        Command::Stress {
            seed,
            threads,
            steps,
            max_size,
            log,
            report,
        } => {
            let config = StressConfig {
                seed: parse_seed(&seed)?,
                threads,
                steps,
                max_size,
            };
            eprintln!("Running stress: seed={:#x} threads={threads} steps={steps}", config.seed);
            let started = std::time::Instant::now();
            let summary = run_stress(&heap, config)?;
            let elapsed = started.elapsed();
            let released = heap.teardown();

            if let Some(path) = log {
                let mut emitter = LogEmitter::to_file(&path, "stress")?;
                let (level, outcome) = if summary.is_clean() {
                    (LogLevel::Info, Outcome::Pass)
                } else {
                    (LogLevel::Error, Outcome::Fail)
                };
                emitter.emit_entry(
                    LogEntry::new("", level, "stress_end")
                        .with_outcome(outcome)
                        .with_latency_ns(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
                        .with_details(serde_json::to_value(&summary)?),
                )?;
                emitter.flush()?;
            }

            let doc = HarnessReport {
                title: String::from("ermalloc stress report"),
                mode: String::from("enforcing"),
                timestamp: timestamp(),
                scenarios: Vec::new(),
                stress: Some(summary),
            };
            eprintln!("Stress complete in {elapsed:?}, released {released} blocks");
            if let Some(path) = report {
                write_report(&doc, &path)?;
            } else {
                print!("{}", doc.to_markdown());
            }
            if !doc.all_passed() {
                return Err("Stress run found violations".into());
            }
        }
    }
    Ok(())
}
