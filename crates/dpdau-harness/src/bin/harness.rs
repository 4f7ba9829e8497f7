//! CLI entrypoint for the scenario fixture harness.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use dpdau_harness::{ScenarioRunner, ScenarioSet};

#[derive(Debug, Parser)]
#[command(name = "dpdau-harness")]
#[command(about = "Runs JSON scenario fixtures against the DAU/MAU pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run every scenario fixture under a directory and print a pass/fail report.
    Run {
        /// Directory containing scenario fixture JSON files.
        #[arg(long, default_value = "fixtures")]
        fixtures: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { fixtures } => run(&fixtures),
    }
}

fn run(dir: &std::path::Path) -> ExitCode {
    let mut paths: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect(),
        Err(err) => {
            eprintln!("failed to read fixtures directory {}: {err}", dir.display());
            return ExitCode::FAILURE;
        }
    };
    paths.sort();

    if paths.is_empty() {
        eprintln!("no scenario fixture files found under {}", dir.display());
        return ExitCode::FAILURE;
    }

    let mut total = 0usize;
    let mut failed = 0usize;

    for path in paths {
        let set = match ScenarioSet::from_file(&path) {
            Ok(set) => set,
            Err(err) => {
                eprintln!("{}: failed to load: {err}", path.display());
                failed += 1;
                total += 1;
                continue;
            }
        };

        for case in &set.cases {
            total += 1;
            let result = ScenarioRunner::run(case);
            if result.passed() {
                println!("PASS {} :: {}", path.display(), result.name);
            } else {
                failed += 1;
                println!("FAIL {} :: {}", path.display(), result.name);
                for assertion in &result.assertions {
                    let mark = if assertion.passed { "ok" } else { "FAIL" };
                    let detail = assertion.detail.as_deref().unwrap_or("");
                    println!("  [{mark}] {} {detail}", assertion.description);
                }
            }
        }
    }

    println!("{}/{} scenarios passed", total - failed, total);
    if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
