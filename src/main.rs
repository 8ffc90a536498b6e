//! audioconv CLI entry point

use audioconv::config::{Cli, Settings};
use audioconv::pipeline::{self, BatchResult};
use audioconv::{Error, Result};
use clap::Parser;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let outcome = validate_inputs(&cli).and_then(|()| pipeline::run(&Settings::from_cli(&cli)));

    match outcome {
        Ok(result) => {
            print_summary(&result);
            // any failed conversion makes the run fail, skips do not
            if result.failed > 0 {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e @ (Error::FileNotFound(_) | Error::ConfigError(_))) => {
            eprintln!("Error: {}", e);
            ExitCode::from(2)
        }
        Err(e) => {
            error!("Batch aborted: {}", e);
            eprintln!("Fatal error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(cli: &Cli) {
    let default_directive = cli.log_level().as_str().to_ascii_lowercase();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive)),
        )
        .with_target(false)
        .init();
}

fn print_summary(result: &BatchResult) {
    println!();
    println!(
        "Summary: {} converted, {} failed, {} skipped (of {} total)",
        result.successful, result.failed, result.skipped, result.total_files
    );
}

fn validate_inputs(cli: &Cli) -> Result<()> {
    if !cli.input.exists() {
        return Err(Error::FileNotFound(cli.input.clone()));
    }

    let parent = cli.output.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = parent.filter(|p| !p.exists()) {
        return Err(Error::ConfigError(format!(
            "Output parent directory does not exist: {}\n  Tip: The output directory is created automatically, its parent is not.\n  Example: mkdir -p {}",
            parent.display(),
            parent.display()
        )));
    }

    if !(-0.1..=1.0).contains(&cli.quality) {
        return Err(Error::ConfigError(format!(
            "Quality {} is out of range\n  Tip: Use a value between -0.1 and 1.0 (default 0.4)",
            cli.quality
        )));
    }

    Ok(())
}
