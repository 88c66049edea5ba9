//! Top-level application orchestration.
//!
//! `src/main.rs` stays tiny; this module is the real entry point that:
//! - loads `.env` and installs the log subscriber
//! - parses CLI arguments
//! - runs the selected command and prints its report

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, ExtremaArgs, FitArgs, GridInfoArgs, MockArgs, ReportArgs};
use crate::error::AppError;

pub mod pipeline;

/// Entry point for the `pvsil` binary.
pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Command::Mock(args) => handle_mock(&args),
        Command::Fit(args) => handle_fit(&args),
        Command::Extrema(args) => handle_extrema(&args),
        Command::Report(args) => handle_report(&args),
        Command::Grid(args) => handle_grid(&args),
    }
}

/// Log to stderr, filtered by `PVSIL_LOG` (default `info`).
fn init_logging() {
    let filter = EnvFilter::try_from_env("PVSIL_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    // A subscriber may already be installed when embedded; keep that one.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn handle_mock(args: &MockArgs) -> Result<(), AppError> {
    let run = pipeline::run_mock(args)?;
    println!("{}", crate::report::format_grid(run.mock.grid()));
    println!("{}", crate::report::format_mock_summary(&run.pvs, &run.params));
    for path in &run.written {
        println!("wrote {}", path.display());
    }
    Ok(())
}

fn handle_fit(args: &FitArgs) -> Result<(), AppError> {
    let run = pipeline::run_fit(args)?;
    println!("{}", crate::report::format_fit_result(&run.result));
    println!("{}", crate::report::format_residuals(&run.residuals));
    println!("wrote {}", run.table.display());
    println!("wrote {}", run.export.display());
    Ok(())
}

fn handle_extrema(args: &ExtremaArgs) -> Result<(), AppError> {
    let (offsets, extrema) = pipeline::run_extrema(args)?;
    println!("{}", crate::report::format_extrema(&offsets, &extrema));
    Ok(())
}

fn handle_report(args: &ReportArgs) -> Result<(), AppError> {
    let result = crate::io::read_fit_result(&args.table)?;
    println!("{}", crate::report::format_fit_result(&result));
    Ok(())
}

fn handle_grid(args: &GridInfoArgs) -> Result<(), AppError> {
    let mock = pipeline::run_grid(args)?;
    println!("{}", crate::report::format_grid(mock.grid()));
    Ok(())
}
