//! focus-guard: local focus blocker
//!
//! Entry point for the focus-guard binary. Parses the CLI, sets up diagnostic
//! logging and runs the daemon until Ctrl-C.
//!
//! # Output
//!
//! - **Audit logging**: decisions go to the audit file, never to the terminal
//! - **Debug logging**: `tracing` output on stderr, quiet unless `-v` or
//!   `RUST_LOG` is given
//! - **stdout**: the bound endpoints, printed once at startup

use anyhow::{Context, Result};
use clap::Parser;
use focus_guard::{cli::Cli, orchestrator, sysproxy};
use tracing::debug;

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose)?;

    debug!("Parsed CLI arguments: {:?}", cli);

    if cli.disable_pac {
        sysproxy::clear_pac().context("Failed to clear system PAC setting")?;
        println!("Per-user PAC disabled.");
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(orchestrator::run(&cli))
}

/// Initialize the tracing subscriber for debug/development logging.
///
/// This is separate from the audit trail, which goes to its own file.
///
/// # Verbosity Levels
/// - 0 (default): `RUST_LOG` if set, otherwise warnings and errors
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
fn init_tracing(verbose: u8) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
