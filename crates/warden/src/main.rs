//! Warden - per-application OpenID Connect reverse-authentication proxy
//!
//! Main entry point for the Warden CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, Registry, prelude::*};

mod commands;

use commands::{check, serve};

/// Console filter used without `-v`.
const DEFAULT_FILTER: &str = "warden=info,warden_proxy=info,warden_config=info,warn";

/// Console filter used with `-v`.
const VERBOSE_FILTER: &str =
    "warden=debug,warden_proxy=debug,warden_config=debug,tower_http=debug,info";

/// Filter for the rotating JSON log file.
const FILE_FILTER: &str = "warden=trace,warden_proxy=trace,warden_config=trace,info";

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Warden - per-application OpenID Connect reverse-authentication proxy
#[derive(Parser)]
#[command(name = "warden")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (console logs and command reports)
    #[arg(long, global = true)]
    pub json: bool,

    /// Also write daily-rotated JSON logs to this directory
    #[arg(long, global = true, env = "WARDEN_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve all configured providers
    Serve(serve::ServeArgs),

    /// Build every provider and report, without serving
    Check(check::CheckArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _guard = init_tracing(&cli);

    let ctx = commands::Context {
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Serve(args) => serve::run(args, &ctx).await,
        Commands::Check(args) => check::run(args, &ctx).await,
    }
}

/// Console logging plus an optional rotating JSON file.
///
/// `RUST_LOG` overrides the console filter. The returned guard must live
/// until exit so buffered file logs are flushed.
fn init_tracing(cli: &Cli) -> Option<WorkerGuard> {
    let default_filter = if cli.verbose {
        VERBOSE_FILTER
    } else {
        DEFAULT_FILTER
    };
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let console = tracing_subscriber::fmt::layer().with_target(true);
    if cli.json {
        layers.push(console.json().with_filter(console_filter).boxed());
    } else {
        layers.push(console.with_filter(console_filter).boxed());
    }

    let guard = cli.log_dir.as_ref().map(|log_dir| {
        let file_appender = tracing_appender::rolling::daily(log_dir, "warden.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        layers.push(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(EnvFilter::new(FILE_FILTER))
                .boxed(),
        );
        guard
    });

    tracing_subscriber::registry().with(layers).init();
    guard
}
