//! cartographe: classify candidate companies with Gemini.
//!
//! Subcommands:
//! - `run`: classify new companies, resuming from the checkpoint.
//! - `reprocess`: retry companies logged in the error file.
//! - `check-keys`: probe each configured API key.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use cartographe::keys::{self, KeyState};
use cartographe::reprocess::{self, ReprocessOptions};
use cartographe::{ClassifyProvider, Config, Secrets, pipeline};

/// Cartographe: Gen-AI startup classifier.
#[derive(Parser)]
#[command(name = "cartographe")]
#[command(version = cartographe::PKG_VERSION)]
#[command(about = "Classify companies as Gen-AI startups with a Gemini model")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify new companies, skipping those already catalogued or checkpointed.
    Run {
        /// Use one worker per API key (up to `workers.count`).
        #[arg(long)]
        parallel: bool,
    },
    /// Retry companies listed in the error file.
    Reprocess {
        /// Maximum number of companies to retry (default: `reprocess.max_per_run`).
        #[arg(long)]
        max: Option<usize>,
        /// Error file to read and rewrite (default: `files.errors`).
        #[arg(long)]
        error_file: Option<PathBuf>,
    },
    /// Probe every configured API key.
    CheckKeys,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;
    let api_keys = Secrets::load()?.require_api_keys()?;
    info!(
        version = cartographe::PKG_VERSION,
        model = %config.model.name,
        keys = api_keys.len(),
        "cartographe starting"
    );

    match args.command {
        Command::Run { parallel } => {
            let report = pipeline::run(&config, &api_keys, parallel).await?;
            println!(
                "Considered {}, skipped {}, classified {}: {} added, {} not Gen-AI startups, {} failed.",
                report.considered,
                report.skipped,
                report.classified(),
                report.accepted,
                report.rejected,
                report.failed,
            );
            if report.failed > 0 {
                println!(
                    "Failures were logged to {}; run `cartographe reprocess` to retry them.",
                    config.files.errors.display()
                );
            }
        }
        Command::Reprocess { max, error_file } => {
            let mut options = ReprocessOptions::from_config(&config);
            if let Some(max) = max {
                options.max_per_run = max.max(1);
            }
            if let Some(path) = error_file {
                options.error_file = path;
            }
            let provider = pipeline::sequential_provider(&config, &api_keys[0]);
            let report = reprocess::reprocess(&config, provider.as_ref(), &options).await?;
            println!(
                "Reprocessed {}: {} succeeded ({} added), {} still failing, {} left in {}.",
                report.attempted,
                report.succeeded,
                report.accepted,
                report.still_failed,
                report.remaining,
                options.error_file.display(),
            );
        }
        Command::CheckKeys => {
            let make_provider = |key: &str| -> Arc<dyn ClassifyProvider> {
                Arc::new(config.gemini_client(key))
            };
            let report = keys::check_keys(&api_keys, make_provider).await?;
            for status in &report.statuses {
                let verdict = match &status.state {
                    KeyState::Valid => format!("valid ({:.2}s)", status.elapsed.as_secs_f64()),
                    KeyState::RateLimited => "rate limited, usable".to_string(),
                    KeyState::Rejected => "rejected".to_string(),
                    KeyState::Failed(reason) => format!("error: {reason}"),
                };
                println!("Key {} ({}): {verdict}", status.index, status.masked);
            }
            println!(
                "{} of {} keys usable.",
                report.usable(),
                report.statuses.len()
            );
            if report.usable() == 0 {
                return Err("no usable API key".into());
            }
            println!("Recommended configuration:");
            println!("  [workers]\n  count = {}", report.recommended_workers());
            println!(
                "  [rate_limit]\n  quota_per_minute = {}",
                report.recommended_quota_per_minute()
            );
        }
    }

    Ok(())
}
