//! Command-line frontend
//!
//! Thin glue standing in for a UI: parse arguments, wire the progress watch
//! channel to an indicatif bar, submit one file and save the PNG result. All
//! pipeline logic lives in the library.

use crate::config::{ExecutionProvider, PipelineConfig};
use crate::inference::DefaultBackendFactory;
use crate::models::ModelSpec;
use crate::orchestrator::Orchestrator;
use crate::progress::ProgressState;
use crate::worker::WorkerHandle;
use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "cutout",
    version,
    about = "Remove the background from an image, entirely on-device"
)]
struct Cli {
    /// Input image (PNG, JPEG, WebP)
    input: PathBuf,

    /// Output path; defaults to `<input>-cutout.png`
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Execution provider: auto, cpu, cuda, coreml
    #[arg(long, default_value = "auto")]
    provider: String,

    /// Model repository URL (HuggingFace)
    #[arg(long)]
    model_url: Option<String>,

    /// Fail on a cache miss instead of downloading the model
    #[arg(long)]
    no_download: bool,

    /// Suppress the progress bar
    #[arg(short, long)]
    quiet: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// CLI entry point, called from the binary
///
/// # Errors
/// Returns any pipeline or IO error, with context for the user.
pub async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = PipelineConfig::builder()
        .execution_provider(ExecutionProvider::parse(&cli.provider)?)
        .allow_download(!cli.no_download);
    if let Some(url) = &cli.model_url {
        config = config.model(ModelSpec::from_url(url.clone())?);
    }
    let config = config.build()?;

    let worker = WorkerHandle::spawn(config, Arc::new(DefaultBackendFactory))?;
    let orchestrator = Orchestrator::with_worker(worker);

    let bar = if cli.quiet {
        None
    } else {
        Some(spawn_progress_bar(&orchestrator))
    };

    let result = orchestrator
        .submit_file(&cli.input)
        .await
        .with_context(|| format!("Failed to process '{}'", cli.input.display()))?;

    if let Some(bar) = bar {
        bar.await.ok();
    }

    let output = cli
        .output
        .unwrap_or_else(|| default_output_path(&cli.input));
    result
        .save_png(&output)
        .with_context(|| format!("Failed to write '{}'", output.display()))?;

    println!("{} -> {}", cli.input.display(), output.display());
    Ok(())
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::EnvFilter;

    let default_level = match verbose {
        0 => "warn",
        1 => "cutout=info",
        _ => "cutout=debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Mirror the progress watch channel onto a terminal bar
fn spawn_progress_bar(orchestrator: &Orchestrator) -> tokio::task::JoinHandle<()> {
    let mut progress = orchestrator.progress();

    tokio::spawn(async move {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {percent}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar.enable_steady_tick(Duration::from_millis(120));

        while progress.changed().await.is_ok() {
            let state = progress.borrow_and_update().clone();
            match state {
                ProgressState::Idle => {},
                ProgressState::LoadingModel { percent, message } => {
                    bar.set_position(u64::from(percent.unwrap_or(0)));
                    bar.set_message(message);
                },
                ProgressState::Processing => {
                    bar.set_position(100);
                    bar.set_message("Processing image...");
                },
                ProgressState::Complete => {
                    bar.finish_with_message("Done");
                    break;
                },
                ProgressState::Error { message } => {
                    bar.abandon_with_message(message);
                    break;
                },
            }
        }
    })
}

fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map_or_else(|| "output".to_string(), |s| s.to_string_lossy().into_owned());
    input.with_file_name(format!("{stem}-cutout.png"))
}
