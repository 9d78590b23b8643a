//! `weekly-intel`: run the weekly intelligence pipeline.
//!
//! # Usage
//!
//! ```bash
//! # Run (or resume) this week's briefing
//! POE_API_KEY=... weekly-intel run --config config.yaml
//!
//! # Regenerate the briefing and everything after it for a past date
//! weekly-intel run --date 2026-10-18 --rerun global_briefing
//!
//! # Inspect checkpoints
//! weekly-intel status --date 2026-10-18
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use briefing_agents::llm::{ModelClient, OpenAiCompatClient, UnconfiguredClient};
use briefing_agents::summary::render_checkpoint_status;
use briefing_agents::{PhaseOrchestrator, PhaseServices, RunConfig, RunContext};
use briefing_core::{CheckpointStore, PhaseId, RunKey};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every phase whose checkpoint is not complete
    Run {
        /// Path to the YAML run configuration
        #[arg(long, default_value = "config.yaml")]
        config: PathBuf,

        /// Run date (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Output root (overrides `output_directory`)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Invalidate a phase (and everything downstream) before running.
        /// Accepts `5`, `p5`, `global_briefing` or `p5_global_briefing`.
        #[arg(long, value_name = "PHASE")]
        rerun: Vec<PhaseId>,
    },

    /// Print the checkpoint table for a run
    Status {
        #[arg(long, default_value = "config.yaml")]
        config: PathBuf,

        #[arg(long)]
        date: Option<NaiveDate>,

        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Load and validate the configuration only
    ValidateConfig {
        #[arg(long, default_value = "config.yaml")]
        config: PathBuf,
    },
}

fn load_config(path: &Path, output: Option<PathBuf>) -> Result<RunConfig> {
    let mut config = RunConfig::load(path).with_context(|| format!("failed to load {}", path.display()))?;
    if let Some(output) = output {
        config.output_directory = output;
    }
    Ok(config)
}

fn run_date(date: Option<NaiveDate>) -> NaiveDate {
    date.unwrap_or_else(|| chrono::Local::now().date_naive())
}

fn model_client(config: &RunConfig) -> Result<Arc<dyn ModelClient>> {
    match config.api_key() {
        Some(key) => {
            let client = OpenAiCompatClient::new(
                &config.model.base_url,
                Some(key),
                Duration::from_secs(config.model.timeout_secs),
            )?;
            Ok(Arc::new(client))
        }
        None => {
            warn!(
                env = %config.model.api_key_env,
                "API key not set; every model call will be marked as failed"
            );
            Ok(Arc::new(UnconfiguredClient::new(format!(
                "{} is not set",
                config.model.api_key_env
            ))))
        }
    }
}

async fn run(config: RunConfig, date: NaiveDate, rerun: Vec<PhaseId>) -> Result<ExitCode> {
    let client = model_client(&config)?;
    let services = PhaseServices::http(&config, client)?;
    let ctx = RunContext::new(config, date);

    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping the run");
            cancel.cancel();
        }
    });

    let mut orchestrator = PhaseOrchestrator::new(ctx, services);
    let summary = orchestrator.run(&rerun).await?;

    if summary.successful {
        info!(run_key = %summary.run_key, warnings = summary.total_warnings(), "Run complete");
        Ok(ExitCode::SUCCESS)
    } else {
        warn!(run_key = %summary.run_key, aborted = summary.aborted, "Run did not complete");
        Ok(ExitCode::FAILURE)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Command::Run {
            config,
            date,
            output,
            rerun,
        } => {
            let config = load_config(&config, output)?;
            run(config, run_date(date), rerun).await
        }
        Command::Status { config, date, output } => {
            let config = load_config(&config, output)?;
            let run_key = RunKey::from_date(run_date(date));
            let store = CheckpointStore::new(config.output_directory);
            let rows = store.status(&run_key)?;
            println!("{}", render_checkpoint_status(&run_key, &rows));
            Ok(ExitCode::SUCCESS)
        }
        Command::ValidateConfig { config } => {
            let loaded = load_config(&config, None)?;
            println!(
                "{}: OK ({} sources, model endpoint {})",
                config.display(),
                loaded.sources.len(),
                loaded.model.base_url
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}
