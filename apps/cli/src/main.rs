//! EchoTwin CLI - Command-line interface for the EchoTwin training pipeline
//!
//! This CLI provides an `echotwin` command that prepares a voice dataset,
//! writes the training config and launches the external trainer.

mod commands;
mod config;

use clap::{CommandFactory, Parser, Subcommand};
use colored::Colorize;
use echotwin_training::StageFailure;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{configure, fetch, probe, sanitize, show_config, train};

/// EchoTwin CLI - voice-clone fine-tuning pipeline
///
/// Sanitizes a `metadata.csv` dataset, detects accelerated compute, writes a
/// YourTTS training config and runs the trainer against it.
#[derive(Parser, Debug)]
#[command(
    name = "echotwin",
    author,
    version,
    about = "EchoTwin - prepare and launch voice-clone fine-tuning",
    long_about = "EchoTwin prepares a transcribed voice dataset and launches a multilingual, multi-speaker\nvoice-cloning fine-tune through an external trainer."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Settings file (replaces ~/.echotwin/config.toml and ./echotwin.toml)
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    /// Dataset directory holding metadata.csv (overrides ECHOTWIN_DATASET_DIR)
    #[arg(long, global = true)]
    dataset_dir: Option<PathBuf>,

    /// Where the training config is written (overrides ECHOTWIN_CONFIG_PATH)
    #[arg(long, global = true)]
    config_path: Option<PathBuf>,

    /// Training output directory (overrides ECHOTWIN_OUTPUT_DIR)
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download and extract the dataset archive
    ///
    /// Skipped when the dataset directory already has a metadata.csv.
    Fetch {
        /// Google Drive file id, http(s) URL or local zip path
        #[arg(long)]
        archive: Option<String>,
    },

    /// Drop manifest rows with missing audio or empty transcripts
    Sanitize {
        /// Keep the original manifest as metadata.csv.bak
        #[arg(long)]
        backup: bool,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Detect whether accelerated compute is available
    Probe {
        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Probe the hardware and write the training config
    Configure {
        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the full pipeline: fetch, sanitize, configure, dispatch
    ///
    /// Exits with the trainer's exit code when the training job fails.
    Train {
        /// Do not fetch the dataset archive even if one is configured
        #[arg(long)]
        skip_fetch: bool,

        /// Stop after writing the config without launching the trainer
        #[arg(long)]
        dry_run: bool,

        /// Keep the original manifest as metadata.csv.bak
        #[arg(long)]
        backup: bool,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Pretty-print the persisted training config
    ShowConfig {
        /// Print only the config path
        #[arg(long)]
        path: bool,
    },
}

fn parse_level(level: &str) -> Level {
    match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(err) = run(args).await {
        eprintln!("{} {:#}", "Error:".red().bold(), err);
        let code = err
            .downcast_ref::<StageFailure>()
            .and_then(|failure| failure.error.job_exit_code())
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut settings = config::load_settings(args.settings.as_deref())?;
    config::apply_overrides(
        &mut settings,
        config::PathOverrides {
            dataset_dir: args.dataset_dir,
            config_path: args.config_path,
            output_dir: args.output_dir,
        },
    );

    // Flag first, then the settings file
    let level = args.log_level.as_deref().or(settings.log_level.as_deref()).map_or(Level::INFO, parse_level);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(());
    };

    match command {
        Command::Fetch { archive } => fetch::execute(&settings, archive).await,
        Command::Sanitize { backup, json } => sanitize::execute(&settings, backup, json),
        Command::Probe { json } => probe::execute(&settings, json).await,
        Command::Configure { json } => configure::execute(&settings, json).await,
        Command::Train { skip_fetch, dry_run, backup, json } => {
            train::execute(&settings, train::TrainOptions { skip_fetch, dry_run, backup, json }).await
        }
        Command::ShowConfig { path } => show_config::execute(&settings, path),
    }
}
