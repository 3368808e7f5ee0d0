//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod extract;
mod reset;
mod status;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use console::style;

use strava_extract::config::{load_settings_with_options, LoadOptions};
use strava_extract::error::EXIT_FAILURE;
use strava_extract::logging::{self, LogOptions};

#[derive(Parser)]
#[command(name = "strava-extract")]
#[command(about = "Resumable, quota-aware extraction of Strava activity data")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true, env = "STRAVA_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Resolve relative paths from current working directory instead of config file location
    #[arg(long, global = true)]
    cwd: bool,

    /// Rate limit state file (overrides config)
    #[arg(long, global = true)]
    state_file: Option<PathBuf>,

    /// Log level for this crate (e.g. debug, info, warn)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract activities, streams and zones
    Run {
        /// Start of the window (YYYY-MM-DD); defaults to the lookback period
        #[arg(long)]
        start_date: Option<String>,
        /// End of the window (YYYY-MM-DD); defaults to now
        #[arg(long)]
        end_date: Option<String>,
        /// Wait silently instead of showing a countdown while rate limited
        #[arg(long)]
        no_progress: bool,
    },

    /// Show persisted rate limit state without issuing requests
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Reset persisted rate limit state
    Reset {
        /// Actually reset (otherwise only describes what would happen)
        #[arg(long)]
        confirm: bool,
        /// Delete the state file instead of writing a fresh one
        #[arg(long)]
        delete: bool,
    },
}

/// Parse arguments, load settings, and run the selected command.
pub async fn run() -> ExitCode {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        use_cwd: cli.cwd,
    };
    let (mut settings, _config) = match load_settings_with_options(options).await {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{} {}", style("✗").red(), e);
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    if let Some(path) = cli.state_file {
        settings.state_file = path;
    }
    if let Some(level) = cli.log_level {
        settings.log_level = level;
    }

    if let Err(e) = logging::init(&LogOptions::from_settings(&settings, cli.verbose)) {
        eprintln!(
            "{} Failed to open log file, logging to stderr: {}",
            style("!").yellow(),
            e
        );
        settings.log_file = None;
        let _ = logging::init(&LogOptions::from_settings(&settings, cli.verbose));
    }

    let result = match cli.command {
        Commands::Run {
            start_date,
            end_date,
            no_progress,
        } => {
            if no_progress {
                settings.show_progress = false;
            }
            return extract::cmd_run(settings, start_date, end_date).await;
        }
        Commands::Status { json } => status::cmd_status(&settings, json),
        Commands::Reset { confirm, delete } => reset::cmd_reset(&settings, confirm, delete),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", style("✗").red(), e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
