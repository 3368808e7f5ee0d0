//! strava-extract - resumable, quota-aware extraction of Strava activity data.

mod cli;

use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    cli::run().await
}
