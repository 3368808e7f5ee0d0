//! Extraction run command.

use std::process::ExitCode;

use chrono::Local;
use console::style;

use strava_extract::client::Credentials;
use strava_extract::config::Settings;
use strava_extract::error::{ExtractError, EXIT_INTERRUPTED};
use strava_extract::pipeline::{Pipeline, RunSummary};
use strava_extract::validate::validate_date_range;

/// Run one extraction and map the outcome to an exit status.
pub async fn cmd_run(
    settings: Settings,
    start_date: Option<String>,
    end_date: Option<String>,
) -> ExitCode {
    let pipeline = Pipeline::new(settings);

    match execute(&pipeline, start_date.as_deref(), end_date.as_deref()).await {
        Ok(summary) => {
            print_summary(&summary);
            ExitCode::SUCCESS
        }
        Err(ExtractError::Interrupted) => {
            eprintln!("\n{} Interrupted", style("!").yellow());
            // A blocked rate limit sleep would otherwise hold the runtime open.
            std::process::exit(i32::from(EXIT_INTERRUPTED));
        }
        Err(e) => {
            if let Some(resume_after) = e.resume_after() {
                eprintln!("{} {}", style("⏸").yellow(), e);
                eprintln!(
                    "  Next run may start after {}",
                    resume_after
                        .with_timezone(&Local)
                        .format("%Y-%m-%d %H:%M:%S %Z")
                );
                if let Some(checkpoint) = pipeline.limiter().checkpoint() {
                    eprintln!(
                        "  Will resume after {} {}",
                        checkpoint.resource, checkpoint.cursor
                    );
                }
            } else {
                eprintln!("{} {}", style("✗").red(), e);
            }
            ExitCode::from(e.exit_code())
        }
    }
}

async fn execute(
    pipeline: &Pipeline,
    start_date: Option<&str>,
    end_date: Option<&str>,
) -> strava_extract::Result<RunSummary> {
    let range = validate_date_range(start_date, end_date)?;
    let credentials = Credentials::from_env()?;

    tokio::select! {
        result = pipeline.run(range, credentials) => result,
        _ = tokio::signal::ctrl_c() => Err(ExtractError::Interrupted),
    }
}

fn print_summary(summary: &RunSummary) {
    println!("{} Extraction complete", style("✓").green());
    if let Some(ref checkpoint) = summary.resumed_from {
        println!(
            "  Resumed after {} {} ({} already extracted)",
            checkpoint.resource, checkpoint.cursor, summary.skipped_activities
        );
    }
    for (resource, count) in &summary.records {
        println!("  {:<20} {}", format!("{}:", resource), count);
    }
    println!("  {:<20} {}", "Requests (session):", summary.session_requests);
    println!("  {:<20} {}", "Requests (today):", summary.requests_today);
    println!(
        "  {:<20} {:.1}s",
        "Duration:",
        summary.duration.as_secs_f64()
    );
}
