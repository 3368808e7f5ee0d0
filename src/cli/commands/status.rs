//! Rate limit status command.

use chrono::{DateTime, Local, Utc};
use console::style;

use strava_extract::config::Settings;
use strava_extract::rate_limit::RateLimiter;

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Show persisted rate limit state. Issues no requests.
pub fn cmd_status(settings: &Settings, json: bool) -> anyhow::Result<()> {
    let limiter = RateLimiter::new(settings.rate_limiter_config());
    let state = limiter.snapshot();
    let resume = limiter.get_resume_info();

    if json {
        let out = serde_json::json!({
            "state_file": settings.state_file,
            "halted": resume.is_some(),
            "state": state,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("\n{}", style("Rate Limit Status").bold());
    println!("{}", "-".repeat(40));

    let status_str = match resume {
        Some(ref info) => style(format!("Halted until {}", format_time(Some(info.resume_after))))
            .yellow()
            .to_string(),
        None => style("Ready").green().to_string(),
    };
    println!("{:<20} {}", "Status:", status_str);
    println!("{:<20} {}", "State File:", settings.state_file.display());
    println!("{:<20} {}", "Requests Today:", state.total_requests_today);
    println!("{:<20} {}", "Day Started:", format_time(state.day_start));
    println!("{:<20} {}", "Last 429:", format_time(state.last_429_time));
    println!(
        "{:<20} {}",
        "Since Last 429:", state.requests_since_last_429
    );

    if let Some(ref url) = state.current_request_url {
        println!(
            "{:<20} {} ({})",
            "Current Retries:", state.current_request_retries, url
        );
    }

    match state.last_successful_checkpoint {
        Some(ref checkpoint) => println!(
            "{:<20} {} {}",
            "Checkpoint:", checkpoint.resource, checkpoint.cursor
        ),
        None => println!("{:<20} {}", "Checkpoint:", style("none").dim()),
    }

    Ok(())
}
