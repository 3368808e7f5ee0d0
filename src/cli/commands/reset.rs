//! Rate limit reset command.

use console::style;

use strava_extract::config::Settings;
use strava_extract::rate_limit::RateLimiter;

/// Reset (or delete) the persisted rate limit state.
pub fn cmd_reset(settings: &Settings, confirm: bool, delete: bool) -> anyhow::Result<()> {
    let path = settings.state_file.display();

    if !confirm {
        if delete {
            println!(
                "{} This will delete the rate limit state file {}.",
                style("!").yellow(),
                path
            );
        } else {
            println!(
                "{} This will reset the rate limit state in {}.",
                style("!").yellow(),
                path
            );
        }
        println!("  The daily request count, any halt and the resume checkpoint are lost.");
        println!("  Use --confirm to proceed.");
        return Ok(());
    }

    let limiter = RateLimiter::new(settings.rate_limiter_config());
    if delete {
        limiter.delete_state();
        println!("{} Deleted rate limit state {}", style("✓").green(), path);
    } else {
        limiter.reset_state();
        println!("{} Reset rate limit state {}", style("✓").green(), path);
    }

    Ok(())
}
