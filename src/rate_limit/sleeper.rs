//! Blocking waits used by the short-term backoff.

use std::fmt;
use std::thread;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// Counters shown while waiting out a rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepContext {
    /// Requests recorded by this process.
    pub session_requests: u64,
    /// Requests recorded since the start of the day.
    pub requests_today: u64,
}

/// Blocks the calling thread for a rate limit wait.
pub trait Sleeper: Send + Sync + fmt::Debug {
    fn sleep(&self, duration: Duration, context: &SleepContext);
}

/// Plain `thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration, _context: &SleepContext) {
        thread::sleep(duration);
    }
}

/// Sleeps in one-second steps behind a countdown bar.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProgressSleeper;

impl Sleeper for ProgressSleeper {
    fn sleep(&self, duration: Duration, context: &SleepContext) {
        let minutes = duration.as_secs() / 60;
        eprintln!(
            "\n{} Rate limited - waiting {} min",
            style("!").yellow(),
            minutes
        );
        eprintln!("  Total requests this session: {}", context.session_requests);
        eprintln!("  Total requests today: {}", context.requests_today);

        let total_secs = duration.as_secs();
        let pb = ProgressBar::new(total_secs);
        if let Ok(bar_style) = ProgressStyle::default_bar()
            .template("Waiting [{bar:40.yellow}] {eta} remaining")
        {
            pb.set_style(bar_style.progress_chars("█▓░"));
        }

        for _ in 0..total_secs {
            thread::sleep(Duration::from_secs(1));
            pb.inc(1);
        }
        // Sub-second remainder.
        thread::sleep(duration.saturating_sub(Duration::from_secs(total_secs)));
        pb.finish_and_clear();
    }
}
