//! Reactive rate limiter.
//!
//! Only waits when the API actually answers 429:
//! - First 429 for a URL: sleep out the short-term window, then retry.
//! - Another 429 for the same URL: the window did not reset, so the daily
//!   quota is spent. Persist the checkpoint and a resume time and halt.
//!
//! The API does not say which quota a 429 belongs to, so the daily limit
//! is inferred from the repeat rather than tracked against the clock.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::sleeper::{ProgressSleeper, SleepContext, Sleeper, ThreadSleeper};
use super::state::{Checkpoint, PersistedState};
use super::store::StateStore;

/// Default location of the state file, relative to the working directory.
pub const DEFAULT_STATE_FILE: &str = ".rate_limit_state.json";

/// Longest halt applied, whatever `daily_sleep_hours` says.
pub const MAX_DAILY_SLEEP_HOURS: u64 = 24 * 366;

/// Halting condition: the daily quota is spent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Daily rate limit exceeded. Resume after {}", .resume_after.to_rfc3339())]
pub struct RateLimitExceeded {
    /// No request may be issued before this time.
    pub resume_after: DateTime<Utc>,
}

impl RateLimitExceeded {
    pub fn new(resume_after: DateTime<Utc>) -> Self {
        Self { resume_after }
    }
}

/// What a halted run needs to resume.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeInfo {
    pub resume_after: DateTime<Utc>,
    pub checkpoint: Option<Checkpoint>,
}

/// Configuration for the reactive limiter.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterConfig {
    /// Wait after the first 429 on a request.
    pub short_term_sleep_minutes: u64,
    /// Halt duration once the daily quota is inferred.
    pub daily_sleep_hours: u64,
    /// Consecutive 429s on one URL tolerated before halting.
    pub max_retries_before_daily_wait: u32,
    /// Show a countdown while sleeping.
    pub show_progress: bool,
    /// Where the persisted state lives.
    pub state_file: PathBuf,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            short_term_sleep_minutes: 15,
            daily_sleep_hours: 24,
            max_retries_before_daily_wait: 1,
            show_progress: false,
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
        }
    }
}

impl RateLimiterConfig {
    pub fn short_term_sleep(&self) -> Duration {
        Duration::from_secs(self.short_term_sleep_minutes.saturating_mul(60))
    }

    /// Halt duration, capped at [`MAX_DAILY_SLEEP_HOURS`].
    pub fn daily_sleep(&self) -> chrono::Duration {
        let hours = self.daily_sleep_hours.min(MAX_DAILY_SLEEP_HOURS);
        chrono::Duration::hours(i64::try_from(hours).unwrap_or(0))
    }
}

#[derive(Debug)]
struct LimiterState {
    store: StateStore,
    session_requests: u64,
}

/// Shared, thread-safe reactive rate limiter.
///
/// Construct one per extraction run and hand an `Arc` to every fetcher.
/// The lock covers each read-decide-write sequence but is never held while
/// sleeping.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    inner: Mutex<LimiterState>,
    sleeper: Arc<dyn Sleeper>,
}

impl RateLimiter {
    /// Create a limiter; the sleeper follows `config.show_progress`.
    pub fn new(config: RateLimiterConfig) -> Self {
        let sleeper: Arc<dyn Sleeper> = if config.show_progress {
            Arc::new(ProgressSleeper)
        } else {
            Arc::new(ThreadSleeper)
        };
        Self::with_sleeper(config, sleeper)
    }

    /// Create a limiter with a custom sleeper.
    pub fn with_sleeper(config: RateLimiterConfig, sleeper: Arc<dyn Sleeper>) -> Self {
        info!(
            "Reactive rate limiter initialized: short-term sleep={}min, daily sleep={}h, state={}",
            config.short_term_sleep_minutes,
            config.daily_sleep_hours,
            config.state_file.display()
        );
        if config.daily_sleep_hours > MAX_DAILY_SLEEP_HOURS {
            warn!(
                "Daily sleep of {}h capped at {}h",
                config.daily_sleep_hours, MAX_DAILY_SLEEP_HOURS
            );
        }
        let store = StateStore::new(config.state_file.clone());
        Self {
            config,
            inner: Mutex::new(LimiterState {
                store,
                session_requests: 0,
            }),
            sleeper,
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        // Every mutation is written through, so a poisoned guard still holds
        // a consistent record.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Call once before the first request of a run.
    ///
    /// Fails if a previous run halted and its resume time is still ahead.
    /// Otherwise any expired halt and per-URL retry tracking are cleared.
    pub fn check_resume_status(&self) -> Result<(), RateLimitExceeded> {
        let mut inner = self.lock();
        let now = Utc::now();

        if let Some(resume_after) = inner.store.state().pending_resume(now) {
            warn!(
                "Daily rate limit was previously hit. Resume time: {}",
                resume_after.to_rfc3339()
            );
            return Err(RateLimitExceeded::new(resume_after));
        }

        if inner.store.clear_resume_time() {
            info!("Cleared previous rate limit halt, starting fresh");
        }
        Ok(())
    }

    /// Record a successful response.
    pub fn record_success(&self, url: &str) {
        let mut inner = self.lock();
        inner.session_requests += 1;
        inner.store.record_request();
        debug!(
            "Request succeeded (total: {}): {}",
            inner.session_requests, url
        );
    }

    /// Handle a 429 for `url`.
    ///
    /// Returns `Ok(true)` after sleeping out the short-term window, meaning
    /// the caller should retry the same request. Returns the halting
    /// condition once the daily quota is inferred; `checkpoint` (when given)
    /// is persisted first so the next process can resume from it.
    pub fn handle_429(
        &self,
        url: &str,
        checkpoint: Option<Checkpoint>,
    ) -> Result<bool, RateLimitExceeded> {
        let context = {
            let mut inner = self.lock();
            let now = Utc::now();
            let retries = inner.store.record_429(url, now);

            warn!(
                "Received 429 rate limit response (retry #{}) for: {}",
                retries, url
            );

            if retries > self.config.max_retries_before_daily_wait {
                let resume_after = now + self.config.daily_sleep();
                inner.store.halt(resume_after, checkpoint);
                error!(
                    "Daily rate limit hit. Saved state for resumption at {}",
                    resume_after.to_rfc3339()
                );
                return Err(RateLimitExceeded::new(resume_after));
            }

            SleepContext {
                session_requests: inner.session_requests,
                requests_today: inner.store.state().total_requests_today,
            }
        };

        warn!(
            "Short-term rate limit hit. Sleeping for {} minutes...",
            self.config.short_term_sleep_minutes
        );
        self.sleeper.sleep(self.config.short_term_sleep(), &context);
        info!("Waking up from short-term rate limit sleep");

        Ok(true)
    }

    /// Resume time and checkpoint, if currently halted.
    pub fn get_resume_info(&self) -> Option<ResumeInfo> {
        let mut inner = self.lock();
        let state = inner.store.state();
        state.pending_resume(Utc::now()).map(|resume_after| ResumeInfo {
            resume_after,
            checkpoint: state.last_successful_checkpoint.clone(),
        })
    }

    /// Persisted checkpoint, halted or not.
    pub fn checkpoint(&self) -> Option<Checkpoint> {
        self.lock().store.state().last_successful_checkpoint.clone()
    }

    /// Forget the persisted checkpoint after a run completes.
    pub fn clear_checkpoint(&self) {
        self.lock().store.clear_checkpoint();
    }

    /// Requests recorded by this process.
    pub fn total_requests(&self) -> u64 {
        self.lock().session_requests
    }

    /// Requests recorded since the start of the day.
    pub fn total_requests_today(&self) -> u64 {
        self.lock().store.state().total_requests_today
    }

    /// Copy of the persisted record.
    pub fn snapshot(&self) -> PersistedState {
        self.lock().store.state().clone()
    }

    /// Reset all rate limit state.
    pub fn reset_state(&self) {
        let mut inner = self.lock();
        inner.session_requests = 0;
        inner.store.reset();
    }

    /// Remove the state file altogether.
    pub fn delete_state(&self) {
        let mut inner = self.lock();
        inner.session_requests = 0;
        inner.store.delete();
    }
}
