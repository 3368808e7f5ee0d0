//! Reactive rate limiting and resumption.
//!
//! The limiter never paces requests up front. It reacts to HTTP 429:
//! the first one on a request waits out the short-term window, a repeat on
//! the same request halts the run until the daily quota resets. Usage
//! counters, the halt and the resume checkpoint are persisted so a new
//! process picks up where the last one stopped.

mod interceptor;
mod limiter;
mod sleeper;
mod state;
mod store;

pub use interceptor::{ResponseAction, ResponseInterceptor};
pub use limiter::{
    RateLimitExceeded, RateLimiter, RateLimiterConfig, ResumeInfo, DEFAULT_STATE_FILE,
    MAX_DAILY_SLEEP_HOURS,
};
pub use sleeper::{ProgressSleeper, SleepContext, Sleeper, ThreadSleeper};
pub use state::{Checkpoint, PersistedState};
pub use store::StateStore;
