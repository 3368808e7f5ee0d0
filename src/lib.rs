//! strava-extract - resumable, quota-aware extraction of Strava activity data.
//!
//! The API enforces a short-term and a daily request quota and answers 429
//! for both. [`rate_limit`] reacts to those responses, sleeping through the
//! short window or halting the run and persisting where to resume. The
//! remaining modules are the extraction run built around it.

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod rate_limit;
pub mod resources;
pub mod sink;
pub mod validate;

pub use error::{ExtractError, Result};
pub use pipeline::{Pipeline, RunSummary};
pub use rate_limit::{
    Checkpoint, PersistedState, RateLimitExceeded, RateLimiter, RateLimiterConfig,
    ResponseAction, ResponseInterceptor, ResumeInfo, StateStore,
};
