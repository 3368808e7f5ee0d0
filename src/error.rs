//! Extraction error types.

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use thiserror::Error;

use crate::rate_limit::RateLimitExceeded;

/// Process exit status when the daily rate limit halted the run.
pub const EXIT_RATE_LIMITED: u8 = 2;
/// Process exit status when the run was interrupted (128 + SIGINT).
pub const EXIT_INTERRUPTED: u8 = 130;
/// Process exit status for any other failure.
pub const EXIT_FAILURE: u8 = 1;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid argument: {0}")]
    Validation(String),
    #[error("Authentication error: {0}")]
    Auth(String),
    #[error("API returned {status} for {url}: {body}")]
    Api {
        status: StatusCode,
        url: String,
        body: String,
    },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),
    #[error("Interrupted")]
    Interrupted,
}

impl ExtractError {
    /// Resume time when this is the daily rate limit halt.
    pub fn resume_after(&self) -> Option<DateTime<Utc>> {
        match self {
            ExtractError::RateLimited(e) => Some(e.resume_after),
            _ => None,
        }
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            ExtractError::RateLimited(_) => EXIT_RATE_LIMITED,
            ExtractError::Interrupted => EXIT_INTERRUPTED,
            _ => EXIT_FAILURE,
        }
    }

    /// Whether this is an API 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ExtractError::Api { status, .. } if *status == StatusCode::NOT_FOUND)
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_after_only_for_halt() {
        let at = Utc::now();
        let halted: ExtractError = RateLimitExceeded::new(at).into();
        assert_eq!(halted.resume_after(), Some(at));
        assert!(halted.to_string().starts_with("Daily rate limit exceeded"));

        assert_eq!(ExtractError::Interrupted.resume_after(), None);
        assert_eq!(
            ExtractError::Validation("bad".into()).resume_after(),
            None
        );
    }

    #[test]
    fn test_exit_codes() {
        let halted: ExtractError = RateLimitExceeded::new(Utc::now()).into();
        assert_eq!(halted.exit_code(), 2);
        assert_eq!(ExtractError::Interrupted.exit_code(), 130);
        assert_eq!(ExtractError::Auth("missing".into()).exit_code(), 1);
    }

    #[test]
    fn test_is_not_found() {
        let err = ExtractError::Api {
            status: StatusCode::NOT_FOUND,
            url: "https://api/activities/1/zones".to_string(),
            body: String::new(),
        };
        assert!(err.is_not_found());
        assert!(!ExtractError::Interrupted.is_not_found());
    }
}
