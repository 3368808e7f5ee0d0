//! Per-response hook between the HTTP client and the rate limiter.

use std::sync::{Arc, Mutex, PoisonError};

use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use super::limiter::{RateLimitExceeded, RateLimiter};
use super::state::Checkpoint;

/// What the caller should do with a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseAction {
    /// Success was recorded; process the body.
    Continue,
    /// The short-term window was waited out; re-issue the same request.
    Retry,
    /// Neither success nor 429; the limiter was not consulted.
    Passthrough,
}

/// Translates HTTP statuses into limiter calls for one extraction run.
///
/// Holds the most recently confirmed checkpoint for its top-level resource,
/// which is handed to the limiter if a 429 escalates to the daily halt.
#[derive(Debug)]
pub struct ResponseInterceptor {
    limiter: Arc<RateLimiter>,
    resource_name: String,
    cursor: Mutex<Option<Value>>,
}

impl ResponseInterceptor {
    pub fn new(limiter: Arc<RateLimiter>, resource_name: impl Into<String>) -> Self {
        Self {
            limiter,
            resource_name: resource_name.into(),
            cursor: Mutex::new(None),
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    /// Record the identifier of the last fully processed entity.
    pub fn set_checkpoint(&self, cursor: impl Into<Value>) {
        let cursor = cursor.into();
        debug!("Checkpoint {} -> {}", self.resource_name, cursor);
        *self.cursor.lock().unwrap_or_else(PoisonError::into_inner) = Some(cursor);
    }

    /// Current checkpoint, if any entity has completed.
    pub fn checkpoint(&self) -> Option<Checkpoint> {
        self.cursor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .map(|cursor| Checkpoint::new(self.resource_name.clone(), cursor))
    }

    /// Route one response through the limiter.
    ///
    /// A 429 may block for the short-term window before returning
    /// [`ResponseAction::Retry`]. The halting condition is returned as-is
    /// and must be propagated by the caller.
    pub fn handle_response(
        &self,
        status: StatusCode,
        url: &str,
    ) -> Result<ResponseAction, RateLimitExceeded> {
        if status == StatusCode::TOO_MANY_REQUESTS {
            self.limiter.handle_429(url, self.checkpoint())?;
            return Ok(ResponseAction::Retry);
        }

        if status.is_success() {
            self.limiter.record_success(url);
            return Ok(ResponseAction::Continue);
        }

        Ok(ResponseAction::Passthrough)
    }
}
