//! On-disk record of quota usage and the resumption checkpoint.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Caller-supplied progress marker used to resume an interrupted extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Resource the cursor belongs to (e.g. `activities`).
    #[serde(alias = "resource_name")]
    pub resource: String,
    /// Identifier of the last fully processed entity.
    #[serde(alias = "cursor_value")]
    pub cursor: Value,
}

impl Checkpoint {
    pub fn new(resource: impl Into<String>, cursor: impl Into<Value>) -> Self {
        Self {
            resource: resource.into(),
            cursor: cursor.into(),
        }
    }
}

/// Persisted rate limit state.
///
/// Missing fields fall back to their defaults and unknown fields are ignored,
/// so files written by older or newer versions still load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    /// Requests successfully made since `day_start`.
    pub total_requests_today: u64,
    /// Consecutive successes since the last 429.
    pub requests_since_last_429: u64,
    /// When the daily counter window began.
    pub day_start: Option<DateTime<Utc>>,
    /// Last time a 429 was observed.
    pub last_429_time: Option<DateTime<Utc>>,
    /// Set only while halted on the daily quota.
    pub resume_after: Option<DateTime<Utc>>,
    /// Consecutive 429s for `current_request_url`.
    pub current_request_retries: u32,
    /// URL whose consecutive 429s are being counted.
    pub current_request_url: Option<String>,
    /// Where a resumed run should pick up.
    pub last_successful_checkpoint: Option<Checkpoint>,
}

impl PersistedState {
    /// A fresh record whose daily window starts at `now`.
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            day_start: Some(now),
            ..Default::default()
        }
    }

    /// Whether `day_start` falls on an earlier calendar day than `now`.
    ///
    /// Calendar days are taken in the local time zone, which is where the
    /// operator reads "today".
    pub fn is_new_day(&self, now: DateTime<Utc>) -> bool {
        match self.day_start {
            Some(start) => {
                start.with_timezone(&Local).date_naive() < now.with_timezone(&Local).date_naive()
            }
            None => false,
        }
    }

    /// Resume time, if halted and the time is still ahead of `now`.
    pub fn pending_resume(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.resume_after.filter(|resume| now < *resume)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_fresh_state_starts_day_now() {
        let now = Utc::now();
        let state = PersistedState::fresh(now);
        assert_eq!(state.day_start, Some(now));
        assert_eq!(state.total_requests_today, 0);
        assert!(state.resume_after.is_none());
        assert!(state.last_successful_checkpoint.is_none());
    }

    #[test]
    fn test_unknown_and_missing_fields() {
        let json = r#"{"total_requests_today": 7, "some_future_field": [1, 2, 3]}"#;
        let state: PersistedState = serde_json::from_str(json).unwrap();
        assert_eq!(state.total_requests_today, 7);
        assert_eq!(state.current_request_retries, 0);
        assert!(state.day_start.is_none());
    }

    #[test]
    fn test_checkpoint_accepts_long_field_names() {
        let json = r#"{"resource_name": "activities", "cursor_value": 42}"#;
        let checkpoint: Checkpoint = serde_json::from_str(json).unwrap();
        assert_eq!(checkpoint, Checkpoint::new("activities", 42));
    }

    #[test]
    fn test_is_new_day() {
        let now = Utc::now();
        let mut state = PersistedState::fresh(now);
        assert!(!state.is_new_day(now));

        state.day_start = Some(now - Duration::days(1));
        assert!(state.is_new_day(now));

        state.day_start = None;
        assert!(!state.is_new_day(now));
    }

    #[test]
    fn test_pending_resume() {
        let now = Utc::now();
        let mut state = PersistedState::fresh(now);
        assert_eq!(state.pending_resume(now), None);

        state.resume_after = Some(now + Duration::hours(1));
        assert_eq!(state.pending_resume(now), state.resume_after);

        state.resume_after = Some(now - Duration::seconds(1));
        assert_eq!(state.pending_resume(now), None);
    }
}
