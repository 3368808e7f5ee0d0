//! End-to-end extraction against a mock Strava API.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};
use wiremock::matchers::{any, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use strava_extract::client::Credentials;
use strava_extract::config::Settings;
use strava_extract::rate_limit::{SleepContext, Sleeper};
use strava_extract::validate::validate_date_range;
use strava_extract::{Checkpoint, ExtractError, Pipeline, RateLimiter, StateStore};

#[derive(Debug, Default)]
struct RecordingSleeper {
    calls: Mutex<Vec<Duration>>,
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration, _context: &SleepContext) {
        self.calls.lock().unwrap().push(duration);
    }
}

struct Harness {
    server: MockServer,
    dir: TempDir,
    sleeper: Arc<RecordingSleeper>,
}

impl Harness {
    async fn start() -> Self {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "token",
                "expires_in": 21600
            })))
            .mount(&server)
            .await;

        Self {
            server,
            dir: tempdir().unwrap(),
            sleeper: Arc::new(RecordingSleeper::default()),
        }
    }

    fn state_file(&self) -> std::path::PathBuf {
        self.dir.path().join("state.json")
    }

    fn output_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("out")
    }

    fn pipeline(&self) -> Pipeline {
        let settings = Settings {
            api_base_url: format!("{}/api/v3/", self.server.uri()),
            token_url: format!("{}/oauth/token", self.server.uri()),
            show_progress: false,
            state_file: self.state_file(),
            output_dir: self.output_dir(),
            ..Default::default()
        };
        let limiter = RateLimiter::with_sleeper(settings.rate_limiter_config(), self.sleeper.clone());
        Pipeline::with_limiter(settings, Arc::new(limiter))
    }

    async fn mount_activities(&self, activities: Value) {
        Mock::given(method("GET"))
            .and(path("/api/v3/activities"))
            .and(query_param("page", "1"))
            .and(query_param("per_page", "200"))
            .respond_with(ResponseTemplate::new(200).set_body_json(activities))
            .mount(&self.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v3/activities"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&self.server)
            .await;
    }

    async fn mount_child(&self, activity_id: u64, child: &str, status: u16, body: Value) {
        Mock::given(method("GET"))
            .and(path(format!("/api/v3/activities/{}/{}", activity_id, child)))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.server)
            .await;
    }
}

fn credentials() -> Credentials {
    Credentials {
        client_id: "123".to_string(),
        client_secret: "secret".to_string(),
        refresh_token: "refresh".to_string(),
        access_token_url: None,
    }
}

fn read_lines(path: &Path) -> Vec<Value> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[tokio::test]
async fn complete_run_writes_records_and_clears_checkpoint() {
    let h = Harness::start().await;
    h.mount_activities(json!([{"id": 1, "name": "Morning Run"}, {"id": 2, "name": "Ride"}]))
        .await;
    h.mount_child(1, "streams", 200, json!([{"type": "time", "data": [0, 1, 2]}]))
        .await;
    h.mount_child(1, "zones", 200, json!([{"type": "heartrate"}])).await;
    // Activity 2 has no streams: unmatched requests answer 404.
    h.mount_child(2, "zones", 200, json!([{"type": "heartrate"}])).await;

    let pipeline = h.pipeline();
    let range = validate_date_range(Some("2024-01-01"), Some("2024-02-01")).unwrap();
    let summary = pipeline.run(range, credentials()).await.unwrap();

    assert_eq!(summary.records.get("activities"), Some(&2));
    assert_eq!(summary.records.get("activity_streams"), Some(&1));
    assert_eq!(summary.records.get("activity_zones"), Some(&2));
    assert_eq!(summary.skipped_activities, 0);
    // Two activity pages, one stream and two zone responses succeeded.
    assert_eq!(summary.session_requests, 5);
    assert_eq!(summary.requests_today, 5);

    let streams = read_lines(&h.output_dir().join("activity_streams.ndjson"));
    assert_eq!(streams[0]["_activities_id"], 1);
    assert_eq!(streams[0]["type"], "time");

    assert!(pipeline.limiter().checkpoint().is_none());
    assert!(h.sleeper.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn repeated_429_halts_with_last_completed_activity() {
    let h = Harness::start().await;
    h.mount_activities(json!([{"id": 1}, {"id": 2}, {"id": 3}])).await;
    h.mount_child(1, "streams", 200, json!([])).await;
    h.mount_child(1, "zones", 200, json!([])).await;
    h.mount_child(2, "zones", 200, json!([])).await;
    h.mount_child(2, "streams", 429, json!({"message": "Rate Limit Exceeded"}))
        .await;

    let pipeline = h.pipeline();
    let range = validate_date_range(Some("2024-01-01"), None).unwrap();
    let err = pipeline.run(range, credentials()).await.unwrap_err();

    let resume_after = err.resume_after().expect("daily halt");
    assert!(matches!(err, ExtractError::RateLimited(_)));
    assert_eq!(err.exit_code(), 2);
    assert!(resume_after > Utc::now() + chrono::Duration::hours(23));

    assert_eq!(
        *h.sleeper.calls.lock().unwrap(),
        vec![Duration::from_secs(15 * 60)]
    );

    let info = pipeline.limiter().get_resume_info().unwrap();
    assert_eq!(info.resume_after, resume_after);
    assert_eq!(info.checkpoint, Some(Checkpoint::new("activities", 1)));

    let activities = read_lines(&h.output_dir().join("activities.ndjson"));
    assert_eq!(activities, vec![json!({"id": 1})]);
}

#[tokio::test]
async fn spent_quota_on_both_children_sleeps_once_then_halts() {
    let h = Harness::start().await;
    h.mount_activities(json!([{"id": 1}])).await;
    h.mount_child(1, "streams", 429, json!({"message": "Rate Limit Exceeded"}))
        .await;
    h.mount_child(1, "zones", 429, json!({"message": "Rate Limit Exceeded"}))
        .await;

    let pipeline = h.pipeline();
    let range = validate_date_range(Some("2024-01-01"), None).unwrap();
    let err = pipeline.run(range, credentials()).await.unwrap_err();

    assert!(matches!(err, ExtractError::RateLimited(_)));
    assert_eq!(h.sleeper.calls.lock().unwrap().len(), 1);

    // Streams were requested twice, zones never.
    let child_requests: Vec<String> = h
        .server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.url.path().to_string())
        .filter(|p| p.starts_with("/api/v3/activities/1/"))
        .collect();
    assert_eq!(
        child_requests,
        vec!["/api/v3/activities/1/streams", "/api/v3/activities/1/streams"]
    );
    assert_eq!(pipeline.limiter().checkpoint(), None);
}

#[tokio::test]
async fn halted_state_blocks_run_before_any_request() {
    let h = Harness::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&h.server)
        .await;

    let resume_after = Utc::now() + chrono::Duration::hours(5);
    StateStore::new(h.state_file()).halt(resume_after, Some(Checkpoint::new("activities", 8)));

    let pipeline = h.pipeline();
    let range = validate_date_range(None, None).unwrap();
    let err = pipeline.run(range, credentials()).await.unwrap_err();

    assert_eq!(err.resume_after(), Some(resume_after));
    assert!(h.server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn resumed_run_skips_already_extracted_activities() {
    let h = Harness::start().await;
    h.mount_activities(json!([{"id": 1}, {"id": 2}])).await;
    h.mount_child(2, "streams", 200, json!([{"type": "distance"}])).await;
    h.mount_child(2, "zones", 200, json!([])).await;
    Mock::given(method("GET"))
        .and(path("/api/v3/activities/1/streams"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&h.server)
        .await;

    // A previous run finished activity 1 and its halt has since expired.
    StateStore::new(h.state_file()).halt(
        Utc::now() - chrono::Duration::minutes(1),
        Some(Checkpoint::new("activities", 1)),
    );

    let pipeline = h.pipeline();
    let range = validate_date_range(Some("2024-01-01"), None).unwrap();
    let summary = pipeline.run(range, credentials()).await.unwrap();

    assert_eq!(summary.resumed_from, Some(Checkpoint::new("activities", 1)));
    assert_eq!(summary.skipped_activities, 1);
    assert_eq!(summary.records.get("activities"), Some(&1));
    assert_eq!(
        read_lines(&h.output_dir().join("activities.ndjson")),
        vec![json!({"id": 2})]
    );
    assert!(pipeline.limiter().checkpoint().is_none());
}

#[tokio::test]
async fn missing_checkpoint_activity_extracts_everything() {
    let h = Harness::start().await;
    h.mount_activities(json!([{"id": 5}, {"id": 6}])).await;

    StateStore::new(h.state_file()).halt(
        Utc::now() - chrono::Duration::minutes(1),
        Some(Checkpoint::new("activities", 4)),
    );

    let pipeline = h.pipeline();
    let range = validate_date_range(Some("2024-01-01"), None).unwrap();
    let summary = pipeline.run(range, credentials()).await.unwrap();

    assert_eq!(summary.skipped_activities, 0);
    assert_eq!(summary.records.get("activities"), Some(&2));
}

#[tokio::test]
async fn server_error_is_an_api_error() {
    let h = Harness::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/activities"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&h.server)
        .await;

    let pipeline = h.pipeline();
    let range = validate_date_range(Some("2024-01-01"), None).unwrap();
    let err = pipeline.run(range, credentials()).await.unwrap_err();

    match err {
        ExtractError::Api { status, body, .. } => {
            assert_eq!(status.as_u16(), 500);
            assert_eq!(body, "boom");
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(pipeline.limiter().total_requests(), 0);
}
