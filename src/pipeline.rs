//! One extraction run: activities, then streams and zones per activity.
//!
//! Progress is checkpointed after each activity and its children are
//! written, so a run halted on the daily quota resumes after the last
//! complete activity.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Days, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::{Credentials, PagePaginator, StravaClient};
use crate::config::Settings;
use crate::error::Result;
use crate::rate_limit::{Checkpoint, RateLimiter, ResponseInterceptor};
use crate::resources::{records, with_parent_id, Resource};
use crate::sink::JsonLinesSink;
use crate::validate::DateRange;

/// Activities held back while looking for the checkpoint activity.
///
/// Past this many the checkpoint is treated as missing and the held-back
/// activities are extracted.
pub const MAX_HELD_BACK_ACTIVITIES: usize = 5000;

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Records written per resource.
    pub records: BTreeMap<String, u64>,
    /// Activities passed over because a previous run already wrote them.
    pub skipped_activities: u64,
    /// Checkpoint the run resumed from.
    pub resumed_from: Option<Checkpoint>,
    pub session_requests: u64,
    pub requests_today: u64,
    pub duration: Duration,
}

/// Extraction orchestrator.
#[derive(Debug)]
pub struct Pipeline {
    settings: Settings,
    limiter: Arc<RateLimiter>,
    held_back_limit: usize,
}

impl Pipeline {
    /// Pipeline with a limiter built from `settings`.
    pub fn new(settings: Settings) -> Self {
        let limiter = Arc::new(RateLimiter::new(settings.rate_limiter_config()));
        Self::with_limiter(settings, limiter)
    }

    /// Pipeline sharing an existing limiter.
    pub fn with_limiter(settings: Settings, limiter: Arc<RateLimiter>) -> Self {
        Self {
            settings,
            limiter,
            held_back_limit: MAX_HELD_BACK_ACTIVITIES,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run the extraction.
    ///
    /// Fails with the halting condition before any request if a previous
    /// run's resume time is still ahead.
    pub async fn run(&self, range: DateRange, credentials: Credentials) -> Result<RunSummary> {
        let started = Instant::now();
        self.limiter.check_resume_status()?;

        let resumed_from = self
            .limiter
            .checkpoint()
            .filter(|c| c.resource == Resource::Activities.name());
        let resume_id = resumed_from.as_ref().and_then(|c| c.cursor.as_u64());
        if let Some(ref checkpoint) = resumed_from {
            info!(
                "Resuming after {} {}",
                checkpoint.resource, checkpoint.cursor
            );
        }

        let client = StravaClient::new(&self.settings, credentials)?;
        let interceptor = Arc::new(ResponseInterceptor::new(
            Arc::clone(&self.limiter),
            Resource::Activities.name(),
        ));
        if let Some(id) = resume_id {
            // A halt before any new activity completes keeps the old position.
            interceptor.set_checkpoint(id);
        }

        let mut sink = JsonLinesSink::new(&self.settings.output_dir)?;
        let query = self.activity_query(&range);
        info!(
            "Incremental load: from={}, until={}",
            query[0].1,
            range
                .end
                .map(|e| e.to_rfc3339())
                .unwrap_or_else(|| "now".to_string())
        );

        let mut paginator = PagePaginator::new(
            Resource::Activities.name(),
            self.settings.base_page,
            self.settings.maximum_page,
        );
        let mut skipping = resume_id.is_some();
        let mut held_back: Vec<Value> = Vec::new();
        let mut skipped_activities = 0u64;

        while let Some(page) = paginator.next_page() {
            let mut page_query = query.clone();
            page_query.push(("page".to_string(), page.to_string()));

            let body = client
                .get_json(
                    &interceptor,
                    &Resource::Activities.path(None),
                    &page_query,
                )
                .await?;
            let activities = records(body);
            debug!("Page {} returned {} activities", page, activities.len());
            paginator.update(activities.len());

            for activity in activities {
                if skipping {
                    if activity_id(&activity) == resume_id {
                        skipping = false;
                        skipped_activities += held_back.len() as u64 + 1;
                        held_back.clear();
                        info!(
                            "Reached checkpoint, skipped {} already extracted activities",
                            skipped_activities
                        );
                        continue;
                    }
                    held_back.push(activity);
                    if held_back.len() < self.held_back_limit {
                        continue;
                    }
                    warn!(
                        "Checkpoint activity {:?} not found within {} activities, extracting them",
                        resume_id,
                        held_back.len()
                    );
                    skipping = false;
                    for activity in held_back.drain(..) {
                        self.process_activity(&client, &interceptor, &mut sink, activity)
                            .await?;
                    }
                    continue;
                }
                self.process_activity(&client, &interceptor, &mut sink, activity)
                    .await?;
            }
        }

        if skipping {
            warn!(
                "Checkpoint activity {:?} not found, extracting {} held-back activities",
                resume_id,
                held_back.len()
            );
            for activity in held_back {
                self.process_activity(&client, &interceptor, &mut sink, activity)
                    .await?;
            }
        }

        sink.flush()?;
        self.limiter.clear_checkpoint();

        let summary = RunSummary {
            records: sink.counts().clone(),
            skipped_activities,
            resumed_from,
            session_requests: self.limiter.total_requests(),
            requests_today: self.limiter.total_requests_today(),
            duration: started.elapsed(),
        };
        info!(
            "Pipeline completed successfully in {:.2}s ({} requests)",
            summary.duration.as_secs_f64(),
            summary.session_requests
        );
        Ok(summary)
    }

    fn activity_query(&self, range: &DateRange) -> Vec<(String, String)> {
        let after = range.start.unwrap_or_else(|| {
            lookback_start(Utc::now(), self.settings.default_lookback_days)
        });

        let mut query = vec![("after".to_string(), after.timestamp().to_string())];
        if let Some(end) = range.end {
            query.push(("before".to_string(), end.timestamp().to_string()));
        }
        query.push((
            "per_page".to_string(),
            self.settings.page_size.to_string(),
        ));
        query
    }

    async fn process_activity(
        &self,
        client: &StravaClient,
        interceptor: &Arc<ResponseInterceptor>,
        sink: &mut JsonLinesSink,
        activity: Value,
    ) -> Result<()> {
        let Some(id) = activity_id(&activity) else {
            warn!("Skipping activity without a numeric id");
            return Ok(());
        };

        // Children are fetched one at a time: the limiter tracks a single
        // retrying URL, and interleaved 429s would keep resetting it.
        let streams = self
            .fetch_child(client, interceptor, Resource::ActivityStreams, id)
            .await?;
        let zones = self
            .fetch_child(client, interceptor, Resource::ActivityZones, id)
            .await?;

        sink.write(Resource::Activities.name(), &activity)?;
        sink.write_all(Resource::ActivityStreams.name(), &streams)?;
        sink.write_all(Resource::ActivityZones.name(), &zones)?;
        sink.flush()?;

        interceptor.set_checkpoint(id);
        debug!(
            "Activity {} extracted ({} streams, {} zones)",
            id,
            streams.len(),
            zones.len()
        );
        Ok(())
    }

    async fn fetch_child(
        &self,
        client: &StravaClient,
        interceptor: &Arc<ResponseInterceptor>,
        resource: Resource,
        activity_id: u64,
    ) -> Result<Vec<Value>> {
        let mut paginator = PagePaginator::new(
            resource.name(),
            self.settings.base_page,
            resource.maximum_page(),
        );
        let path = resource.path(Some(activity_id));
        let mut out = Vec::new();

        while let Some(page) = paginator.next_page() {
            let mut query = resource.static_params();
            query.push(("page".to_string(), page.to_string()));
            query.push((
                "per_page".to_string(),
                self.settings.page_size.to_string(),
            ));

            let body = match client.get_json(interceptor, &path, &query).await {
                Ok(body) => body,
                Err(e) if e.is_not_found() && resource.ignores_not_found() => {
                    debug!("No {} for activity {}", resource, activity_id);
                    break;
                }
                Err(e) => return Err(e),
            };

            let page_records = records(body);
            paginator.update(page_records.len());
            out.extend(
                page_records
                    .into_iter()
                    .map(|record| with_parent_id(record, activity_id)),
            );
        }
        Ok(out)
    }
}

fn activity_id(activity: &Value) -> Option<u64> {
    activity.get("id").and_then(Value::as_u64)
}

/// Midnight UTC `days` before `now`.
fn lookback_start(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    let date = now
        .date_naive()
        .checked_sub_days(Days::new(u64::from(days)))
        .unwrap_or(now.date_naive());
    date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_lookback_start() {
        let now = Utc.with_ymd_and_hms(2024, 3, 31, 15, 30, 0).unwrap();
        assert_eq!(
            lookback_start(now, 30),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_activity_query() {
        let pipeline = Pipeline::with_limiter(
            Settings {
                page_size: 50,
                ..Default::default()
            },
            Arc::new(RateLimiter::new(Default::default())),
        );
        let range = DateRange {
            start: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            end: Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()),
        };

        let query = pipeline.activity_query(&range);
        assert_eq!(
            query,
            vec![
                ("after".to_string(), "1704067200".to_string()),
                ("before".to_string(), "1706745600".to_string()),
                ("per_page".to_string(), "50".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_held_back_activities_are_bounded() {
        use crate::rate_limit::{StateStore, ThreadSleeper};
        use wiremock::matchers::{method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "token",
                "expires_in": 21600
            })))
            .mount(&server)
            .await;
        let pages = [
            ("1", json!([{"id": 1}, {"id": 2}])),
            ("2", json!([{"id": 3}])),
            ("3", json!([])),
        ];
        for (page, body) in pages {
            Mock::given(method("GET"))
                .and(path("/api/v3/activities"))
                .and(query_param("page", page))
                .respond_with(ResponseTemplate::new(200).set_body_json(body))
                .mount(&server)
                .await;
        }

        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            api_base_url: format!("{}/api/v3/", server.uri()),
            token_url: format!("{}/oauth/token", server.uri()),
            state_file: dir.path().join("state.json"),
            output_dir: dir.path().join("out"),
            ..Default::default()
        };
        StateStore::new(&settings.state_file).halt(
            Utc::now() - chrono::Duration::minutes(1),
            Some(Checkpoint::new("activities", 3)),
        );
        let limiter = RateLimiter::with_sleeper(
            settings.rate_limiter_config(),
            Arc::new(ThreadSleeper),
        );
        let mut pipeline = Pipeline::with_limiter(settings, Arc::new(limiter));
        pipeline.held_back_limit = 2;

        let credentials = Credentials {
            client_id: "1".to_string(),
            client_secret: "s".to_string(),
            refresh_token: "r".to_string(),
            access_token_url: None,
        };
        let summary = pipeline
            .run(DateRange { start: None, end: None }, credentials)
            .await
            .unwrap();

        // The limit was reached on page 1, so activity 3 is no longer
        // recognised as the checkpoint.
        assert_eq!(summary.skipped_activities, 0);
        assert_eq!(summary.records.get("activities"), Some(&3));
    }

    #[test]
    fn test_activity_id() {
        assert_eq!(activity_id(&json!({"id": 42})), Some(42));
        assert_eq!(activity_id(&json!({"id": "42"})), None);
        assert_eq!(activity_id(&json!({})), None);
    }
}
