//! Authenticated Strava API client.
//!
//! Every response is routed through a [`ResponseInterceptor`] before its
//! body is looked at, so the shared rate limiter sees each request.

mod auth;
mod paginator;

pub use auth::{Credentials, TokenProvider, DEFAULT_TOKEN_EXPIRATION};
pub use paginator::PagePaginator;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::config::Settings;
use crate::error::{ExtractError, Result};
use crate::rate_limit::{ResponseAction, ResponseInterceptor};

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("strava-extract/", env!("CARGO_PKG_VERSION"));

/// HTTP client for the REST API.
#[derive(Debug)]
pub struct StravaClient {
    http: Client,
    base_url: Url,
    tokens: TokenProvider,
}

impl StravaClient {
    pub fn new(settings: &Settings, credentials: Credentials) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(settings.request_timeout))
            .gzip(true)
            .brotli(true)
            .build()?;

        let base_url = Url::parse(&settings.api_base_url).map_err(|e| {
            ExtractError::Config(format!(
                "Invalid API base URL '{}': {}",
                settings.api_base_url, e
            ))
        })?;

        let tokens = TokenProvider::new(http.clone(), credentials, &settings.token_url);
        Ok(Self {
            http,
            base_url,
            tokens,
        })
    }

    /// Absolute URL for `path` with `query` appended.
    pub fn url(&self, path: &str, query: &[(String, String)]) -> Result<Url> {
        let mut url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ExtractError::Config(format!("Invalid API path '{}': {}", path, e)))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// GET `path` and decode the JSON body.
    ///
    /// Each response is handed to the interceptor on a blocking thread;
    /// when it returns [`ResponseAction::Retry`] the identical URL is
    /// requested again. Statuses the limiter does not handle become
    /// [`ExtractError::Api`].
    pub async fn get_json(
        &self,
        interceptor: &Arc<ResponseInterceptor>,
        path: &str,
        query: &[(String, String)],
    ) -> Result<Value> {
        let url = self.url(path, query)?;

        loop {
            let token = self.tokens.access_token().await?;
            debug!("GET {}", url);
            let response = self.http.get(url.clone()).bearer_auth(token).send().await?;
            let status = response.status();

            // The limiter persists state on every response and may sleep on
            // a 429, both blocking.
            let action = {
                let interceptor = Arc::clone(interceptor);
                let request_url = url.to_string();
                tokio::task::spawn_blocking(move || {
                    interceptor.handle_response(status, &request_url)
                })
                .await
                .map_err(|e| ExtractError::Io(io::Error::new(io::ErrorKind::Other, e)))??
            };

            match action {
                ResponseAction::Continue => return Ok(response.json::<Value>().await?),
                ResponseAction::Retry => {
                    debug!("Retrying {}", url);
                    continue;
                }
                ResponseAction::Passthrough => {
                    let body = response.text().await.unwrap_or_default();
                    if status != StatusCode::NOT_FOUND {
                        warn!("Request failed with {}: {}", status, url);
                    }
                    return Err(ExtractError::Api {
                        status,
                        url: url.to_string(),
                        body,
                    });
                }
            }
        }
    }
}
