//! OAuth2 refresh-token authentication.

use std::env;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{ExtractError, Result};

/// Token lifetime assumed when the token response does not state one.
pub const DEFAULT_TOKEN_EXPIRATION: Duration = Duration::from_secs(21600);
/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// OAuth application credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    /// Overrides the configured token endpoint.
    pub access_token_url: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("access_token_url", &self.access_token_url)
            .finish()
    }
}

impl Credentials {
    /// Read `CREDENTIALS__*` from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Read `CREDENTIALS__*` through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        match (
            get("CREDENTIALS__CLIENT_ID"),
            get("CREDENTIALS__CLIENT_SECRET"),
            get("CREDENTIALS__REFRESH_TOKEN"),
        ) {
            (Some(client_id), Some(client_secret), Some(refresh_token)) => Ok(Self {
                client_id,
                client_secret,
                refresh_token,
                access_token_url: get("CREDENTIALS__ACCESS_TOKEN_URL"),
            }),
            _ => Err(ExtractError::Auth(
                "Missing required credentials. Please ensure CREDENTIALS__CLIENT_ID, \
                 CREDENTIALS__CLIENT_SECRET, and CREDENTIALS__REFRESH_TOKEN are set"
                    .to_string(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Hands out access tokens, refreshing them when they are about to expire.
#[derive(Debug)]
pub struct TokenProvider {
    client: Client,
    credentials: Credentials,
    token_url: String,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(client: Client, credentials: Credentials, default_token_url: &str) -> Self {
        let token_url = credentials
            .access_token_url
            .clone()
            .unwrap_or_else(|| default_token_url.to_string());
        info!("OAuth2 authentication initialized (token endpoint: {})", token_url);
        Self {
            client,
            credentials,
            token_url,
            cached: Mutex::new(None),
        }
    }

    /// A valid access token, refreshing it first if needed.
    pub async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();

        if let Some(ref token) = *cached {
            if token.expires_at - chrono::Duration::seconds(EXPIRY_MARGIN_SECS) > now {
                return Ok(token.access_token.clone());
            }
            debug!("Access token expires at {}, refreshing", token.expires_at);
        }

        let token = self.refresh(now).await?;
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    async fn refresh(&self, now: DateTime<Utc>) -> Result<CachedToken> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", self.credentials.refresh_token.as_str()),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
        ];

        let response = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| ExtractError::Auth(format!("Token refresh failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractError::Auth(format!(
                "Token refresh returned {}: {}",
                status, body
            )));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| ExtractError::Auth(format!("Invalid token response: {}", e)))?;

        let expires_at = parsed
            .expires_at
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .or_else(|| {
                parsed
                    .expires_in
                    .map(|secs| now + chrono::Duration::seconds(secs))
            })
            .unwrap_or_else(|| {
                now + chrono::Duration::seconds(DEFAULT_TOKEN_EXPIRATION.as_secs() as i64)
            });

        info!("Obtained access token valid until {}", expires_at.to_rfc3339());
        Ok(CachedToken {
            access_token: parsed.access_token,
            expires_at,
        })
    }
}
