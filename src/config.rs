//! Configuration management for strava-extract.
//!
//! A config file is optional. It is discovered with `prefer`, parsed with
//! serde according to its extension, applied on top of [`Settings::default`]
//! and finally overridden by `STRAVA_*` environment variables.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ExtractError, Result};
use crate::rate_limit::{RateLimiterConfig, DEFAULT_STATE_FILE};

/// Default Strava REST endpoint.
pub const DEFAULT_API_BASE_URL: &str = "https://www.strava.com/api/v3/";
/// Default OAuth token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://www.strava.com/oauth/token";
/// Default output directory for extracted records.
pub const DEFAULT_OUTPUT_DIR: &str = "data";
/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "STRAVA_CONFIG_PATH";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Resolved application settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Base URL of the REST API (with trailing slash).
    pub api_base_url: String,
    /// OAuth token endpoint.
    pub token_url: String,
    /// Request timeout in seconds.
    pub request_timeout: u64,
    pub short_term_sleep_minutes: u64,
    pub daily_sleep_hours: u64,
    pub max_retries_before_daily_wait: u32,
    /// Show a countdown while waiting out a rate limit.
    pub show_progress: bool,
    /// Persisted rate limit state.
    pub state_file: PathBuf,
    /// Records requested per page.
    pub page_size: u32,
    /// First page number.
    pub base_page: u32,
    /// Last page to request, if bounded.
    pub maximum_page: Option<u32>,
    /// Window used when no start date is given.
    pub default_lookback_days: u32,
    pub log_level: String,
    pub log_format: LogFormat,
    pub log_file: Option<PathBuf>,
    /// Directory the NDJSON files are written to.
    pub output_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            request_timeout: 30,
            short_term_sleep_minutes: 15,
            daily_sleep_hours: 24,
            max_retries_before_daily_wait: 1,
            show_progress: true,
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
            page_size: 200,
            base_page: 1,
            maximum_page: None,
            default_lookback_days: 30,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            log_file: None,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }
}

impl Settings {
    /// Limiter configuration derived from these settings.
    pub fn rate_limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            short_term_sleep_minutes: self.short_term_sleep_minutes,
            daily_sleep_hours: self.daily_sleep_hours,
            max_retries_before_daily_wait: self.max_retries_before_daily_wait,
            show_progress: self.show_progress,
            state_file: self.state_file.clone(),
        }
    }

    /// Apply `STRAVA_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self, base_dir: &Path) {
        self.apply_overrides(|name| env::var(name).ok(), base_dir);
    }

    /// Apply `STRAVA_*` overrides read through `lookup`.
    ///
    /// Empty values are ignored. Values that fail to parse are logged and
    /// ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F, base_dir: &Path)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(path) = get("STRAVA_STATE_FILE") {
            self.state_file = resolve_path(&path, base_dir);
        }
        if let Some(v) = parse_override(&get, "STRAVA_SHORT_TERM_SLEEP_MINUTES") {
            self.short_term_sleep_minutes = v;
        }
        if let Some(v) = parse_override(&get, "STRAVA_DAILY_SLEEP_HOURS") {
            self.daily_sleep_hours = v;
        }
        if let Some(v) = parse_override(&get, "STRAVA_MAX_RETRIES_BEFORE_DAILY_WAIT") {
            self.max_retries_before_daily_wait = v;
        }
        if let Some(raw) = get("STRAVA_SHOW_PROGRESS") {
            match parse_bool(&raw) {
                Some(v) => self.show_progress = v,
                None => tracing::warn!("Ignoring STRAVA_SHOW_PROGRESS={}: not a boolean", raw),
            }
        }
        if let Some(path) = get("STRAVA_OUTPUT_DIR") {
            self.output_dir = resolve_path(&path, base_dir);
        }
        if let Some(level) = get("STRAVA_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(url) = get("STRAVA_API_BASE_URL") {
            self.api_base_url = with_trailing_slash(url);
        }
    }
}

fn parse_override<T, G>(get: &G, name: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    let raw = get(name)?;
    match raw.trim().parse() {
        Ok(v) => {
            tracing::debug!("Using {} from environment: {}", name, raw);
            Some(v)
        }
        Err(e) => {
            tracing::warn!("Ignoring {}={}: {}", name, raw, e);
            None
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn with_trailing_slash(mut url: String) -> String {
    if !url.ends_with('/') {
        url.push('/');
    }
    url
}

/// Resolve a path that may be relative.
/// - Absolute paths are returned as-is
/// - Paths starting with ~ are expanded
/// - Relative paths are resolved against `base_dir`
pub fn resolve_path(path_str: &str, base_dir: &Path) -> PathBuf {
    let expanded = shellexpand::tilde(path_str);
    let path = Path::new(expanded.as_ref());

    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// `api` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

/// `rate_limiting` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_term_sleep_minutes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_sleep_hours: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries_before_daily_wait: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_progress: Option<bool>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "state_file_path"
    )]
    pub state_file: Option<String>,
}

/// `pagination` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaginationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "per_page")]
    pub page_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_page: Option<u32>,
}

/// `incremental` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncrementalConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_lookback_days: Option<u32>,
}

/// `logging` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<LogFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// `output` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub incremental: IncrementalConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub output: OutputConfig,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Discover a config file with `prefer`.
    /// Falls back to defaults when nothing is found or it fails to parse.
    pub async fn discover() -> Self {
        match prefer::load("strava-extract").await {
            Ok(pref_config) => {
                if let Some(path) = pref_config.source_path() {
                    match Self::load_from_path(path).await {
                        Ok(config) => config,
                        Err(e) => {
                            tracing::warn!("Ignoring discovered config file: {}", e);
                            Self::default()
                        }
                    }
                } else {
                    Self::default()
                }
            }
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    /// The format follows the extension: TOML, YAML, otherwise JSON.
    pub async fn load_from_path(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            ExtractError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut config = Self::parse(&contents, path)?;
        config.source_path = Some(path.to_path_buf());
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn parse(contents: &str, path: &Path) -> Result<Self> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        match ext {
            "toml" => toml::from_str(contents)
                .map_err(|e| ExtractError::Config(format!("Failed to parse TOML config: {}", e))),
            "yaml" | "yml" => serde_yaml::from_str(contents)
                .map_err(|e| ExtractError::Config(format!("Failed to parse YAML config: {}", e))),
            _ => serde_json::from_str(contents)
                .map_err(|e| ExtractError::Config(format!("Failed to parse JSON config: {}", e))),
        }
    }

    /// Directory of the config file, if loaded from one.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Apply configuration to settings.
    /// `base_dir` is used to resolve relative paths.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref url) = self.api.base_url {
            settings.api_base_url = with_trailing_slash(url.clone());
        }
        if let Some(ref url) = self.api.token_url {
            settings.token_url = url.clone();
        }
        if let Some(timeout) = self.api.timeout_seconds {
            settings.request_timeout = timeout;
        }

        let rl = &self.rate_limiting;
        if let Some(minutes) = rl.short_term_sleep_minutes {
            settings.short_term_sleep_minutes = minutes;
        }
        if let Some(hours) = rl.daily_sleep_hours {
            settings.daily_sleep_hours = hours;
        }
        if let Some(retries) = rl.max_retries_before_daily_wait {
            settings.max_retries_before_daily_wait = retries;
        }
        if let Some(show) = rl.show_progress {
            settings.show_progress = show;
        }
        if let Some(ref path) = rl.state_file {
            settings.state_file = resolve_path(path, base_dir);
        }

        match self.pagination.page_size {
            Some(0) => tracing::warn!("Ignoring pagination.page_size = 0"),
            Some(size) => settings.page_size = size,
            None => {}
        }
        if let Some(page) = self.pagination.base_page {
            settings.base_page = page;
        }
        if let Some(page) = self.pagination.maximum_page {
            settings.maximum_page = Some(page);
        }
        if let Some(days) = self.incremental.default_lookback_days {
            settings.default_lookback_days = days;
        }

        if let Some(ref level) = self.logging.level {
            settings.log_level = level.clone();
        }
        if let Some(format) = self.logging.format {
            settings.log_format = format;
        }
        if let Some(ref file) = self.logging.file {
            settings.log_file = Some(resolve_path(file, base_dir));
        }
        if let Some(ref dir) = self.output.dir {
            settings.output_dir = resolve_path(dir, base_dir);
        }
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides discovery).
    pub config_path: Option<PathBuf>,
    /// Use CWD for relative paths instead of the config file directory.
    pub use_cwd: bool,
}

async fn load_config(options: &LoadOptions) -> Result<Config> {
    // Priority 1: explicit --config flag
    if let Some(ref path) = options.config_path {
        return Config::load_from_path(path).await;
    }

    // Priority 2: STRAVA_CONFIG_PATH
    if let Some(path) = env::var(CONFIG_PATH_ENV).ok().filter(|s| !s.is_empty()) {
        tracing::debug!("Using {} from environment: {}", CONFIG_PATH_ENV, path);
        return Config::load_from_path(Path::new(&path)).await;
    }

    // Priority 3: auto-discover via prefer
    Ok(Config::discover().await)
}

/// Load settings with explicit options.
///
/// An explicitly named config file that cannot be read or parsed is an
/// error; a discovered one is skipped with a warning.
pub async fn load_settings_with_options(options: LoadOptions) -> Result<(Settings, Config)> {
    let config = load_config(&options).await?;
    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    let base_dir = if options.use_cwd {
        cwd.clone()
    } else {
        config.base_dir().unwrap_or_else(|| cwd.clone())
    };

    let mut settings = Settings::default();
    settings.state_file = cwd.join(DEFAULT_STATE_FILE);
    settings.output_dir = cwd.join(DEFAULT_OUTPUT_DIR);
    config.apply_to_settings(&mut settings, &base_dir);
    settings.apply_env_overrides(&cwd);

    Ok((settings, config))
}
