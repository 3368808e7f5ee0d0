//! Tracing subscriber setup.

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, Settings};

/// How log output is filtered, formatted and where it goes.
#[derive(Debug, Clone, PartialEq)]
pub struct LogOptions {
    pub level: String,
    pub format: LogFormat,
    /// Append to this file instead of writing to stderr.
    pub file: Option<PathBuf>,
}

impl LogOptions {
    /// Options from settings; `verbose` raises the level to debug.
    pub fn from_settings(settings: &Settings, verbose: bool) -> Self {
        Self {
            level: if verbose {
                "debug".to_string()
            } else {
                settings.log_level.clone()
            },
            format: settings.log_format,
            file: settings.log_file.clone(),
        }
    }

    /// Filter used when `RUST_LOG` is not set.
    pub fn default_filter(&self) -> String {
        format!("strava_extract={}", self.level)
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
///
/// Calling this twice is harmless; the first subscriber stays installed.
pub fn init(options: &LogOptions) -> io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.default_filter()));

    let (writer, ansi) = match options.file {
        Some(ref path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(io::stderr), true),
    };

    let layer = fmt::layer().with_writer(writer).with_ansi(ansi);
    let result = match options.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init(),
    };
    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
    Ok(())
}
