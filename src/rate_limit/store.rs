//! File-backed persistence for rate limit state.
//!
//! The record is loaded once per process, mutated in memory and written
//! through to disk after every mutation. Writes go to a temporary sibling
//! that is renamed over the target, so a reader never sees a partial file.
//! I/O failures are logged and never surfaced: losing persisted state is
//! recoverable, aborting a healthy run is not.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use super::state::{Checkpoint, PersistedState};

/// Owns one [`PersistedState`] and its backing file.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    state: Option<PersistedState>,
}

impl StateStore {
    /// Create a store for `path`. Nothing is read until first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        debug!("State store initialized with file: {}", path.display());
        Self { path, state: None }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current state, loading it from disk on first access.
    pub fn state(&mut self) -> &mut PersistedState {
        if self.state.is_none() {
            self.load();
        }
        self.state.get_or_insert_with(|| PersistedState::fresh(Utc::now()))
    }

    /// Read the backing file, replacing any in-memory state.
    ///
    /// A missing or unreadable file yields a fresh record. A record whose
    /// `day_start` is on an earlier day has its daily counter reset; the
    /// resume time and checkpoint survive the rollover.
    pub fn load(&mut self) -> &mut PersistedState {
        let now = Utc::now();
        let state = match read_state(&self.path) {
            Ok(Some(mut state)) => {
                info!("Loaded rate limit state from {}", self.path.display());
                if state.is_new_day(now) {
                    info!("New day detected, resetting daily request counter");
                    state.total_requests_today = 0;
                    state.day_start = Some(now);
                } else if state.day_start.is_none() {
                    state.day_start = Some(now);
                }
                state
            }
            Ok(None) => PersistedState::fresh(now),
            Err(e) => {
                warn!(
                    "Failed to load state file {}: {}. Starting fresh.",
                    self.path.display(),
                    e
                );
                PersistedState::fresh(now)
            }
        };
        self.state.insert(state)
    }

    /// Write the current state to disk. Failures are logged, not returned.
    pub fn save(&self) {
        let Some(state) = self.state.as_ref() else {
            return;
        };
        match write_state(&self.path, state) {
            Ok(()) => debug!("Saved rate limit state to {}", self.path.display()),
            Err(e) => error!(
                "Failed to save state file {}: {}",
                self.path.display(),
                e
            ),
        }
    }

    /// Remove the backing file. The next access starts from a fresh record.
    pub fn delete(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => info!("Deleted state file: {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => error!(
                "Failed to delete state file {}: {}",
                self.path.display(),
                e
            ),
        }
        self.state = None;
    }

    /// Replace the record with a fresh one and persist it.
    pub fn reset(&mut self) {
        self.state = Some(PersistedState::fresh(Utc::now()));
        self.save();
        info!("Rate limit state reset");
    }

    /// Count a successful request and clear per-URL escalation.
    pub fn record_request(&mut self) {
        let state = self.state();
        state.total_requests_today += 1;
        state.requests_since_last_429 += 1;
        state.current_request_retries = 0;
        state.current_request_url = None;
        self.save();
    }

    /// Record a 429 for `url` and return the consecutive count for that URL.
    pub fn record_429(&mut self, url: &str, now: DateTime<Utc>) -> u32 {
        let state = self.state();
        state.last_429_time = Some(now);
        state.requests_since_last_429 = 0;

        if state.current_request_url.as_deref() == Some(url) {
            state.current_request_retries += 1;
        } else {
            state.current_request_url = Some(url.to_string());
            state.current_request_retries = 1;
        }

        let retries = state.current_request_retries;
        self.save();
        retries
    }

    /// Persist the halt: the checkpoint (when supplied) and the resume time
    /// land in the same write.
    pub fn halt(&mut self, resume_after: DateTime<Utc>, checkpoint: Option<Checkpoint>) {
        let state = self.state();
        if let Some(checkpoint) = checkpoint {
            info!(
                "Saved pipeline state: resource={}, cursor={}",
                checkpoint.resource, checkpoint.cursor
            );
            state.last_successful_checkpoint = Some(checkpoint);
        }
        state.resume_after = Some(resume_after);
        self.save();
    }

    /// Clear the resume time and per-URL retry tracking.
    ///
    /// Returns whether anything changed; nothing is written otherwise.
    pub fn clear_resume_time(&mut self) -> bool {
        let state = self.state();
        let changed = state.resume_after.is_some()
            || state.current_request_retries != 0
            || state.current_request_url.is_some();
        if changed {
            state.resume_after = None;
            state.current_request_retries = 0;
            state.current_request_url = None;
            self.save();
        }
        changed
    }

    /// Drop the saved checkpoint.
    pub fn clear_checkpoint(&mut self) {
        let state = self.state();
        if state.last_successful_checkpoint.take().is_some() {
            self.save();
        }
    }
}

fn read_state(path: &Path) -> anyhow::Result<Option<PersistedState>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_str(&contents)?))
}

fn write_state(path: &Path, state: &PersistedState) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, state)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
