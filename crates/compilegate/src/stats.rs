//! Compilation statistics
//!
//! Aggregate counters and recent timings, optionally persisted as JSON after
//! every update.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Number of recent compilation times kept for timing statistics
pub const MAX_RECENT_TIMES: usize = 100;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("failed to write stats file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize stats: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Lifecycle hooks the orchestrator calls for every admitted job
///
/// Implementations must serialize their own updates and must not panic;
/// recording problems are theirs to log.
pub trait StatsRecorder: Send + Sync {
    fn record_start(&self);
    fn record_success(&self, duration_seconds: f64);
    fn record_failure(&self, duration_seconds: f64);
}

/// Public view of the statistics, without the raw timing samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsSnapshot {
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub total_compilations: u64,
    pub successful_compilations: u64,
    pub failed_compilations: u64,
    pub avg_compilation_time_seconds: f64,
    pub median_compilation_time_seconds: f64,
    pub min_compilation_time_seconds: f64,
    pub max_compilation_time_seconds: f64,
}

impl Default for StatsSnapshot {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            last_updated: now,
            total_compilations: 0,
            successful_compilations: 0,
            failed_compilations: 0,
            avg_compilation_time_seconds: 0.0,
            median_compilation_time_seconds: 0.0,
            min_compilation_time_seconds: 0.0,
            max_compilation_time_seconds: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StatsData {
    #[serde(flatten)]
    summary: StatsSnapshot,
    #[serde(default)]
    compilation_times: Vec<f64>,
}

impl StatsData {
    fn record_time(&mut self, duration: f64) {
        self.compilation_times.push(round_ms(duration));
        if self.compilation_times.len() > MAX_RECENT_TIMES {
            let excess = self.compilation_times.len() - MAX_RECENT_TIMES;
            self.compilation_times.drain(..excess);
        }

        let mut sorted = self.compilation_times.clone();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();
        if n == 0 {
            return;
        }

        let summary = &mut self.summary;
        summary.avg_compilation_time_seconds = round_ms(sorted.iter().sum::<f64>() / n as f64);
        summary.min_compilation_time_seconds = sorted[0];
        summary.max_compilation_time_seconds = sorted[n - 1];
        let median = if n % 2 == 0 {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        } else {
            sorted[n / 2]
        };
        summary.median_compilation_time_seconds = round_ms(median);
    }
}

fn round_ms(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}

/// Thread-safe statistics tracker
#[derive(Debug)]
pub struct Stats {
    path: Option<PathBuf>,
    data: Mutex<StatsData>,
}

impl Stats {
    /// Statistics that live only as long as the process
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: Mutex::new(StatsData::default()),
        }
    }

    /// Load statistics from `path`, starting fresh if it is missing or unreadable
    ///
    /// Fields absent from an older file are filled with defaults.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<StatsData>(&content) {
                Ok(data) => data,
                Err(e) => {
                    warn!(?path, error = %e, "stats file unreadable, starting fresh");
                    StatsData::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StatsData::default(),
            Err(e) => {
                warn!(?path, error = %e, "failed to read stats file, starting fresh");
                StatsData::default()
            }
        };
        Self {
            path: Some(path),
            data: Mutex::new(data),
        }
    }

    /// Current statistics
    pub fn snapshot(&self) -> StatsSnapshot {
        self.lock().summary.clone()
    }

    /// Where the statistics are persisted, if anywhere
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, StatsData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` and persist, all under the lock so concurrent updates serialize
    ///
    /// Persistence is a synchronous write of a small JSON file and runs on the
    /// calling thread, including from async contexts such as the job guard.
    /// Recorders that must not block should wrap [`Stats`] and move the calls
    /// onto `tokio::task::spawn_blocking`.
    fn update(&self, f: impl FnOnce(&mut StatsData)) {
        let mut data = self.lock();
        f(&mut data);
        data.summary.last_updated = Utc::now();
        if let Err(e) = self.persist(&data) {
            warn!(error = %e, "could not save stats");
        }
    }

    fn persist(&self, data: &StatsData) -> Result<(), StatsError> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(data)?;
        std::fs::write(path, json).map_err(|source| StatsError::Write {
            path: path.clone(),
            source,
        })?;
        debug!(?path, "stats saved");
        Ok(())
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl StatsRecorder for Stats {
    fn record_start(&self) {
        self.update(|data| data.summary.total_compilations += 1);
    }

    fn record_success(&self, duration_seconds: f64) {
        self.update(|data| {
            data.summary.successful_compilations += 1;
            data.record_time(duration_seconds);
        });
    }

    fn record_failure(&self, duration_seconds: f64) {
        self.update(|data| {
            data.summary.failed_compilations += 1;
            data.record_time(duration_seconds);
        });
    }
}
