use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

mod loader;

/// Example configuration embedded at compile time.
///
/// The CLI writes this out for `compilegate init`.
pub const EXAMPLE_CONFIG: &str = include_str!("../../compilegate.example.toml");

/// Prefix for environment variable overrides (e.g. `COMPILEGATE_QUEUE_CAPACITY`)
pub const ENV_PREFIX: &str = "COMPILEGATE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("invalid deny pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Config for compilegate
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Compiler executable (resolved through PATH if it has no `/`).
    #[serde(default = "default_compiler_path")]
    pub compiler_path: PathBuf,

    /// Arguments placed between the executable and the input file.
    ///
    /// Useful for launchers such as `python -m factompile`.
    #[serde(default)]
    pub compiler_args: Vec<String>,

    /// Directory for per-job input and output files (system temp dir if unset).
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Maximum source length in characters.
    #[serde(default = "default_max_source_length")]
    pub max_source_length: usize,

    /// Wall-clock budget for one compiler run, in seconds.
    #[serde(default = "default_compilation_timeout")]
    pub compilation_timeout: f64,

    /// Number of jobs allowed to wait behind the active one.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How long a job may wait for the compilation slot, in seconds.
    #[serde(default = "default_queue_wait_timeout")]
    pub queue_wait_timeout: f64,

    /// Upper bound on queue position staleness, in seconds.
    #[serde(default = "default_queue_poll_interval")]
    pub queue_poll_interval: f64,

    /// Echo internal paths and command lines in logs and events.
    #[serde(default)]
    pub debug: bool,

    /// Where compilation statistics are persisted (in-memory only if unset).
    #[serde(default)]
    pub stats_file: Option<PathBuf>,

    /// Regex denylist replacing the built-in suspicious-source patterns.
    #[serde(default)]
    pub deny_patterns: Option<Vec<String>>,
}

impl Config {
    /// Create a config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Wall-clock budget for one compiler run
    pub fn compilation_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.compilation_timeout)
    }

    /// Maximum time a job may spend waiting in the queue
    pub fn queue_wait_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.queue_wait_timeout)
    }

    /// Interval at which waiting jobs re-check their position
    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.queue_poll_interval)
    }

    /// Directory for ephemeral job files
    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            compiler_path: default_compiler_path(),
            compiler_args: Vec::new(),
            work_dir: None,
            max_source_length: default_max_source_length(),
            compilation_timeout: default_compilation_timeout(),
            queue_capacity: default_queue_capacity(),
            queue_wait_timeout: default_queue_wait_timeout(),
            queue_poll_interval: default_queue_poll_interval(),
            debug: false,
            stats_file: None,
            deny_patterns: None,
        }
    }
}

fn default_compiler_path() -> PathBuf {
    PathBuf::from("factompile")
}

fn default_max_source_length() -> usize {
    50_000
}

fn default_compilation_timeout() -> f64 {
    30.0
}

fn default_queue_capacity() -> usize {
    10
}

fn default_queue_wait_timeout() -> f64 {
    300.0
}

fn default_queue_poll_interval() -> f64 {
    1.0
}
