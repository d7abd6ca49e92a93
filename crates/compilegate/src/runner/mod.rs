//! Compilation orchestrator
//!
//! Provides the high-level API: submit source, get back an ordered stream of
//! [`OutputEvent`]s while the job waits for, holds and releases the single
//! compilation slot.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

pub use crate::runner::stream::CompileEventStream;

mod job;
mod stream;

use crate::config::{Config, ConfigError};
use crate::process::{CommandBuilder, FactoCommandBuilder, ProcessRunner};
use crate::queue::{AdmissionQueue, QueueError};
use crate::sanitize::{DenylistSanitizer, SanitizeError, Sanitizer};
use crate::stats::{Stats, StatsRecorder};
use crate::types::{CompileOptions, Job, OutputEvent};

/// Reasons a job ends without a blueprint
///
/// The `Display` text is what the caller sees in the final
/// [`OutputEvent::Error`], so it never contains paths or command lines.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Server busy: the compilation queue is full. Please try again later.")]
    AdmissionRejected(#[source] QueueError),

    #[error("Timed out after waiting {seconds}s for a compilation slot. Please try again.")]
    WaitTimeout { seconds: f64 },

    #[error("Job was removed from the queue")]
    Cancelled,

    #[error("{0}")]
    SanitizationRejected(#[from] SanitizeError),

    #[error("Failed to prepare compilation")]
    Workspace(#[source] std::io::Error),

    #[error("Compiler is unavailable. Please try again later.")]
    SpawnFailed,

    #[error("Compilation timed out after {seconds}s")]
    ProcessTimeout { seconds: f64 },

    #[error("See log output for details")]
    NonZeroExit { code: Option<i32> },

    #[error("Compiler finished without producing a blueprint")]
    MissingArtifact,

    #[error("Compilation failed unexpectedly. Please try again later.")]
    Internal,
}

impl From<CompileError> for OutputEvent {
    fn from(err: CompileError) -> Self {
        OutputEvent::Error(err.to_string())
    }
}

/// Queued, single-flight compiler front end
///
/// Cloning is cheap; clones share the same queue and collaborators.
#[derive(Clone)]
pub struct Compiler {
    config: Arc<Config>,
    queue: Arc<AdmissionQueue>,
    sanitizer: Arc<dyn Sanitizer>,
    commands: Arc<dyn CommandBuilder>,
    stats: Arc<dyn StatsRecorder>,
    runner: ProcessRunner,
}

impl Compiler {
    /// Create a compiler with the default collaborators described by `config`
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let sanitizer = DenylistSanitizer::from_config(&config)?;
        let commands = FactoCommandBuilder::from_config(&config);
        let stats = match config.stats_file {
            Some(ref path) => Stats::load(path),
            None => Stats::in_memory(),
        };
        let queue = AdmissionQueue::new(config.queue_capacity, config.queue_poll_interval());
        let runner = ProcessRunner::new(config.compilation_timeout()).with_debug(config.debug);

        Ok(Self {
            config: Arc::new(config),
            queue: Arc::new(queue),
            sanitizer: Arc::new(sanitizer),
            commands: Arc::new(commands),
            stats: Arc::new(stats),
            runner,
        })
    }

    /// Replace the source sanitizer
    pub fn with_sanitizer(mut self, sanitizer: Arc<dyn Sanitizer>) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    /// Replace the compiler command builder
    pub fn with_command_builder(mut self, commands: Arc<dyn CommandBuilder>) -> Self {
        self.commands = commands;
        self
    }

    /// Replace the statistics sink
    pub fn with_stats(mut self, stats: Arc<dyn StatsRecorder>) -> Self {
        self.stats = stats;
        self
    }

    /// Share an existing admission queue
    pub fn with_queue(mut self, queue: Arc<AdmissionQueue>) -> Self {
        self.queue = queue;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn queue(&self) -> &Arc<AdmissionQueue> {
        &self.queue
    }

    /// Directory where job files are created
    pub fn work_dir(&self) -> PathBuf {
        self.config.work_dir()
    }

    /// Submit source for compilation
    ///
    /// The job runs on a spawned task; the returned stream yields its events
    /// in order and ends after the terminal event. Must be called from within
    /// a Tokio runtime.
    pub fn submit(&self, source: impl Into<String>, options: CompileOptions) -> CompileEventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let job = Job::new(options);
        let job_id = job.id;
        let this = self.clone();
        let source = source.into();

        let handle = tokio::spawn(async move {
            this.drive(job, source, tx).await;
        });

        CompileEventStream::new(job_id, rx, handle)
    }
}

impl fmt::Debug for Compiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compiler")
            .field("config", &self.config)
            .field("queue", &self.queue)
            .field("runner", &self.runner)
            .finish_non_exhaustive()
    }
}
