//! Queued, single-flight compilation of untrusted source.
//!
//! Compilegate puts an external compiler (`factompile`) behind a bounded FIFO
//! admission queue so that at most one compilation runs at a time, and
//! streams progress for every submitted job as an ordered sequence of events.
//!
//! # Features
//!
//! - **Admission queue**: one active slot, bounded waiting list, live queue positions.
//! - **Process supervision**: streamed compiler logs, wall-clock timeout, no orphaned processes.
//! - **Input screening**: length limit plus a configurable regex denylist.
//! - **Statistics**: success/failure counts and timings, optionally persisted as JSON.
//! - **TOML configuration** with `COMPILEGATE_` environment overrides.

pub use config::{Config, ConfigError, EXAMPLE_CONFIG};
pub use process::{CommandBuilder, FactoCommandBuilder, ProcessOutcome, ProcessRunner};
pub use queue::{Admission, AdmissionQueue, QueueError, WaitOutcome};
pub use runner::{CompileError, CompileEventStream, Compiler};
pub use sanitize::{DenylistSanitizer, SanitizeError, Sanitizer};
pub use stats::{Stats, StatsRecorder, StatsSnapshot};
pub use types::{CompileOptions, JobId, LogLevel, OutputEvent, PoleSize};

pub mod config;
pub mod process;
pub mod queue;
pub mod runner;
pub mod sanitize;
pub mod stats;
pub mod types;
