//! External compiler supervision
//!
//! Spawns the compiler for one job, streams its stderr as log events while it
//! runs, enforces a wall-clock budget and collects the output artifact.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

pub use crate::process::command::{CommandBuilder, CompilerCommand, FactoCommandBuilder};
pub use crate::process::files::JobFiles;
use crate::types::OutputEvent;

mod command;
mod files;

/// Longest stderr line forwarded; the remainder of a longer line is dropped
const MAX_LINE_BYTES: usize = 64 * 1024;

/// How a compiler run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Exit code 0 and a non-empty artifact
    Success(String),
    /// Non-zero exit, or `None` when terminated by a signal
    NonZeroExit(Option<i32>),
    /// Exit code 0 but no readable artifact
    MissingArtifact,
    /// Killed after exceeding the wall-clock budget
    TimedOut,
    /// The executable could not be started
    SpawnFailed,
}

impl ProcessOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessOutcome::Success(_))
    }
}

/// Record of one compiler run
#[derive(Debug, Clone)]
pub struct ProcessRun {
    /// stderr lines in emission order
    pub log: Vec<String>,
    pub outcome: ProcessOutcome,
    /// Time from spawn attempt to outcome
    pub elapsed: Duration,
}

/// Runs the compiler with a wall-clock budget
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
    debug: bool,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            debug: false,
        }
    }

    /// Include paths and raw I/O errors in log records
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `argv` inside the job's directory
    ///
    /// Every stderr line is forwarded to `events` as [`OutputEvent::Log`] as
    /// soon as it is read. The job files are removed before this returns,
    /// whatever the outcome.
    #[instrument(skip_all, fields(timeout = ?self.timeout))]
    pub async fn run(
        &self,
        argv: &[String],
        mut files: JobFiles,
        events: &mpsc::UnboundedSender<OutputEvent>,
    ) -> ProcessRun {
        let started = Instant::now();
        let mut log = Vec::new();

        let outcome = self.supervise(argv, &files, events, &mut log).await;
        files.cleanup().await;

        let elapsed = started.elapsed();
        debug!(?outcome, ?elapsed, lines = log.len(), "compiler run finished");

        ProcessRun {
            log,
            outcome,
            elapsed,
        }
    }

    async fn supervise(
        &self,
        argv: &[String],
        files: &JobFiles,
        events: &mpsc::UnboundedSender<OutputEvent>,
        log: &mut Vec<String>,
    ) -> ProcessOutcome {
        let Some((program, args)) = argv.split_first() else {
            warn!("empty compiler command");
            return ProcessOutcome::SpawnFailed;
        };

        let mut child = match Command::new(program)
            .args(args)
            .current_dir(files.dir())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                if self.debug {
                    warn!(%program, error = %e, "failed to spawn compiler");
                } else {
                    warn!(kind = ?e.kind(), "failed to spawn compiler");
                }
                return ProcessOutcome::SpawnFailed;
            }
        };

        let stderr = child.stderr.take();
        let finished = tokio::time::timeout(self.timeout, async {
            if let Some(stderr) = stderr {
                stream_lines(stderr, events, log).await;
            }
            child.wait().await
        })
        .await;

        let status = match finished {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                warn!(error = %e, "failed to wait for compiler");
                return ProcessOutcome::NonZeroExit(None);
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "compiler timed out, killing");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill compiler");
                }
                return ProcessOutcome::TimedOut;
            }
        };

        debug!(exit_code = ?status.code(), "compiler exited");

        if !status.success() {
            return ProcessOutcome::NonZeroExit(status.code());
        }

        match tokio::fs::read(files.output()).await {
            Ok(bytes) => {
                let artifact = String::from_utf8_lossy(&bytes).trim_end().to_string();
                if artifact.is_empty() {
                    warn!("compiler exited 0 with an empty artifact");
                    ProcessOutcome::MissingArtifact
                } else {
                    ProcessOutcome::Success(artifact)
                }
            }
            Err(e) => {
                if self.debug {
                    warn!(path = ?files.output(), error = %e, "compiler exited 0 without an artifact");
                } else {
                    warn!("compiler exited 0 without an artifact");
                }
                ProcessOutcome::MissingArtifact
            }
        }
    }
}

/// Forward stderr line by line until EOF
///
/// Lines are decoded lossily, trailing whitespace is trimmed and anything past
/// [`MAX_LINE_BYTES`] is discarded.
async fn stream_lines(
    stderr: ChildStderr,
    events: &mpsc::UnboundedSender<OutputEvent>,
    log: &mut Vec<String>,
) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = (&mut reader)
            .take(MAX_LINE_BYTES as u64)
            .read_until(b'\n', &mut buf)
            .await;
        match read {
            Ok(0) => break,
            Ok(n) => {
                if n == MAX_LINE_BYTES && buf.last() != Some(&b'\n') {
                    debug!(limit = MAX_LINE_BYTES, "truncating long stderr line");
                    if let Err(e) = skip_line(&mut reader).await {
                        debug!(error = %e, "stderr read failed");
                        break;
                    }
                }
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                log.push(line.clone());
                // A closed receiver only means nobody is listening any more
                let _ = events.send(OutputEvent::Log(line));
            }
            Err(e) => {
                debug!(error = %e, "stderr read failed");
                break;
            }
        }
    }
}

/// Consume input up to and including the next newline
async fn skip_line(reader: &mut BufReader<ChildStderr>) -> std::io::Result<()> {
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(());
        }
        match available.iter().position(|&b| b == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                return Ok(());
            }
            None => {
                let len = available.len();
                reader.consume(len);
            }
        }
    }
}
