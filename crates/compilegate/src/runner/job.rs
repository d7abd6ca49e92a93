//! Per-job control loop

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::process::{JobFiles, ProcessOutcome};
use crate::queue::{Admission, AdmissionQueue, WaitOutcome};
use crate::runner::{CompileError, Compiler};
use crate::sanitize::SanitizeError;
use crate::stats::StatsRecorder;
use crate::types::{Job, JobId, JobState, OutputEvent};

type Events = mpsc::UnboundedSender<OutputEvent>;

fn emit(events: &Events, event: OutputEvent) {
    // The caller may have stopped listening; the job still runs to completion
    let _ = events.send(event);
}

/// Records the outcome and gives up the queue entry when dropped
///
/// Stats are only recorded for jobs that became active.
struct JobGuard {
    queue: Arc<AdmissionQueue>,
    stats: Arc<dyn StatsRecorder>,
    id: JobId,
    started: Option<Instant>,
    succeeded: bool,
    armed: bool,
}

impl JobGuard {
    fn new(queue: Arc<AdmissionQueue>, stats: Arc<dyn StatsRecorder>, id: JobId) -> Self {
        Self {
            queue,
            stats,
            id,
            started: None,
            succeeded: false,
            armed: true,
        }
    }

    fn activate(&mut self) {
        self.started = Some(Instant::now());
        let stats = &self.stats;
        self.record(|| stats.record_start());
    }

    fn succeed(&mut self) {
        self.succeeded = true;
    }

    /// The job never entered the queue
    fn disarm(&mut self) {
        self.armed = false;
    }

    /// Run a stats hook; a panicking recorder is logged and otherwise ignored
    fn record(&self, hook: impl FnOnce()) {
        if catch_unwind(AssertUnwindSafe(hook)).is_err() {
            warn!(job_id = %self.id, "stats recorder panicked");
        }
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        if let Some(started) = self.started {
            let elapsed = started.elapsed().as_secs_f64();
            let stats = &self.stats;
            if self.succeeded {
                self.record(|| stats.record_success(elapsed));
            } else {
                self.record(|| stats.record_failure(elapsed));
            }
        }

        let release = self.queue.release(self.id);
        debug!(job_id = %self.id, ?release, "released");
    }
}

impl Compiler {
    /// Drive one job to its terminal event
    ///
    /// The guard inside [`run_job`](Self::run_job) is dropped before `events`,
    /// so the slot is released before the caller sees the stream end.
    pub(super) async fn drive(self, job: Job, source: String, events: Events) {
        self.run_job(job, &source, &events).await;
    }

    #[instrument(skip_all, fields(job_id = %job.id))]
    async fn run_job(&self, mut job: Job, source: &str, events: &Events) {
        let max = self.config.max_source_length;
        if source.chars().count() > max {
            debug!(max, "source rejected before admission");
            emit(events, CompileError::from(SanitizeError::TooLong { max }).into());
            return;
        }

        let mut guard = JobGuard::new(self.queue.clone(), self.stats.clone(), job.id);

        match self.queue.try_enqueue(job.id) {
            Admission::Admitted => {}
            Admission::Enqueued(_) => {
                if let Err(e) = self.wait_for_slot(job.id, events).await {
                    job.state = JobState::Cancelled;
                    info!(error = %e, state = ?job.state, age = ?age(&job), "job left the queue");
                    emit(events, e.into());
                    return;
                }
            }
            Admission::Rejected(reason) => {
                guard.disarm();
                info!(%reason, "admission rejected");
                emit(events, CompileError::AdmissionRejected(reason).into());
                return;
            }
        }

        job.state = JobState::Active;
        emit(events, OutputEvent::QueuePosition(0));
        guard.activate();
        emit(events, OutputEvent::Status("Starting compilation".to_string()));

        // A panicking collaborator must still end the stream with an error
        let compiled = AssertUnwindSafe(self.compile(&job, source, events))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                warn!("compilation step panicked");
                Err(CompileError::Internal)
            });

        match compiled {
            Ok(artifact) => {
                emit(events, OutputEvent::Status("Compilation successful".to_string()));
                emit(events, OutputEvent::Artifact(artifact));
                guard.succeed();
                info!("compilation succeeded");
            }
            Err(e) => {
                if let Some(status) = failure_status(&e) {
                    emit(events, OutputEvent::Status(status));
                }
                info!(error = ?e, "compilation failed");
                emit(events, e.into());
            }
        }

        job.state = JobState::Completed;
        info!(state = ?job.state, age = ?age(&job), "job finished");
    }

    /// Report positions until the job is admitted, removed or out of time
    async fn wait_for_slot(&self, id: JobId, events: &Events) -> Result<(), CompileError> {
        let wait_timeout = self.config.queue_wait_timeout();
        let turn = self.queue.await_turn(id, |position| {
            debug!(position, "queue position changed");
            emit(events, OutputEvent::QueuePosition(position));
            emit(
                events,
                OutputEvent::Status(format!("Waiting in queue (position {position})")),
            );
        });

        match tokio::time::timeout(wait_timeout, turn).await {
            Ok(WaitOutcome::Admitted) => Ok(()),
            Ok(WaitOutcome::Removed) => Err(CompileError::Cancelled),
            Err(_) => {
                // Promotion can land between the timeout firing and the cancel
                if !self.queue.cancel(id) && self.queue.position(id) == Some(0) {
                    return Ok(());
                }
                Err(CompileError::WaitTimeout {
                    seconds: wait_timeout.as_secs_f64(),
                })
            }
        }
    }

    /// Sanitize, write the input file and run the compiler
    async fn compile(&self, job: &Job, source: &str, events: &Events) -> Result<String, CompileError> {
        let clean = self.sanitizer.sanitize(source)?;

        let files = JobFiles::create(&self.work_dir(), job.id, &clean)
            .await
            .map_err(|e| {
                if self.config.debug {
                    warn!(error = %e, "failed to write job input");
                } else {
                    warn!(kind = ?e.kind(), "failed to write job input");
                }
                CompileError::Workspace(e)
            })?;

        let argv = self.commands.build(files.input(), files.output(), &job.options);
        if self.config.debug {
            debug!(?argv, "running compiler");
            emit(events, OutputEvent::Log(format!("Running: {}", argv.join(" "))));
        }

        let run = self.runner.run(&argv, files, events).await;
        debug!(elapsed = ?run.elapsed, lines = run.log.len(), "compiler finished");

        match run.outcome {
            ProcessOutcome::Success(artifact) => Ok(artifact),
            ProcessOutcome::NonZeroExit(code) => Err(CompileError::NonZeroExit { code }),
            ProcessOutcome::MissingArtifact => Err(CompileError::MissingArtifact),
            ProcessOutcome::TimedOut => Err(CompileError::ProcessTimeout {
                seconds: self.runner.timeout().as_secs_f64(),
            }),
            ProcessOutcome::SpawnFailed => Err(CompileError::SpawnFailed),
        }
    }
}

/// Time since the job was submitted
fn age(job: &Job) -> Duration {
    job.submitted_at.elapsed().unwrap_or_default()
}

/// Status line preceding the error of a compiler run that ended badly
fn failure_status(err: &CompileError) -> Option<String> {
    match err {
        CompileError::NonZeroExit { code: Some(code) } => {
            Some(format!("Compilation failed (exit code {code})"))
        }
        CompileError::NonZeroExit { code: None } => {
            Some("Compilation failed (terminated by signal)".to_string())
        }
        CompileError::MissingArtifact => Some("Compilation failed (no output)".to_string()),
        _ => None,
    }
}
