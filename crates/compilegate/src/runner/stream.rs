use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::types::{JobId, OutputEvent};

/// Ordered events of one submitted job
///
/// The stream ends once the job has finished and released the compilation
/// slot. Dropping it before then aborts the job: a waiting job leaves the
/// queue, a running compiler is killed.
#[derive(Debug)]
pub struct CompileEventStream {
    job_id: JobId,
    rx: mpsc::UnboundedReceiver<OutputEvent>,
    handle: JoinHandle<()>,
}

impl CompileEventStream {
    pub(crate) fn new(
        job_id: JobId,
        rx: mpsc::UnboundedReceiver<OutputEvent>,
        handle: JoinHandle<()>,
    ) -> Self {
        Self { job_id, rx, handle }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Next event, or `None` after the terminal one
    pub async fn recv(&mut self) -> Option<OutputEvent> {
        self.rx.recv().await
    }

    /// Wait for the job to finish and return all remaining events
    pub async fn collect(mut self) -> Vec<OutputEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }

    /// Abort the job without waiting for it
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Whether the job task has finished
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for CompileEventStream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
