//! Admission queue for the compilation slot
//!
//! Exactly one job holds the active slot at a time. Everyone else waits in a
//! bounded FIFO and is promoted strictly in arrival order when the active job
//! releases the slot.
//!
//! ## Invariants
//! - A job id is either active, waiting, or unknown to the queue, never two at once.
//! - The waiting sequence never grows beyond the configured capacity.
//! - No caller-supplied callback runs while the internal lock is held.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, instrument};

use crate::types::JobId;

/// Reasons a job is refused at the door
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue full ({capacity} jobs waiting)")]
    Full { capacity: usize },

    #[error("job {0} is already queued")]
    Duplicate(JobId),
}

/// Result of [`AdmissionQueue::try_enqueue`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The job holds the active slot
    Admitted,
    /// The job is waiting at this 1-based position
    Enqueued(usize),
    /// The job was not added to the queue
    Rejected(QueueError),
}

/// Result of [`AdmissionQueue::await_turn`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Admitted,
    Removed,
}

/// Result of [`AdmissionQueue::release`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The active slot was freed, and possibly handed to the next waiter
    Released { promoted: Option<JobId> },
    /// The job was still waiting and has been dropped from the queue
    Removed,
    /// The job is neither active nor waiting
    Unknown,
}

#[derive(Debug, Default)]
struct QueueState {
    active: Option<JobId>,
    waiting: VecDeque<JobId>,
    handles: HashMap<JobId, Arc<Notify>>,
}

impl QueueState {
    fn position(&self, id: JobId) -> Option<usize> {
        if self.active == Some(id) {
            return Some(0);
        }
        self.waiting.iter().position(|w| *w == id).map(|i| i + 1)
    }

    fn remove_waiting(&mut self, id: JobId) -> bool {
        let Some(idx) = self.waiting.iter().position(|w| *w == id) else {
            return false;
        };
        self.waiting.remove(idx);
        if let Some(handle) = self.handles.remove(&id) {
            handle.notify_one();
        }
        true
    }

    /// Wake every waiter so it re-reads its position
    fn wake_all(&self) {
        for handle in self.handles.values() {
            handle.notify_one();
        }
    }
}

/// Bounded FIFO gate in front of a single compilation slot
#[derive(Debug)]
pub struct AdmissionQueue {
    capacity: usize,
    poll_interval: Duration,
    state: Mutex<QueueState>,
}

impl AdmissionQueue {
    /// Create a queue holding at most `capacity` waiting jobs
    pub fn new(capacity: usize, poll_interval: Duration) -> Self {
        Self {
            capacity,
            poll_interval,
            state: Mutex::new(QueueState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // Every mutation leaves the state consistent, so a poisoned lock is still usable
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit the job immediately, queue it, or reject it when the queue is full
    #[instrument(skip(self))]
    pub fn try_enqueue(&self, id: JobId) -> Admission {
        let mut state = self.lock();

        if state.position(id).is_some() {
            return Admission::Rejected(QueueError::Duplicate(id));
        }

        if state.active.is_none() && state.waiting.is_empty() {
            state.active = Some(id);
            debug!("admitted immediately");
            return Admission::Admitted;
        }

        if state.waiting.len() >= self.capacity {
            debug!(capacity = self.capacity, "queue full");
            return Admission::Rejected(QueueError::Full {
                capacity: self.capacity,
            });
        }

        state.waiting.push_back(id);
        state.handles.insert(id, Arc::new(Notify::new()));
        let position = state.waiting.len();
        debug!(position, "enqueued");
        Admission::Enqueued(position)
    }

    /// Wait until the job becomes active or is removed from the queue
    ///
    /// `on_position` is called with each new 1-based position, starting with
    /// the current one. Positions are re-read whenever the queue changes and at
    /// least once per poll interval.
    pub async fn await_turn<F>(&self, id: JobId, mut on_position: F) -> WaitOutcome
    where
        F: FnMut(usize),
    {
        let handle = {
            let state = self.lock();
            if state.active == Some(id) {
                return WaitOutcome::Admitted;
            }
            match state.handles.get(&id) {
                Some(handle) => handle.clone(),
                None => return WaitOutcome::Removed,
            }
        };

        let mut last = None;
        loop {
            match self.position(id) {
                Some(0) => return WaitOutcome::Admitted,
                None => return WaitOutcome::Removed,
                Some(position) => {
                    if last != Some(position) {
                        last = Some(position);
                        on_position(position);
                    }
                }
            }

            let _ = tokio::time::timeout(self.poll_interval, handle.notified()).await;
        }
    }

    /// Give up the slot, or leave the queue if the job never got it
    ///
    /// Releasing an unknown id is a no-op.
    #[instrument(skip(self))]
    pub fn release(&self, id: JobId) -> Release {
        let mut state = self.lock();

        if state.active == Some(id) {
            state.active = state.waiting.pop_front();
            let promoted = state.active;
            if let Some(next) = promoted {
                if let Some(handle) = state.handles.remove(&next) {
                    handle.notify_one();
                }
                debug!(%next, "promoted next job");
            }
            state.wake_all();
            return Release::Released { promoted };
        }

        if state.remove_waiting(id) {
            state.wake_all();
            debug!("removed waiting job");
            return Release::Removed;
        }

        Release::Unknown
    }

    /// Remove a job that is still waiting; returns `false` if it was not waiting
    pub fn cancel(&self, id: JobId) -> bool {
        let mut state = self.lock();
        let removed = state.remove_waiting(id);
        if removed {
            state.wake_all();
        }
        removed
    }

    /// 0 for the active job, 1..N for waiting jobs, `None` otherwise
    pub fn position(&self, id: JobId) -> Option<usize> {
        self.lock().position(id)
    }

    /// The job currently holding the slot
    pub fn active(&self) -> Option<JobId> {
        self.lock().active
    }

    /// Number of waiting jobs
    pub fn len(&self) -> usize {
        self.lock().waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().waiting.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of waiting ids in promotion order
    pub fn waiting(&self) -> Vec<JobId> {
        self.lock().waiting.iter().copied().collect()
    }
}
