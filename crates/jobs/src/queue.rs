//! Unbounded multi-consumer FIFO with a "finished" latch.
//!
//! All queue state (pending jobs and the latch) lives under one mutex that is
//! never held across an `.await`. Waiting consumers park on a
//! [`Notify`] and always re-check both conditions after waking.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::Job;

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<Job>,
    finished: bool,
}

/// Job queue shared between one producer and any number of workers.
///
/// Wrap in an `Arc` to share. Once [`mark_finished`](Self::mark_finished) has
/// been called the latch stays set; workers keep draining what is left and
/// [`next_job`](Self::next_job) returns `None` once the queue is also empty.
#[derive(Default)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    available: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // A panic while holding the lock cannot leave VecDeque/bool half-updated.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `job` to the tail and wakes one waiting consumer.
    pub fn enqueue(&self, job: Job) {
        self.lock().jobs.push_back(job);
        self.available.notify_one();
    }

    /// Removes and returns the head job, if any.
    pub fn try_dequeue(&self) -> Option<Job> {
        self.lock().jobs.pop_front()
    }

    /// Sets the finished latch and wakes every waiting consumer.
    ///
    /// Idempotent. Jobs already queued are still handed out.
    pub fn mark_finished(&self) {
        self.lock().finished = true;
        self.available.notify_waiters();
    }

    /// `true` iff the queue is empty and finished.
    pub fn is_drained(&self) -> bool {
        let state = self.lock();
        state.finished && state.jobs.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().jobs.is_empty()
    }

    /// Waits for the next job.
    ///
    /// Returns `None` only when the queue is drained. The wakeup is
    /// registered before the state is inspected, so a signal that races with
    /// the check is never lost.
    pub async fn next_job(&self) -> Option<Job> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(job) = state.jobs.pop_front() {
                    return Some(job);
                }
                if state.finished {
                    return None;
                }
            }

            notified.await;
        }
    }
}
