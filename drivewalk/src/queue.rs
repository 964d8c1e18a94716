use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// A directory waiting to be listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListJob {
    /// Actual (non-composite) directory ID.
    pub id: String,
    pub path: String,
}

impl ListJob {
    pub fn new(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }
}

/// Count of jobs that are queued or being listed.
#[derive(Debug)]
pub struct WorkTracker {
    count: watch::Sender<usize>,
}

impl Default for WorkTracker {
    fn default() -> Self {
        Self {
            count: watch::Sender::new(0),
        }
    }
}

impl WorkTracker {
    pub fn add(&self, n: usize) {
        self.count.send_modify(|count| *count += n);
    }

    pub fn done(&self, n: usize) {
        self.count
            .send_modify(|count| *count = count.saturating_sub(n));
    }

    pub fn pending(&self) -> usize {
        *self.count.borrow()
    }

    pub async fn wait_idle(&self) {
        let mut rx = self.count.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

struct Inlet {
    sender: Option<mpsc::Sender<ListJob>>,
    overflow: VecDeque<ListJob>,
}

/// Bounded job channel with an unbounded overflow that never blocks
/// submitters.
///
/// Jobs parked in the overflow are not counted as pending; the
/// coordinator moves them back once the channel has drained.
pub struct JobQueue {
    inlet: Mutex<Inlet>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<ListJob>>,
    pending: WorkTracker,
    capacity: usize,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            inlet: Mutex::new(Inlet {
                sender: Some(sender),
                overflow: VecDeque::new(),
            }),
            receiver: tokio::sync::Mutex::new(receiver),
            pending: WorkTracker::default(),
            capacity,
        }
    }

    /// Queues `job`, spilling into the overflow when the channel is full.
    /// Jobs submitted after [`close`](Self::close) are dropped.
    pub fn submit(&self, job: ListJob) {
        let mut inlet = self.lock_inlet();
        let Some(sender) = inlet.sender.as_ref() else {
            return;
        };
        self.pending.add(1);
        match sender.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) => {
                inlet.overflow.push_back(job);
                self.pending.done(1);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => self.pending.done(1),
        }
    }

    /// Waits for one job, then takes up to `max - 1` more that are already
    /// queued. `None` once the queue is closed and drained, or on shutdown.
    pub async fn next_batch(
        &self,
        max: usize,
        shutdown: &CancellationToken,
    ) -> Option<Vec<ListJob>> {
        let mut receiver = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return None,
            receiver = self.receiver.lock() => receiver,
        };
        let first = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return None,
            job = receiver.recv() => job?,
        };
        let mut batch = vec![first];
        while batch.len() < max.max(1) {
            match receiver.try_recv() {
                Ok(job) => batch.push(job),
                Err(_) => break,
            }
        }
        Some(batch)
    }

    /// Marks `n` received jobs as finished.
    pub fn complete(&self, n: usize) {
        self.pending.done(n);
    }

    pub async fn wait_idle(&self) {
        self.pending.wait_idle().await;
    }

    /// Moves up to half the channel capacity from the overflow into the
    /// channel. Returns `false` when the overflow was empty.
    pub fn refill_from_overflow(&self) -> bool {
        let mut inlet = self.lock_inlet();
        if inlet.overflow.is_empty() {
            return false;
        }
        let Some(sender) = inlet.sender.clone() else {
            inlet.overflow.clear();
            return false;
        };
        let take = inlet.overflow.len().min((self.capacity / 2).max(1));
        for _ in 0..take {
            let Some(job) = inlet.overflow.pop_front() else {
                break;
            };
            self.pending.add(1);
            if let Err(err) = sender.try_send(job) {
                self.pending.done(1);
                if let mpsc::error::TrySendError::Full(job) = err {
                    inlet.overflow.push_front(job);
                }
                break;
            }
        }
        true
    }

    /// Stops accepting jobs; workers drain what is queued and then see the
    /// end of the queue.
    pub fn close(&self) {
        let mut inlet = self.lock_inlet();
        inlet.sender = None;
        inlet.overflow.clear();
    }

    pub fn pending(&self) -> usize {
        self.pending.pending()
    }

    pub fn overflow_len(&self) -> usize {
        self.lock_inlet().overflow.len()
    }

    fn lock_inlet(&self) -> MutexGuard<'_, Inlet> {
        self.inlet
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
