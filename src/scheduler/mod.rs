//! Bounded FIFO task scheduler
//!
//! At most `limit` tasks run at once; the rest wait in arrival order. All
//! bookkeeping (queue, running set, counters) belongs to a single actor
//! task, so decrementing "running" and admitting the next queued task
//! happen in one step and can never interleave with another completion.
//!
//! Enqueueing never blocks: it sends a message to the actor and returns a
//! [`TaskHandle`] that resolves with the task's own output. A failing or
//! panicking task is reported only through its handle.

use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;

type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send>>;
type Job = Box<dyn FnOnce() -> BoxedTask + Send>;

/// Scheduler errors, surfaced through task handles
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Scheduler shut down before the task ran")]
    Closed,

    #[error("Task panicked")]
    TaskPanicked,
}

/// Point-in-time counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub queued: usize,
    pub running: usize,
    pub completed: u64,
    pub panicked: u64,
}

/// Handle to a bounded-concurrency task queue
///
/// Cheap to clone; every clone feeds the same queue. The actor keeps
/// draining queued and running tasks after the last clone is dropped.
#[derive(Clone)]
pub struct Scheduler {
    tx: mpsc::UnboundedSender<Job>,
    stats: watch::Receiver<SchedulerStats>,
    limit: usize,
}

impl Scheduler {
    /// Starts a scheduler running at most `limit` tasks at once
    ///
    /// Must be called from within a Tokio runtime. A `limit` of zero is
    /// treated as one.
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let (stats_tx, stats_rx) = watch::channel(SchedulerStats::default());

        tokio::spawn(run_actor(limit, rx, stats_tx));
        tracing::debug!(limit, "Scheduler started");

        Self {
            tx,
            stats: stats_rx,
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Latest counters published by the actor
    pub fn stats(&self) -> SchedulerStats {
        *self.stats.borrow()
    }

    /// Queues `task` and returns a handle to its output
    ///
    /// The closure is invoked only when the task is admitted, so no work
    /// starts while it waits in the queue.
    pub fn enqueue<F, Fut, T>(&self, task: F) -> TaskHandle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let completion = Completion {
            tx: Some(result_tx),
        };

        let job: Job = Box::new(move || {
            Box::pin(async move {
                let output = task().await;
                completion.complete(output);
            })
        });

        // A send failure drops the job, which resolves the handle as Closed
        let _ = self.tx.send(job);

        TaskHandle { rx: result_rx }
    }

    /// Stops accepting work from this handle and waits for the queue to drain
    ///
    /// Returns once every clone has been dropped and all admitted tasks
    /// have finished.
    pub async fn shutdown(self) {
        let Self { tx, mut stats, .. } = self;
        drop(tx);
        while stats.changed().await.is_ok() {}
    }
}

/// Resolves the task's result channel exactly once
///
/// Dropped without completing means the task either panicked (the drop runs
/// during unwinding) or was never run.
struct Completion<T> {
    tx: Option<oneshot::Sender<Result<T, SchedulerError>>>,
}

impl<T> Completion<T> {
    fn complete(mut self, output: T) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Ok(output));
        }
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let err = if std::thread::panicking() {
                SchedulerError::TaskPanicked
            } else {
                SchedulerError::Closed
            };
            let _ = tx.send(Err(err));
        }
    }
}

/// Future resolving to a scheduled task's output
#[must_use = "dropping a TaskHandle does not cancel the task, but its result is lost"]
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<Result<T, SchedulerError>>,
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, SchedulerError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(SchedulerError::Closed)))
    }
}

async fn run_actor(
    limit: usize,
    mut rx: mpsc::UnboundedReceiver<Job>,
    stats_tx: watch::Sender<SchedulerStats>,
) {
    let mut queue: VecDeque<Job> = VecDeque::new();
    let mut running: JoinSet<()> = JoinSet::new();
    let mut stats = SchedulerStats::default();
    let mut open = true;

    loop {
        while running.len() < limit {
            match queue.pop_front() {
                Some(job) => {
                    running.spawn(job());
                }
                None => break,
            }
        }

        stats.queued = queue.len();
        stats.running = running.len();
        stats_tx.send_replace(stats);

        if !open && queue.is_empty() && running.is_empty() {
            break;
        }

        tokio::select! {
            message = rx.recv(), if open => match message {
                Some(job) => queue.push_back(job),
                None => open = false,
            },
            Some(joined) = running.join_next(), if !running.is_empty() => {
                stats.completed += 1;
                if let Err(e) = joined {
                    if e.is_panic() {
                        stats.panicked += 1;
                        tracing::warn!("Scheduled task panicked");
                    }
                }
            }
        }
    }

    tracing::debug!(completed = stats.completed, "Scheduler drained");
}
