//! Request coalescing
//!
//! A [`FlightGroup`] makes sure that concurrent callers asking for the same
//! key share one execution. The first caller leads the flight and runs the
//! work; later callers follow and receive a clone of the leader's result.
//! The in-flight map belongs to a single actor task, so joining and
//! finishing are serialized without locks.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FlightError {
    #[error("The flight leader went away before producing a result")]
    Abandoned,

    #[error("The coalescing actor is gone")]
    Closed,
}

enum Command<K, V> {
    Join {
        key: K,
        reply: oneshot::Sender<Joined<K, V>>,
    },
    Finish {
        key: K,
        value: V,
    },
    Abandon {
        key: K,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
}

/// Role handed to a caller joining a flight
pub enum Joined<K, V> {
    /// This caller must do the work and finish the lease
    Leader(FlightLease<K, V>),
    /// Someone else is already doing the work
    Follower(oneshot::Receiver<V>),
}

/// Outcome of [`FlightGroup::run`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flight<V> {
    /// This caller ran the work
    Led(V),
    /// This caller received another caller's result
    Joined(V),
}

impl<V> Flight<V> {
    pub fn into_inner(self) -> V {
        match self {
            Flight::Led(v) | Flight::Joined(v) => v,
        }
    }

    pub fn was_led(&self) -> bool {
        matches!(self, Flight::Led(_))
    }
}

/// Obligation of a flight leader to publish a result
///
/// Dropping the lease without calling [`finish`](Self::finish) abandons the
/// flight: followers get [`FlightError::Abandoned`] and the key is released.
pub struct FlightLease<K, V> {
    key: Option<K>,
    tx: mpsc::UnboundedSender<Command<K, V>>,
}

impl<K, V> FlightLease<K, V> {
    pub fn finish(mut self, value: V) {
        if let Some(key) = self.key.take() {
            let _ = self.tx.send(Command::Finish { key, value });
        }
    }
}

impl<K, V> Drop for FlightLease<K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let _ = self.tx.send(Command::Abandon { key });
        }
    }
}

/// Coalesces concurrent work per key
pub struct FlightGroup<K, V> {
    tx: mpsc::UnboundedSender<Command<K, V>>,
}

impl<K, V> Clone for FlightGroup<K, V> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<K, V> FlightGroup<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Spawns the coalescing actor; requires a Tokio runtime
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_actor(rx, tx.downgrade()));
        Self { tx }
    }

    /// Joins the flight for `key`, becoming leader if none is in progress
    pub async fn join(&self, key: K) -> Result<Joined<K, V>, FlightError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Join { key, reply })
            .map_err(|_| FlightError::Closed)?;
        rx.await.map_err(|_| FlightError::Closed)
    }

    /// Runs `work` for `key` unless an identical flight is already running
    ///
    /// The leader runs `work` inline on the calling task. If the leader is
    /// cancelled before finishing, followers see `Abandoned`.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> Result<Flight<V>, FlightError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        match self.join(key).await? {
            Joined::Leader(lease) => {
                let value = work().await;
                lease.finish(value.clone());
                Ok(Flight::Led(value))
            }
            Joined::Follower(rx) => rx.await.map(Flight::Joined).map_err(|_| FlightError::Abandoned),
        }
    }

    /// Number of keys currently in flight
    pub async fn in_flight(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Count { reply }).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

impl<K, V> Default for FlightGroup<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

async fn run_actor<K, V>(
    mut rx: mpsc::UnboundedReceiver<Command<K, V>>,
    lease_tx: mpsc::WeakUnboundedSender<Command<K, V>>,
) where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    let mut flights: HashMap<K, Vec<oneshot::Sender<V>>> = HashMap::new();

    while let Some(command) = rx.recv().await {
        match command {
            Command::Join { key, reply } => {
                if let Some(waiters) = flights.get_mut(&key) {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    let _ = reply.send(Joined::Follower(rx));
                    continue;
                }

                let Some(tx) = lease_tx.upgrade() else {
                    break;
                };
                let lease = FlightLease {
                    key: Some(key.clone()),
                    tx,
                };
                flights.insert(key, Vec::new());
                // If the caller is gone the lease drops here and abandons
                let _ = reply.send(Joined::Leader(lease));
            }
            Command::Finish { key, value } => {
                if let Some(waiters) = flights.remove(&key) {
                    for waiter in waiters {
                        let _ = waiter.send(value.clone());
                    }
                }
            }
            Command::Abandon { key } => {
                // Dropping the senders wakes followers with an error
                flights.remove(&key);
            }
            Command::Count { reply } => {
                let _ = reply.send(flights.len());
            }
        }
    }
}
