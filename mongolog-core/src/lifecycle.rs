//! Lazy connection lifecycle with an operation queue.
//!
//! [`ConnectionLifecycle`] owns a single connection handle that is established on
//! first use. Operations submitted before the connection is ready are buffered and
//! replayed, in submission order and exactly once, as soon as it opens.
//!
//! # States
//!
//! ```text
//!            submit                 attempt ok
//! Unopened ─────────▶ Opening ─────────────────▶ Opened
//!    ▲                   │
//!    │ reset / retry     │ attempt failed
//!    └──────────────── Error
//! ```
//!
//! - `Unopened`: the first submission starts the only connection attempt and is queued.
//! - `Opening`: submissions are queued.
//! - `Opened`: the queue is drained in order; submissions arriving during the drain join
//!   it, later ones run immediately.
//! - `Error`: queued operations fail with the connection error, as do new submissions,
//!   until [`ConnectionLifecycle::reset`] or the retry timer moves back to `Unopened`.
//!
//! [`ConnectionLifecycle::close`] drops the handle, aborts an in-flight attempt and fails
//! everything still queued with [`TransportError::Closed`]. A replay in progress stops
//! before its next operation, and the rest of its batch fails the same way.
//!
//! With a keep-alive set, an open connection is released that long after it opened and
//! the lifecycle returns to `Unopened`.
//!
//! A connection attempt that panics counts as a failed attempt. An operation that panics
//! during a replay fails only its own caller.
//!
//! All state lives behind one mutex that is never held across an `.await`. Connection
//! attempts and retry timers run on the ambient tokio runtime, so submitting must happen
//! from within one.

use futures::{
    channel::oneshot,
    future::{self, BoxFuture, FutureExt},
};
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    fmt,
    future::Future,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{TransportError, TransportResult};

/// Produces one connection attempt per call.
pub type Opener<B> = Arc<dyn Fn() -> BoxFuture<'static, TransportResult<B>> + Send + Sync>;

/// Disposes of a connection released by the keep-alive timer.
pub type Release<B> = Arc<dyn Fn(B) -> BoxFuture<'static, ()> + Send + Sync>;

type Job<B> = Box<dyn FnOnce(TransportResult<B>) -> BoxFuture<'static, ()> + Send>;


/// Observable state of a [`ConnectionLifecycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unopened,
    Opening,
    Opened,
    Error,
}

/// A unit of work deferred until the connection is ready.
pub struct PendingOperation<B> {
    method: &'static str,
    job: Job<B>,
}

impl<B> PendingOperation<B> {
    fn new<F>(method: &'static str, job: F) -> Self
    where
        F: FnOnce(TransportResult<B>) -> BoxFuture<'static, ()> + Send + 'static,
    {
        Self { method, job: Box::new(job) }
    }

    /// Name of the operation, for diagnostics.
    pub fn method(&self) -> &'static str {
        self.method
    }

    fn run(self, connection: TransportResult<B>) -> BoxFuture<'static, ()> {
        (self.job)(connection)
    }
}

impl<B> fmt::Debug for PendingOperation<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOperation")
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

enum Slot<B> {
    Unopened,
    Opening,
    Opened(B),
    Error(TransportError),
}

impl<B> Slot<B> {
    fn state(&self) -> ConnectionState {
        match self {
            Slot::Unopened => ConnectionState::Unopened,
            Slot::Opening => ConnectionState::Opening,
            Slot::Opened(_) => ConnectionState::Opened,
            Slot::Error(_) => ConnectionState::Error,
        }
    }
}

struct Inner<B> {
    slot: Slot<B>,
    pending: VecDeque<PendingOperation<B>>,
    /// Set while queued operations are being replayed after opening.
    draining: bool,
    attempt: Option<JoinHandle<()>>,
    /// Bumped on every new attempt and on close; stale attempts and timers compare against it.
    generation: u64,
}

enum Dispatch<B> {
    Run(PendingOperation<B>, B),
    Fail(PendingOperation<B>, TransportError),
    Queued,
}

/// A lazily opened connection guarding a FIFO queue of pending operations.
///
/// Cloning yields another handle to the same connection and queue.
pub struct ConnectionLifecycle<B> {
    inner: Arc<Mutex<Inner<B>>>,
    opener: Opener<B>,
    retry_delay: Option<Duration>,
    keep_alive: Option<Duration>,
    release: Option<Release<B>>,
}

impl<B> Clone for ConnectionLifecycle<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            opener: self.opener.clone(),
            retry_delay: self.retry_delay,
            keep_alive: self.keep_alive,
            release: self.release.clone(),
        }
    }
}

impl<B> fmt::Debug for ConnectionLifecycle<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();

        f.debug_struct("ConnectionLifecycle")
            .field("state", &inner.slot.state())
            .field("pending", &inner.pending.len())
            .field("retry_delay", &self.retry_delay)
            .field("keep_alive", &self.keep_alive)
            .finish()
    }
}

impl<B> ConnectionLifecycle<B>
where
    B: Clone + Send + Sync + 'static,
{
    /// Creates an unopened lifecycle. No connection is attempted until the first submission.
    pub fn new(opener: Opener<B>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                slot: Slot::Unopened,
                pending: VecDeque::new(),
                draining: false,
                attempt: None,
                generation: 0,
            })),
            opener,
            retry_delay: None,
            keep_alive: None,
            release: None,
        }
    }

    /// After a failed attempt, move back to `Unopened` once `delay` has elapsed.
    pub fn with_retry_delay(mut self, delay: Option<Duration>) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Release an open connection `keep_alive` after it opened.
    pub fn with_keep_alive(mut self, keep_alive: Option<Duration>) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Hands connections released by the keep-alive timer to `release` instead of
    /// dropping them.
    pub fn with_release(mut self, release: Release<B>) -> Self {
        self.release = Some(release);
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().slot.state()
    }

    /// Number of operations waiting for the connection.
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// The error that put the lifecycle into the `Error` state, if it is there.
    pub fn last_error(&self) -> Option<TransportError> {
        match &self.inner.lock().slot {
            Slot::Error(err) => Some(err.clone()),
            _ => None,
        }
    }

    /// Submits an operation to run against the connection.
    ///
    /// The operation is queued (or dispatched) when this method is called, so calls
    /// made in sequence are replayed in that sequence. The returned future resolves
    /// with the operation's result, or with the connection error if the connection
    /// could not be established.
    pub fn submit<T, F, Fut>(&self, method: &'static str, operation: F) -> BoxFuture<'static, TransportResult<T>>
    where
        T: Send + 'static,
        F: FnOnce(B) -> Fut + Send + 'static,
        Fut: Future<Output = TransportResult<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let operation = PendingOperation::new(method, move |connection: TransportResult<B>| {
            async move {
                let result = match connection {
                    Ok(connection) => operation(connection).await,
                    Err(err) => Err(err),
                };
                let _ = tx.send(result);
            }
            .boxed()
        });

        let dispatched = match self.dispatch(operation) {
            Dispatch::Run(operation, connection) => Some(operation.run(Ok(connection))),
            Dispatch::Fail(operation, err) => Some(operation.run(Err(err))),
            Dispatch::Queued => None,
        };

        async move {
            if let Some(run) = dispatched {
                run.await;
            }
            // A dropped sender means the operation was discarded without running.
            rx.await.unwrap_or(Err(TransportError::Closed))
        }
        .boxed()
    }

    /// Moves an `Error` lifecycle back to `Unopened`, so the next submission
    /// starts a fresh attempt. Returns `false` in any other state.
    pub fn reset(&self) -> bool {
        let mut inner = self.inner.lock();

        match inner.slot {
            Slot::Error(_) => {
                inner.slot = Slot::Unopened;
                debug!("connection reset after failure");
                true
            }
            _ => false,
        }
    }

    /// Tears the connection down.
    ///
    /// Aborts an in-flight attempt, fails every queued operation with
    /// [`TransportError::Closed`] and returns to `Unopened`. Returns the live
    /// connection, if there was one, so the caller can shut it down.
    pub async fn close(&self) -> Option<B> {
        let (connection, discarded) = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;

            inner.generation += 1;
            inner.draining = false;
            if let Some(attempt) = inner.attempt.take() {
                attempt.abort();
            }

            let connection = match std::mem::replace(&mut inner.slot, Slot::Unopened) {
                Slot::Opened(connection) => Some(connection),
                _ => None,
            };

            (connection, std::mem::take(&mut inner.pending))
        };

        if !discarded.is_empty() {
            info!(pending = discarded.len(), "discarding queued operations on close");
        }
        for operation in discarded {
            operation.run(Err(TransportError::Closed)).await;
        }

        connection
    }

    fn dispatch(&self, operation: PendingOperation<B>) -> Dispatch<B> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        match inner.slot {
            Slot::Opened(ref connection) if !inner.draining => Dispatch::Run(operation, connection.clone()),
            Slot::Error(ref err) => Dispatch::Fail(operation, err.clone()),
            Slot::Opening | Slot::Opened(_) => {
                debug!(method = operation.method(), "queueing operation until connection is ready");
                inner.pending.push_back(operation);
                Dispatch::Queued
            }
            Slot::Unopened => {
                debug!(method = operation.method(), "opening connection");
                inner.pending.push_back(operation);
                inner.slot = Slot::Opening;
                inner.generation += 1;
                inner.attempt = Some(self.spawn_attempt(inner.generation));
                Dispatch::Queued
            }
        }
    }

    fn spawn_attempt(&self, generation: u64) -> JoinHandle<()> {
        let lifecycle = self.clone();
        let attempt = panic::catch_unwind(AssertUnwindSafe(|| (self.opener)()))
            .unwrap_or_else(|_| future::ready(Err(attempt_panicked())).boxed());

        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(attempt)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(attempt_panicked()));
            lifecycle.complete_attempt(generation, outcome).await;
        })
    }

    async fn complete_attempt(&self, generation: u64, outcome: TransportResult<B>) {
        match outcome {
            Ok(connection) => {
                {
                    let mut inner = self.inner.lock();
                    if inner.generation != generation {
                        debug!("discarding connection from a superseded attempt");
                        return;
                    }
                    inner.slot = Slot::Opened(connection.clone());
                    inner.draining = true;
                    inner.attempt = None;
                }

                info!("connection opened");
                if let Some(keep_alive) = self.keep_alive {
                    self.schedule_release(generation, keep_alive);
                }
                self.drain(generation, connection).await;
            }
            Err(err) => {
                let failed = {
                    let mut inner = self.inner.lock();
                    if inner.generation != generation {
                        return;
                    }
                    inner.slot = Slot::Error(err.clone());
                    inner.attempt = None;
                    std::mem::take(&mut inner.pending)
                };

                warn!(error = %err, pending = failed.len(), "connection attempt failed");
                for operation in failed {
                    run_guarded(operation, Err(err.clone())).await;
                }

                if let Some(delay) = self.retry_delay {
                    self.schedule_reset(generation, delay);
                }
            }
        }
    }

    async fn drain(&self, generation: u64, connection: B) {
        loop {
            let batch = {
                let mut inner = self.inner.lock();
                if inner.generation != generation {
                    return;
                }
                if inner.pending.is_empty() {
                    inner.draining = false;
                    return;
                }
                std::mem::take(&mut inner.pending)
            };

            debug!(pending = batch.len(), "replaying queued operations");
            let mut batch = batch.into_iter();
            while let Some(operation) = batch.next() {
                let current = self.inner.lock().generation;
                if current != generation {
                    let discarded = std::iter::once(operation).chain(batch).collect::<Vec<_>>();
                    info!(pending = discarded.len(), "connection closed during replay, discarding queued operations");
                    for operation in discarded {
                        run_guarded(operation, Err(TransportError::Closed)).await;
                    }
                    return;
                }

                run_guarded(operation, Ok(connection.clone())).await;
            }
        }
    }

    fn schedule_reset(&self, generation: u64, delay: Duration) {
        let lifecycle = self.clone();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let mut inner = lifecycle.inner.lock();
            if inner.generation == generation && matches!(inner.slot, Slot::Error(_)) {
                inner.slot = Slot::Unopened;
                debug!(?delay, "retry delay elapsed, connection may be reopened");
            }
        });
    }

    fn schedule_release(&self, generation: u64, keep_alive: Duration) {
        let lifecycle = self.clone();

        tokio::spawn(async move {
            let connection = loop {
                tokio::time::sleep(keep_alive).await;

                let mut guard = lifecycle.inner.lock();
                let inner = &mut *guard;
                if inner.generation != generation || !matches!(inner.slot, Slot::Opened(_)) {
                    return;
                }
                if inner.draining {
                    continue;
                }

                inner.generation += 1;
                match std::mem::replace(&mut inner.slot, Slot::Unopened) {
                    Slot::Opened(connection) => break connection,
                    _ => return,
                }
            };

            debug!(?keep_alive, "keep-alive elapsed, releasing connection");
            if let Some(release) = &lifecycle.release {
                release(connection).await;
            }
        });
    }
}

fn attempt_panicked() -> TransportError {
    TransportError::Connection("connection attempt panicked".to_string())
}

/// Runs a queued operation. A panicking operation drops its result sender, so its
/// caller observes [`TransportError::Closed`].
async fn run_guarded<B>(operation: PendingOperation<B>, connection: TransportResult<B>) {
    let method = operation.method();

    if AssertUnwindSafe(async move { operation.run(connection).await })
        .catch_unwind()
        .await
        .is_err()
    {
        warn!(method, "queued operation panicked");
    }
}
