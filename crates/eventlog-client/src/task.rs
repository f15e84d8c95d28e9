//! Single-shot caller surface and broadcast event handler lists.
//!
//! A [`CompletionSource`] is the engine-side half of a one-shot result; the
//! caller holds the paired [`Task`]. Completion is terminal and idempotent:
//! a second `complete`/`fail` call is a no-op. [`EventHandlers`] gives every
//! `Connected`/`Disconnected`/... accessor on the public connection a
//! registrable list of listeners, dispatched from a snapshot so a listener
//! registering or unregistering mid-dispatch cannot deadlock or skip peers.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

/// The engine-side sender half of a single-shot result.
pub struct CompletionSource<T> {
    tx: Option<oneshot::Sender<T>>,
}

impl<T: Send + 'static> CompletionSource<T> {
    pub fn new() -> (Self, Task<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self { tx: Some(tx) },
            Task {
                inner: TaskInner::Oneshot(rx),
            },
        )
    }

    /// Complete the paired task. Returns `false` if it was already
    /// completed or the caller dropped the task.
    pub fn complete(&mut self, value: T) -> bool {
        match self.tx.take() {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }
}

enum TaskInner<T> {
    Oneshot(oneshot::Receiver<T>),
    Boxed(Pin<Box<dyn Future<Output = T> + Send>>),
}

/// The caller-side half of a single-shot result. Either the receiving end
/// of a [`CompletionSource`], or an adapter composed from other tasks (used
/// to remap a raw operation result into a typed one without exposing the
/// wire-level `Bytes` to callers).
pub struct Task<T> {
    inner: TaskInner<T>,
}

impl<T: Send + 'static> Task<T> {
    /// Await the result. Resolves to `Err(Cancelled)` only for an
    /// oneshot-backed task whose source was dropped without completing it
    /// (e.g. the connection closed while the operation was in flight).
    pub async fn wait(self) -> Result<T, TaskCancelled> {
        match self.inner {
            TaskInner::Oneshot(rx) => rx.await.map_err(|_| TaskCancelled),
            TaskInner::Boxed(fut) => Ok(fut.await),
        }
    }

    /// Adapt an arbitrary future into a `Task`, used to remap a lower-level
    /// task's result into the public API's typed result.
    pub fn from_future(fut: impl Future<Output = T> + Send + 'static) -> Self {
        Self {
            inner: TaskInner::Boxed(Box::pin(fut)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskCancelled;

impl std::fmt::Display for TaskCancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task cancelled")
    }
}

impl std::error::Error for TaskCancelled {}

/// A broadcast list of listener closures, invoked in registration order
/// from a snapshot taken at dispatch time.
pub struct EventHandlers<E> {
    listeners: Arc<Mutex<Vec<Arc<dyn Fn(&E) + Send + Sync>>>>,
}

impl<E> Clone for EventHandlers<E> {
    fn clone(&self) -> Self {
        Self {
            listeners: Arc::clone(&self.listeners),
        }
    }
}

impl<E> Default for EventHandlers<E> {
    fn default() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<E> EventHandlers<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Matches `client.EventHandlers.Add(fn)`.
    pub fn add(&self, listener: impl Fn(&E) + Send + Sync + 'static) {
        self.listeners.lock().unwrap().push(Arc::new(listener));
    }

    /// Invoke every registered listener with `event`, isolating each call
    /// so a panicking listener cannot take down the engine loop.
    pub fn dispatch(&self, event: &E) {
        let snapshot = self.listeners.lock().unwrap().clone();
        for listener in snapshot {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
