//! Operation manager: correlates requests with responses, enforces the
//! active-window cap and FIFO waiting queue, drives timeout-triggered
//! retries, and re-queues in-flight operations across a disconnect without
//! touching their retry budget.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use bytes::Bytes;
use eventlog_settings::UserCredentials;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::OperationError;
use crate::frame::{Command, Package};
use crate::task::CompletionSource;

/// Outcome a decoder returns after inspecting a response payload for a
/// given operation. Mirrors the algebra in the connection engine design:
/// `Done`, `Retry`, `Reconnect`, or a terminal `Error`.
pub enum Outcome {
    Done(Bytes),
    Retry(String),
    Reconnect(std::net::SocketAddr),
    Error(OperationError),
}

/// A caller-submitted unit of work awaiting a response.
pub struct Operation {
    pub command: Command,
    pub payload: Bytes,
    pub credentials: Option<UserCredentials>,
    pub requires_master: bool,
    completion: CompletionSource<Result<Bytes, OperationError>>,
    pub decode: Box<dyn Fn(&Package) -> Outcome + Send + Sync>,
    pub retry_count: u32,
    pub correlation_id: Uuid,
    created_at: Instant,
    last_updated: Instant,
}

impl Operation {
    pub fn new(
        command: Command,
        payload: Bytes,
        credentials: Option<UserCredentials>,
        requires_master: bool,
        decode: impl Fn(&Package) -> Outcome + Send + Sync + 'static,
        completion: CompletionSource<Result<Bytes, OperationError>>,
    ) -> Self {
        let now = Instant::now();
        Self {
            command,
            payload,
            credentials,
            requires_master,
            completion,
            decode: Box::new(decode),
            retry_count: 0,
            correlation_id: Uuid::new_v4(),
            created_at: now,
            last_updated: now,
        }
    }

    fn to_package(&self) -> Package {
        let mut pkg = Package::new(self.command, self.correlation_id, self.payload.clone());
        if let Some(creds) = &self.credentials {
            pkg = pkg.with_credentials(creds.clone());
        }
        pkg
    }

    fn fresh_correlation_id(&mut self) {
        self.correlation_id = Uuid::new_v4();
        self.last_updated = Instant::now();
    }

    fn complete(&mut self, result: Result<Bytes, OperationError>) {
        self.completion.complete(result);
    }
}

/// `active`/`waiting` bookkeeping for every in-flight or pending operation.
pub struct OperationManager {
    active: HashMap<Uuid, Operation>,
    waiting: VecDeque<Operation>,
    max_concurrent_items: usize,
    max_retries: u32,
    operation_timeout: Duration,
}

/// Effect the caller of `OperationManager` must carry out: write a package,
/// or (on reconnect-required) nothing immediate — the engine handles the
/// reconnect itself.
pub enum Effect {
    Send(Package),
    None,
}

/// Effect `handle_response` leaves for the engine to carry out.
pub enum ResponseEffect {
    /// The correlation id matched no active operation.
    NoMatch,
    /// Resolved locally (completed, retried, or requeued); nothing further
    /// to do.
    Handled,
    /// A master-bound operation was told to reconnect to a specific
    /// endpoint; the engine must actually establish that connection.
    Reconnect(std::net::SocketAddr),
}

impl OperationManager {
    pub fn new(max_concurrent_items: usize, max_retries: u32, operation_timeout: Duration) -> Self {
        Self {
            active: HashMap::new(),
            waiting: VecDeque::new(),
            max_concurrent_items,
            max_retries,
            operation_timeout,
        }
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    /// Enqueue a new operation. If there is a free slot the operation is
    /// promoted immediately and its request package returned to send;
    /// otherwise it joins the waiting queue.
    pub fn enqueue(&mut self, op: Operation) -> Effect {
        if self.active.len() >= self.max_concurrent_items {
            self.waiting.push_back(op);
            return Effect::None;
        }
        self.promote(op)
    }

    fn promote(&mut self, mut op: Operation) -> Effect {
        op.last_updated = Instant::now();
        let pkg = op.to_package();
        self.active.insert(op.correlation_id, op);
        Effect::Send(pkg)
    }

    /// Promote as many waiting operations as there are free slots. Returns
    /// the packages that need to be sent, in FIFO order.
    pub fn drain_waiting(&mut self) -> Vec<Package> {
        let mut sent = Vec::new();
        while self.active.len() < self.max_concurrent_items {
            let Some(op) = self.waiting.pop_front() else {
                break;
            };
            if let Effect::Send(pkg) = self.promote(op) {
                sent.push(pkg);
            }
        }
        sent
    }

    /// Handle an inbound package that matched a known correlation id.
    pub fn handle_response(&mut self, pkg: &Package) -> ResponseEffect {
        let Some(mut op) = self.active.remove(&pkg.correlation_id) else {
            return ResponseEffect::NoMatch;
        };

        match (op.decode)(pkg) {
            Outcome::Done(body) => {
                debug!(correlation_id = %op.correlation_id, "operation completed");
                op.complete(Ok(body));
                ResponseEffect::Handled
            }
            Outcome::Error(err) => {
                op.complete(Err(err));
                ResponseEffect::Handled
            }
            Outcome::Retry(reason) => {
                self.retry(op, reason);
                ResponseEffect::Handled
            }
            Outcome::Reconnect(endpoint) => {
                if op.requires_master {
                    warn!(%endpoint, "master-bound operation reconnecting to advised endpoint");
                    op.fresh_correlation_id();
                    self.waiting.push_back(op);
                    ResponseEffect::Reconnect(endpoint)
                } else {
                    self.retry(op, format!("reconnect to {endpoint}"));
                    ResponseEffect::Handled
                }
            }
        }
    }

    fn retry(&mut self, mut op: Operation, reason: String) {
        op.retry_count += 1;
        if op.retry_count > self.max_retries {
            warn!(correlation_id = %op.correlation_id, reason, "retry limit reached");
            op.complete(Err(OperationError::RetryLimitReached));
            return;
        }
        debug!(retry_count = op.retry_count, reason, "retrying operation");
        op.fresh_correlation_id();
        self.waiting.push_back(op);
    }

    /// Scan `active` for entries whose deadline has passed and treat them as
    /// timeouts (a `Retry` outcome with reason `"timeout"`).
    pub fn check_timeouts(&mut self, now: Instant) {
        let expired: Vec<Uuid> = self
            .active
            .iter()
            .filter(|(_, op)| now.duration_since(op.last_updated) > self.operation_timeout)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            if let Some(op) = self.active.remove(&id) {
                self.retry(op, "timeout".to_string());
            }
        }
    }

    /// Move every active operation back to the waiting queue without
    /// incrementing its retry count — per the resolved open question,
    /// disconnect-requeue never consumes the retry budget.
    pub fn requeue_after_disconnect(&mut self) {
        let mut requeued = 0;
        for (_, mut op) in self.active.drain() {
            op.fresh_correlation_id();
            self.waiting.push_back(op);
            requeued += 1;
        }
        if requeued > 0 {
            debug!(requeued, "requeued in-flight operations after disconnect");
        }
    }

    /// Fail every active and waiting operation, e.g. on `close()`.
    pub fn fail_all(&mut self, error: OperationError) {
        for (_, mut op) in self.active.drain() {
            op.complete(Err(error.clone()));
        }
        for mut op in self.waiting.drain(..) {
            op.complete(Err(error.clone()));
        }
    }
}
