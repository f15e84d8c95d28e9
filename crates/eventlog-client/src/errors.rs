//! Error taxonomy for the connection engine.
//!
//! Mirrors the wire-level and operation-level error kinds a peer can report,
//! plus the purely local errors (timeouts, cancellation, bad arguments) the
//! engine itself raises. Everything here is a typed `thiserror` enum rather
//! than `Box<dyn Error>` so callers can `match` on the variant, and
//! programmer-error preconditions are `InvalidArgument` rather than panics.

use thiserror::Error;

/// Errors a single operation (append, read, subscribe, admin op) can
/// terminate with.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OperationError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("access denied")]
    AccessDenied,
    #[error("server reported not handled: {0:?}")]
    NotHandled(NotHandledReason),
    #[error("wrong expected version")]
    WrongExpectedVersion,
    #[error("stream deleted")]
    StreamDeleted,
    #[error("stream does not exist")]
    NoStream,
    #[error("invalid transaction")]
    InvalidTransaction,
    #[error("operation timed out")]
    OperationTimeout,
    #[error("retry limit reached")]
    RetryLimitReached,
    #[error("operation cancelled")]
    Cancelled,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Sub-reasons carried by a `NotHandled` server response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotHandledReason {
    NotMaster,
    NotReady,
    TooBusy,
}

/// Reasons a volatile or catch-up subscription can terminate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DropReason {
    #[error("unsubscribed")]
    Unsubscribed,
    #[error("access denied")]
    AccessDenied,
    #[error("not found")]
    NotFound,
    #[error("persistent subscription deleted")]
    PersistentSubscriptionDeleted,
    #[error("subscriber max count reached")]
    SubscriberMaxCountReached,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("catch-up error: {0}")]
    CatchUpError(String),
    #[error("processing queue overflow")]
    ProcessingQueueOverflow,
    #[error("event handler exception")]
    EventHandlerException,
    #[error("server error: {0}")]
    ServerError(String),
    #[error("unknown drop reason")]
    Unknown,
}

/// Errors raised directly by the engine or the public API surface.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("endpoint discovery failed after exhausting retries")]
    DiscoveryFailed,
    #[error("reconnection limit reached")]
    ReconnectionLimitReached,
    #[error("connection is closed")]
    Closed,
    #[error(transparent)]
    Operation(#[from] OperationError),
}
