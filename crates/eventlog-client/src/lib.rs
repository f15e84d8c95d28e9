//! eventlog-client - async client for an append-only event log server's
//! native binary TCP protocol.
//!
//! [`connection::EventStoreConnection`] is the public entry point: it owns
//! an [`engine::ConnectionEngine`] running on its own task and exposes a
//! request/response surface over a command channel. Wire framing lives in
//! [`frame`], correlation and retry bookkeeping in [`operations`], volatile
//! and catch-up subscriptions in [`subscriptions`] and [`catchup`], and
//! endpoint resolution (single-node or cluster gossip) in [`discovery`].

pub mod catchup;
pub mod connection;
pub mod discovery;
pub mod engine;
pub mod errors;
pub mod frame;
pub mod heartbeat;
pub mod operations;
pub mod subscriptions;
pub mod task;
pub mod transport;

pub use connection::{
    EventData, EventStoreConnection, PersistentSubscriptionSettings, Subscription, StreamEventsSlice,
    WriteResult,
};
pub use discovery::{EndpointDiscoverer, GossipEndpointDiscoverer, StaticEndpointDiscoverer};
pub use errors::{DropReason, EngineError, OperationError};
pub use subscriptions::ResolvedEvent;
