//! The connection engine: a single-threaded cooperative loop that owns the
//! transport, the operation manager, the subscription manager, and the
//! heartbeat tracker, and drives the connection state machine.
//!
//! Modeled on the reactor task in this codebase's own history: one
//! `tokio::select! { biased; ... }` loop that owns its socket directly, with
//! a command channel in and event-handler dispatch out. Generalized here
//! from a flat pending-request map into the full state machine plus
//! operation/subscription managers described by the specification.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use eventlog_settings::ConnectionSettings;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::discovery::EndpointDiscoverer;
use crate::errors::{DropReason, OperationError};
use crate::frame::{Command, Package};
use crate::heartbeat::{HeartbeatAction, HeartbeatTracker};
use crate::operations::{Effect, Operation, OperationManager, ResponseEffect};
use crate::subscriptions::{ResolvedEvent, SubscriptionManager, VolatileSubscription};
use crate::task::EventHandlers;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Init,
    Connecting,
    Identifying,
    Authenticating,
    Connected,
    Disconnected,
    Reconnecting,
    Closed,
}

/// Events dispatched on the public `Connected`/`Disconnected`/... lists.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connected { endpoint: SocketAddr },
    Disconnected { reason: String },
    Reconnecting,
    Closed { reason: String },
    ErrorOccurred { message: String },
    AuthenticationFailed,
}

pub enum EngineCommand {
    StartConnection,
    CloseConnection,
    Submit(Operation),
    Subscribe(VolatileSubscription),
    Unsubscribe(Uuid),
}

/// Handle-side clones of every event-handler list, shared with
/// `Connection` so callers can register listeners without talking to the
/// engine task.
#[derive(Clone, Default)]
pub struct EngineEvents {
    pub connected: EventHandlers<ConnectionEvent>,
    pub disconnected: EventHandlers<ConnectionEvent>,
    pub reconnecting: EventHandlers<ConnectionEvent>,
    pub closed: EventHandlers<ConnectionEvent>,
    pub error_occurred: EventHandlers<ConnectionEvent>,
    pub authentication_failed: EventHandlers<ConnectionEvent>,
}

pub struct ConnectionEngine {
    settings: ConnectionSettings,
    discoverer: Arc<dyn EndpointDiscoverer>,
    state: ConnectionState,
    transport: Option<Transport>,
    operations: OperationManager,
    subscriptions: SubscriptionManager,
    heartbeat: Option<HeartbeatTracker>,
    reconnection_count: u32,
    current_endpoint: Option<SocketAddr>,
    /// Set when a response carries a server-advised master endpoint the
    /// engine must reconnect to directly, bypassing discovery.
    pending_reconnect_endpoint: Option<SocketAddr>,
    events: EngineEvents,
}

impl ConnectionEngine {
    pub fn new(
        settings: ConnectionSettings,
        discoverer: Arc<dyn EndpointDiscoverer>,
        events: EngineEvents,
    ) -> Self {
        let operations = OperationManager::new(
            settings.max_concurrent_items,
            settings.max_retries,
            settings.operation_timeout,
        );
        Self {
            settings,
            discoverer,
            state: ConnectionState::Init,
            transport: None,
            operations,
            subscriptions: SubscriptionManager::new(),
            heartbeat: None,
            reconnection_count: 0,
            current_endpoint: None,
            pending_reconnect_endpoint: None,
            events,
        }
    }

    /// Spawn the engine's task and return the command channel used to
    /// drive it.
    pub fn spawn(mut self) -> mpsc::Sender<EngineCommand> {
        let (tx, rx) = mpsc::channel(self.settings.max_queue_size);
        tokio::spawn(async move {
            self.run(rx).await;
        });
        tx
    }

    async fn run(&mut self, mut cmd_rx: mpsc::Receiver<EngineCommand>) {
        let mut tick = interval(self.settings.operation_timeout_check_period);
        loop {
            let transport_active = self.transport.is_some() && !matches!(self.state, ConnectionState::Closed);
            tokio::select! {
                biased;

                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => break,
                    }
                }

                result = async { self.transport.as_mut().unwrap().recv().await }, if transport_active => {
                    self.handle_transport_result(result).await;
                }

                _ = tick.tick() => {
                    self.handle_tick().await;
                }
            }

            if matches!(self.state, ConnectionState::Closed) {
                break;
            }
        }
    }

    async fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::StartConnection => self.start_connection().await,
            EngineCommand::CloseConnection => self.close("caller requested close".into()).await,
            EngineCommand::Submit(op) => self.submit(op).await,
            EngineCommand::Subscribe(sub) => self.subscribe(sub).await,
            EngineCommand::Unsubscribe(id) => {
                if let Some(pkg) = self.unsubscribe_package(id) {
                    self.send(pkg).await;
                }
            }
        }
    }

    async fn start_connection(&mut self) {
        if matches!(self.state, ConnectionState::Connected) {
            return;
        }
        self.state = ConnectionState::Connecting;
        match self.discoverer.discover().await {
            Ok(endpoint) => self.connect_to(endpoint).await,
            Err(e) => {
                error!(error = %e, "endpoint discovery failed");
                self.events.error_occurred.dispatch(&ConnectionEvent::ErrorOccurred {
                    message: e.to_string(),
                });
                self.close("discovery failed".into()).await;
            }
        }
    }

    async fn connect_to(&mut self, endpoint: SocketAddr) {
        match Transport::connect(endpoint).await {
            Ok(transport) => {
                self.transport = Some(transport);
                self.current_endpoint = Some(endpoint);
                self.heartbeat = Some(HeartbeatTracker::new(
                    self.settings.heartbeat_interval,
                    self.settings.heartbeat_timeout,
                    Instant::now(),
                ));
                let mut identify = Package::new(
                    Command::ClientIdentify,
                    Uuid::new_v4(),
                    Bytes::from(self.settings.connection_name.clone()),
                );
                if let Some(creds) = self.settings.default_user_credentials.clone() {
                    identify = identify.with_credentials(creds);
                    self.state = ConnectionState::Authenticating;
                } else {
                    self.state = ConnectionState::Identifying;
                }
                self.send(identify).await;
            }
            Err(e) => {
                warn!(error = %e, "connect failed");
                self.begin_reconnecting().await;
            }
        }
    }

    async fn submit(&mut self, op: Operation) {
        if !matches!(self.state, ConnectionState::Connected) {
            // Queued regardless of connection state; promoted once connected.
            self.operations.enqueue(op);
            return;
        }
        if let Effect::Send(pkg) = self.operations.enqueue(op) {
            self.send(pkg).await;
        }
    }

    async fn subscribe(&mut self, sub: VolatileSubscription) {
        let id = sub.correlation_id;
        let stream_id = sub.stream_id.clone();
        let resolve_link_tos = sub.resolve_link_tos;
        let creds = sub.credentials.clone();
        self.subscriptions.register(sub);

        let mut payload = Vec::new();
        payload.push(resolve_link_tos as u8);
        payload.extend_from_slice(stream_id.as_bytes());
        let mut pkg = Package::new(Command::SubscribeToStream, id, Bytes::from(payload));
        if let Some(c) = creds {
            pkg = pkg.with_credentials(c);
        }
        self.send(pkg).await;
    }

    fn unsubscribe_package(&self, id: Uuid) -> Option<Package> {
        if self.subscriptions.state_of(id).is_some() {
            Some(Package::new(Command::UnsubscribeFromStream, id, Bytes::new()))
        } else {
            None
        }
    }

    async fn send(&mut self, pkg: Package) {
        if let Some(transport) = &mut self.transport {
            if let Err(e) = transport.send(pkg).await {
                warn!(error = %e, "send failed, beginning reconnect");
                self.begin_reconnecting().await;
            }
        }
    }

    async fn handle_transport_result(
        &mut self,
        result: Result<Option<Package>, crate::transport::TransportError>,
    ) {
        match result {
            Ok(Some(pkg)) => self.handle_package(pkg).await,
            Ok(None) => {
                warn!("peer closed the connection");
                self.begin_reconnecting().await;
            }
            Err(e) => {
                warn!(error = %e, "transport error");
                self.begin_reconnecting().await;
            }
        }
    }

    async fn handle_package(&mut self, pkg: Package) {
        if let Some(hb) = &mut self.heartbeat {
            hb.record_frame(Instant::now(), pkg.indicates_liveness());
        }

        match pkg.command {
            Command::HeartbeatRequest => {
                self.send(Package::heartbeat_response(pkg.correlation_id)).await;
            }
            Command::HeartbeatResponse => {}
            Command::ClientIdentified => {
                self.state = ConnectionState::Connected;
                self.reconnection_count = 0;
                let endpoint = self.current_endpoint.expect("identified without a transport");
                info!(%endpoint, "connected");
                self.events
                    .connected
                    .dispatch(&ConnectionEvent::Connected { endpoint });
                for pkg in self.operations.drain_waiting() {
                    self.send(pkg).await;
                }
            }
            Command::NotAuthenticated => {
                error!("authentication failed");
                self.events
                    .authentication_failed
                    .dispatch(&ConnectionEvent::AuthenticationFailed);
                self.close("authentication failed".into()).await;
            }
            Command::SubscriptionConfirmation => {
                let (last_commit_position, last_event_number) =
                    crate::frame::decode_subscription_confirmation(&pkg.payload);
                self.subscriptions
                    .confirm(pkg.correlation_id, last_commit_position, last_event_number);
            }
            Command::StreamEventAppeared => {
                let event = decode_resolved_event(&pkg.payload);
                self.subscriptions.dispatch_event(pkg.correlation_id, event);
            }
            Command::SubscriptionDropped => {
                self.subscriptions
                    .drop_subscription(pkg.correlation_id, decode_drop_reason(&pkg.payload));
            }
            _ => {
                match self.operations.handle_response(&pkg) {
                    ResponseEffect::NoMatch => {
                        debug!(correlation_id = %pkg.correlation_id, "response matched no in-flight operation");
                    }
                    ResponseEffect::Handled => {}
                    ResponseEffect::Reconnect(endpoint) => {
                        self.begin_reconnecting_to(endpoint).await;
                        return;
                    }
                }
                for pkg in self.operations.drain_waiting() {
                    self.send(pkg).await;
                }
            }
        }
    }

    async fn handle_tick(&mut self) {
        if matches!(self.state, ConnectionState::Closed) {
            return;
        }

        self.operations.check_timeouts(Instant::now());
        let sent: Vec<Package> = if matches!(self.state, ConnectionState::Connected) {
            self.operations.drain_waiting()
        } else {
            Vec::new()
        };
        for pkg in sent {
            self.send(pkg).await;
        }

        if matches!(self.state, ConnectionState::Reconnecting) {
            self.attempt_reconnect().await;
            return;
        }

        if let Some(hb) = &mut self.heartbeat {
            match hb.tick(Instant::now()) {
                HeartbeatAction::None => {}
                HeartbeatAction::SendRequest => {
                    self.send(Package::heartbeat_request()).await;
                }
                HeartbeatAction::TimedOut => {
                    warn!("heartbeat timed out");
                    self.begin_reconnecting().await;
                }
            }
        }
    }

    async fn begin_reconnecting(&mut self) {
        if matches!(
            self.state,
            ConnectionState::Closed | ConnectionState::Disconnected | ConnectionState::Reconnecting
        ) {
            return;
        }
        if let Some(t) = &mut self.transport {
            t.close();
        }
        self.transport = None;
        self.heartbeat = None;
        self.operations.requeue_after_disconnect();
        self.subscriptions.drop_all(DropReason::ConnectionClosed);
        // Observable for the duration of this transition before the tick
        // loop picks up reconnection attempts.
        self.state = ConnectionState::Disconnected;
        self.events
            .disconnected
            .dispatch(&ConnectionEvent::Disconnected {
                reason: "connection lost".into(),
            });
        self.state = ConnectionState::Reconnecting;
    }

    /// Like `begin_reconnecting`, but pins the next reconnect attempt to a
    /// server-advised endpoint (a `NotHandled{NotMaster}` response) instead
    /// of going back through discovery.
    async fn begin_reconnecting_to(&mut self, endpoint: SocketAddr) {
        self.pending_reconnect_endpoint = Some(endpoint);
        self.begin_reconnecting().await;
    }

    async fn attempt_reconnect(&mut self) {
        self.reconnection_count += 1;
        if self.reconnection_count > self.settings.max_reconnections {
            error!("reconnection limit reached");
            self.close("reconnection limit reached".into()).await;
            return;
        }
        self.events.reconnecting.dispatch(&ConnectionEvent::Reconnecting);
        tokio::time::sleep(self.settings.reconnection_delay).await;

        if let Some(endpoint) = self.pending_reconnect_endpoint.take() {
            self.connect_to(endpoint).await;
            return;
        }

        match self.discoverer.discover().await {
            Ok(endpoint) => self.connect_to(endpoint).await,
            Err(e) => warn!(error = %e, "rediscovery failed, will retry"),
        }
    }

    async fn close(&mut self, reason: String) {
        if matches!(self.state, ConnectionState::Closed) {
            return;
        }
        if let Some(t) = &mut self.transport {
            t.close();
        }
        self.operations.fail_all(OperationError::ConnectionClosed);
        self.subscriptions.drop_all(DropReason::ConnectionClosed);
        self.state = ConnectionState::Closed;
        self.events.closed.dispatch(&ConnectionEvent::Closed { reason });
    }
}

fn decode_resolved_event(payload: &Bytes) -> ResolvedEvent {
    let event_number = payload
        .get(0..8)
        .map(|b| i64::from_le_bytes(b.try_into().unwrap()))
        .unwrap_or(0);
    ResolvedEvent {
        event_number,
        commit_position: event_number,
        prepare_position: event_number,
        event_type: String::new(),
        data: payload.slice(8.min(payload.len())..),
    }
}

fn decode_drop_reason(payload: &Bytes) -> DropReason {
    match payload.first() {
        Some(0) => DropReason::Unsubscribed,
        Some(1) => DropReason::AccessDenied,
        Some(2) => DropReason::NotFound,
        Some(3) => DropReason::PersistentSubscriptionDeleted,
        Some(4) => DropReason::SubscriberMaxCountReached,
        _ => DropReason::Unknown,
    }
}
