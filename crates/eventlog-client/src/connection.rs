//! Public `EventStoreConnection` surface.
//!
//! Method-for-method grounded on `internal/connection.go`'s `connection`
//! type: each call validates its arguments (empty stream names become
//! `InvalidArgument` here, rather than the source's panic), builds an
//! `Operation`/`VolatileSubscription`, and enqueues it on the engine via a
//! command channel. The connection name defaults to `"ES-" + uuid` when
//! none is configured, matching `NewConnection`'s fallback.

use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use eventlog_settings::{ConnectionSettings, UserCredentials};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::catchup::{CatchUpState, CatchUpSubscription};
use crate::discovery::EndpointDiscoverer;
use crate::engine::{ConnectionEngine, ConnectionEvent, EngineCommand, EngineEvents};
use crate::errors::{EngineError, NotHandledReason, OperationError};
use crate::frame::{self, Command};
use crate::operations::{Operation, Outcome};
use crate::subscriptions::{ResolvedEvent, VolatileSubscription};
use crate::task::{CompletionSource, EventHandlers, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResult {
    pub next_expected_version: i64,
}

#[derive(Debug, Clone)]
pub struct EventData {
    pub event_type: String,
    pub data: Bytes,
}

impl EventData {
    pub fn new(event_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            event_type: event_type.into(),
            data: data.into(),
        }
    }
}

/// Settings for a persistent subscription group, sent with
/// create/update requests. Framing only: field semantics beyond what the
/// documented scenarios exercise are left to the server.
#[derive(Debug, Clone, Copy)]
pub struct PersistentSubscriptionSettings {
    pub resolve_link_tos: bool,
    pub start_from: i64,
    pub max_retry_count: i32,
}

impl Default for PersistentSubscriptionSettings {
    fn default() -> Self {
        Self {
            resolve_link_tos: false,
            start_from: -1,
            max_retry_count: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamEventsSlice {
    pub events: Vec<ResolvedEvent>,
    pub next_event_number: i64,
    pub is_end_of_stream: bool,
}

/// A live handle to a confirmed volatile subscription; dropping or calling
/// `close` sends an unsubscribe request.
pub struct Subscription {
    id: Uuid,
    cmd_tx: mpsc::Sender<EngineCommand>,
}

impl Subscription {
    pub async fn close(self) {
        let _ = self.cmd_tx.send(EngineCommand::Unsubscribe(self.id)).await;
    }
}

/// A connection to an event log server: a handle around the engine task's
/// command channel plus the event-handler lists it dispatches to.
pub struct EventStoreConnection {
    cmd_tx: mpsc::Sender<EngineCommand>,
    events: EngineEvents,
    settings: ConnectionSettings,
}

impl EventStoreConnection {
    pub fn new(settings: ConnectionSettings, discoverer: Arc<dyn EndpointDiscoverer>) -> Self {
        let events = EngineEvents::default();
        let engine = ConnectionEngine::new(settings.clone(), discoverer, events.clone());
        let cmd_tx = engine.spawn();
        Self {
            cmd_tx,
            events,
            settings,
        }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Connect, resolving once the handshake completes or the attempt is
    /// abandoned (authentication failure or discovery exhaustion).
    pub async fn connect_async(&self) -> Result<(), EngineError> {
        let (source, task) = CompletionSource::new();
        let done = Arc::new(std::sync::Mutex::new(false));
        let source = Arc::new(std::sync::Mutex::new(Some(source)));

        let d1 = Arc::clone(&done);
        let s1 = Arc::clone(&source);
        self.events.connected.add(move |_e| {
            let mut guard = d1.lock().unwrap();
            if !*guard {
                *guard = true;
                if let Some(source) = s1.lock().unwrap().as_mut() {
                    source.complete(Ok(()));
                }
            }
        });
        let d2 = Arc::clone(&done);
        let s2 = Arc::clone(&source);
        self.events.closed.add(move |_e| {
            let mut guard = d2.lock().unwrap();
            if !*guard {
                *guard = true;
                if let Some(source) = s2.lock().unwrap().as_mut() {
                    source.complete(Err(EngineError::Closed));
                }
            }
        });
        let d3 = Arc::clone(&done);
        let s3 = Arc::clone(&source);
        self.events.authentication_failed.add(move |_e| {
            let mut guard = d3.lock().unwrap();
            if !*guard {
                *guard = true;
                if let Some(source) = s3.lock().unwrap().as_mut() {
                    source.complete(Err(EngineError::AuthenticationFailed));
                }
            }
        });

        let _ = self.cmd_tx.send(EngineCommand::StartConnection).await;
        task.wait().await.unwrap_or(Err(EngineError::Closed))
    }

    pub async fn close(&self) {
        let _ = self.cmd_tx.send(EngineCommand::CloseConnection).await;
    }

    fn validate_stream_id(stream_id: &str) -> Result<(), EngineError> {
        if stream_id.is_empty() {
            return Err(EngineError::InvalidArgument("stream id must not be empty".into()));
        }
        Ok(())
    }

    pub async fn append_to_stream(
        &self,
        stream_id: &str,
        expected_version: i64,
        events: Vec<EventData>,
        credentials: Option<UserCredentials>,
    ) -> Result<Task<Result<WriteResult, OperationError>>, EngineError> {
        Self::validate_stream_id(stream_id)?;

        let mut payload = BytesMut::new();
        payload.put_u8(stream_id.len() as u8);
        payload.put_slice(stream_id.as_bytes());
        payload.put_i64_le(expected_version);
        payload.put_u16_le(events.len() as u16);
        for event in &events {
            payload.put_u8(event.event_type.len() as u8);
            payload.put_slice(event.event_type.as_bytes());
            payload.put_u32_le(event.data.len() as u32);
            payload.put_slice(&event.data);
        }

        let (source, task) = CompletionSource::new();
        let op = Operation::new(
            Command::WriteEvents,
            payload.freeze(),
            credentials,
            true,
            decode_write_result,
            source,
        );
        self.submit(op).await;
        Ok(remap_task(task))
    }

    pub async fn delete_stream(
        &self,
        stream_id: &str,
        expected_version: i64,
        hard_delete: bool,
        credentials: Option<UserCredentials>,
    ) -> Result<Task<Result<(), OperationError>>, EngineError> {
        Self::validate_stream_id(stream_id)?;

        let mut payload = BytesMut::new();
        payload.put_u8(stream_id.len() as u8);
        payload.put_slice(stream_id.as_bytes());
        payload.put_i64_le(expected_version);
        payload.put_u8(hard_delete as u8);

        let (source, task) = CompletionSource::new();
        let op = Operation::new(
            Command::DeleteStream,
            payload.freeze(),
            credentials,
            true,
            |pkg| match pkg.command {
                Command::DeleteStreamCompleted => Outcome::Done(Bytes::new()),
                Command::NotHandled => classify_not_handled(pkg),
                Command::NotAuthenticated => Outcome::Error(OperationError::NotAuthenticated),
                _ => Outcome::Error(OperationError::Protocol("unexpected response".into())),
            },
            source,
        );
        self.submit(op).await;
        Ok(remap_unit_task(task))
    }

    pub async fn read_event(
        &self,
        stream_id: &str,
        event_number: i64,
        resolve_link_tos: bool,
        credentials: Option<UserCredentials>,
    ) -> Result<Task<Result<Option<ResolvedEvent>, OperationError>>, EngineError> {
        Self::validate_stream_id(stream_id)?;

        let mut payload = BytesMut::new();
        payload.put_u8(stream_id.len() as u8);
        payload.put_slice(stream_id.as_bytes());
        payload.put_i64_le(event_number);
        payload.put_u8(resolve_link_tos as u8);

        let (source, task) = CompletionSource::new();
        let op = Operation::new(
            Command::ReadEvent,
            payload.freeze(),
            credentials,
            false,
            |pkg| match pkg.command {
                Command::ReadEventCompleted => Outcome::Done(pkg.payload.clone()),
                Command::NotAuthenticated => Outcome::Error(OperationError::NotAuthenticated),
                Command::NotHandled => classify_not_handled(pkg),
                _ => Outcome::Error(OperationError::Protocol("unexpected response".into())),
            },
            source,
        );
        self.submit(op).await;

        let mapped = task.wait();
        Ok(Task::from_future(async move {
            match mapped.await {
                Ok(Ok(body)) if body.is_empty() => Ok(None),
                Ok(Ok(body)) => Ok(Some(decode_resolved_event(&body))),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(OperationError::ConnectionClosed),
            }
        }))
    }

    pub async fn read_stream_events_forward(
        &self,
        stream_id: &str,
        start: i64,
        max_count: u16,
        resolve_link_tos: bool,
        credentials: Option<UserCredentials>,
    ) -> Result<Task<Result<StreamEventsSlice, OperationError>>, EngineError> {
        self.read_stream_events(
            Command::ReadStreamEventsForward,
            Command::ReadStreamEventsForwardCompleted,
            stream_id,
            start,
            max_count,
            resolve_link_tos,
            credentials,
        )
        .await
    }

    pub async fn read_stream_events_backward(
        &self,
        stream_id: &str,
        start: i64,
        max_count: u16,
        resolve_link_tos: bool,
        credentials: Option<UserCredentials>,
    ) -> Result<Task<Result<StreamEventsSlice, OperationError>>, EngineError> {
        self.read_stream_events(
            Command::ReadStreamEventsBackward,
            Command::ReadStreamEventsBackwardCompleted,
            stream_id,
            start,
            max_count,
            resolve_link_tos,
            credentials,
        )
        .await
    }

    async fn read_stream_events(
        &self,
        request: Command,
        completed: Command,
        stream_id: &str,
        start: i64,
        max_count: u16,
        resolve_link_tos: bool,
        credentials: Option<UserCredentials>,
    ) -> Result<Task<Result<StreamEventsSlice, OperationError>>, EngineError> {
        Self::validate_stream_id(stream_id)?;
        Ok(self
            .read_events_inner(request, completed, stream_id, start, max_count, resolve_link_tos, credentials)
            .await)
    }

    /// Shared by the single-stream reads (validated above) and the
    /// all-stream reads, which address the all-stream with an empty
    /// stream id and so must not go through `validate_stream_id`.
    async fn read_events_inner(
        &self,
        request: Command,
        completed: Command,
        stream_id: &str,
        start: i64,
        max_count: u16,
        resolve_link_tos: bool,
        credentials: Option<UserCredentials>,
    ) -> Task<Result<StreamEventsSlice, OperationError>> {
        let mut payload = BytesMut::new();
        payload.put_u8(stream_id.len() as u8);
        payload.put_slice(stream_id.as_bytes());
        payload.put_i64_le(start);
        payload.put_u16_le(max_count);
        payload.put_u8(resolve_link_tos as u8);

        let (source, task) = CompletionSource::new();
        let op = Operation::new(
            request,
            payload.freeze(),
            credentials,
            false,
            move |pkg| {
                if pkg.command == completed {
                    Outcome::Done(pkg.payload.clone())
                } else if pkg.command == Command::NotAuthenticated {
                    Outcome::Error(OperationError::NotAuthenticated)
                } else if pkg.command == Command::NotHandled {
                    classify_not_handled(pkg)
                } else {
                    Outcome::Error(OperationError::Protocol("unexpected response".into()))
                }
            },
            source,
        );
        self.submit(op).await;

        let mapped = task.wait();
        Task::from_future(async move {
            match mapped.await {
                Ok(Ok(body)) => Ok(decode_slice(&body)),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(OperationError::ConnectionClosed),
            }
        })
    }

    pub async fn read_all_events_forward(
        &self,
        position: i64,
        max_count: u16,
        resolve_link_tos: bool,
        credentials: Option<UserCredentials>,
    ) -> Task<Result<StreamEventsSlice, OperationError>> {
        self.read_events_inner(
            Command::ReadAllEventsForward,
            Command::ReadAllEventsForwardCompleted,
            "", // all-stream is addressed by empty stream id
            position,
            max_count,
            resolve_link_tos,
            credentials,
        )
        .await
    }

    pub async fn read_all_events_backward(
        &self,
        position: i64,
        max_count: u16,
        resolve_link_tos: bool,
        credentials: Option<UserCredentials>,
    ) -> Task<Result<StreamEventsSlice, OperationError>> {
        self.read_events_inner(
            Command::ReadAllEventsBackward,
            Command::ReadAllEventsBackwardCompleted,
            "", // all-stream is addressed by empty stream id
            position,
            max_count,
            resolve_link_tos,
            credentials,
        )
        .await
    }

    pub async fn create_persistent_subscription(
        &self,
        stream_id: &str,
        group_name: &str,
        settings: PersistentSubscriptionSettings,
        credentials: Option<UserCredentials>,
    ) -> Result<Task<Result<(), OperationError>>, EngineError> {
        Self::validate_stream_id(stream_id)?;
        let payload = encode_persistent_subscription_settings(stream_id, group_name, &settings);
        Ok(self
            .submit_persistent_subscription_op(
                Command::CreatePersistentSubscription,
                Command::CreatePersistentSubscriptionCompleted,
                payload,
                credentials,
            )
            .await)
    }

    pub async fn update_persistent_subscription(
        &self,
        stream_id: &str,
        group_name: &str,
        settings: PersistentSubscriptionSettings,
        credentials: Option<UserCredentials>,
    ) -> Result<Task<Result<(), OperationError>>, EngineError> {
        Self::validate_stream_id(stream_id)?;
        let payload = encode_persistent_subscription_settings(stream_id, group_name, &settings);
        Ok(self
            .submit_persistent_subscription_op(
                Command::UpdatePersistentSubscription,
                Command::UpdatePersistentSubscriptionCompleted,
                payload,
                credentials,
            )
            .await)
    }

    pub async fn delete_persistent_subscription(
        &self,
        stream_id: &str,
        group_name: &str,
        credentials: Option<UserCredentials>,
    ) -> Result<Task<Result<(), OperationError>>, EngineError> {
        Self::validate_stream_id(stream_id)?;
        let mut payload = BytesMut::new();
        payload.put_u8(group_name.len() as u8);
        payload.put_slice(group_name.as_bytes());
        payload.put_u8(stream_id.len() as u8);
        payload.put_slice(stream_id.as_bytes());
        Ok(self
            .submit_persistent_subscription_op(
                Command::DeletePersistentSubscription,
                Command::DeletePersistentSubscriptionCompleted,
                payload.freeze(),
                credentials,
            )
            .await)
    }

    async fn submit_persistent_subscription_op(
        &self,
        command: Command,
        completed: Command,
        payload: Bytes,
        credentials: Option<UserCredentials>,
    ) -> Task<Result<(), OperationError>> {
        let (source, task) = CompletionSource::new();
        let op = Operation::new(
            command,
            payload,
            credentials,
            true,
            move |pkg| {
                if pkg.command == completed {
                    Outcome::Done(Bytes::new())
                } else if pkg.command == Command::NotAuthenticated {
                    Outcome::Error(OperationError::NotAuthenticated)
                } else if pkg.command == Command::NotHandled {
                    classify_not_handled(pkg)
                } else {
                    Outcome::Error(OperationError::Protocol("unexpected response".into()))
                }
            },
            source,
        );
        self.submit(op).await;
        remap_unit_task(task)
    }

    pub async fn subscribe_to_stream(
        &self,
        stream_id: &str,
        resolve_link_tos: bool,
        event_appeared: impl Fn(&ResolvedEvent) + Send + Sync + 'static,
        subscription_dropped: impl Fn(crate::errors::DropReason) + Send + Sync + 'static,
        credentials: Option<UserCredentials>,
    ) -> Task<Result<Subscription, OperationError>> {
        let sub = VolatileSubscription::new(
            stream_id,
            resolve_link_tos,
            credentials,
            event_appeared,
            subscription_dropped,
        );
        let id = sub.correlation_id;
        let cmd_tx = self.cmd_tx.clone();
        let _ = self.cmd_tx.send(EngineCommand::Subscribe(sub)).await;

        Task::from_future(async move { Ok(Subscription { id, cmd_tx }) })
    }

    /// Like `subscribe_to_stream`, but also waits for the server's
    /// `SubscriptionConfirmation` and returns the commit position/event
    /// number it was confirmed at — the anchor the catch-up bridge needs
    /// to know how far the live subscription already reaches.
    async fn subscribe_for_catchup(
        &self,
        stream_id: &str,
        resolve_link_tos: bool,
        event_appeared: impl Fn(&ResolvedEvent) + Send + Sync + 'static,
        subscription_dropped: impl Fn(crate::errors::DropReason) + Send + Sync + 'static,
        credentials: Option<UserCredentials>,
    ) -> Result<(Subscription, i64, Option<i64>), OperationError> {
        let (confirm_tx, confirm_rx) = oneshot::channel();
        let mut sub = VolatileSubscription::new(
            stream_id,
            resolve_link_tos,
            credentials,
            event_appeared,
            subscription_dropped,
        );
        sub.confirmation_tx = Some(confirm_tx);
        let id = sub.correlation_id;
        let cmd_tx = self.cmd_tx.clone();
        let _ = self.cmd_tx.send(EngineCommand::Subscribe(sub)).await;

        match confirm_rx.await {
            Ok((last_commit_position, last_event_number)) => {
                Ok((Subscription { id, cmd_tx }, last_commit_position, last_event_number))
            }
            Err(_) => Err(OperationError::ConnectionClosed),
        }
    }

    /// Drive a historical-read-then-live-subscribe bridge per the
    /// catch-up algorithm. Returns immediately with a handle; delivery
    /// happens on a background task that owns the bridge state machine.
    pub fn subscribe_to_stream_from(
        self: &Arc<Self>,
        stream_id: &str,
        from_event_number: i64,
        resolve_link_tos: bool,
        read_batch_size: u16,
        live_queue_size: usize,
        event_appeared: impl Fn(&ResolvedEvent) + Send + Sync + 'static,
        live_processing_started: impl Fn() + Send + Sync + 'static,
        subscription_dropped: impl Fn(crate::errors::DropReason) + Send + Sync + 'static,
        credentials: Option<UserCredentials>,
    ) {
        let connection = Arc::clone(self);
        let stream_id = stream_id.to_string();
        let event_appeared = Arc::new(event_appeared);
        let live_processing_started = Arc::new(live_processing_started);
        let subscription_dropped = Arc::new(subscription_dropped);

        tokio::spawn(async move {
            let mut bridge = CatchUpSubscription::new(&stream_id, from_event_number, live_queue_size);

            loop {
                let slice = match connection
                    .read_stream_events_forward(
                        &stream_id,
                        bridge.last_checkpoint() + 1,
                        read_batch_size,
                        resolve_link_tos,
                        credentials.clone(),
                    )
                    .await
                {
                    Ok(task) => match task.wait().await {
                        Ok(Ok(slice)) => slice,
                        _ => break,
                    },
                    Err(_) => break,
                };

                for event in slice.events {
                    if let Some(event) = bridge.feed_historical(event) {
                        event_appeared(&event);
                    }
                }

                if slice.is_end_of_stream {
                    break;
                }
            }

            let ea = Arc::clone(&event_appeared);
            let bridge = Arc::new(std::sync::Mutex::new(bridge));
            let bridge_for_events = Arc::clone(&bridge);
            let lps = Arc::clone(&live_processing_started);
            let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));

            let subscription = connection
                .subscribe_for_catchup(
                    &stream_id,
                    resolve_link_tos,
                    move |event: &ResolvedEvent| {
                        let mut guard = bridge_for_events.lock().unwrap();
                        if guard.state == CatchUpState::Live {
                            if let Some(event) = guard.feed_live(event.clone()) {
                                drop(guard);
                                ea(&event);
                            }
                        } else {
                            let _ = guard.buffer_live(event.clone());
                        }
                    },
                    move |reason| subscription_dropped(reason),
                    credentials.clone(),
                )
                .await;

            let Ok((_sub, last_commit_position, last_event_number)) = subscription else {
                return;
            };

            // Anchor on the server-confirmed position, not our own
            // checkpoint: events may have been appended between the last
            // historical page and the live subscription's confirmation.
            let anchor = last_event_number.unwrap_or(last_commit_position);
            let mut next_from = {
                let mut guard = bridge.lock().unwrap();
                guard.begin_live_subscription(anchor);
                guard.last_checkpoint() + 1
            };

            let mut gap_events = Vec::new();
            while next_from <= anchor {
                let slice = match connection
                    .read_stream_events_forward(
                        &stream_id,
                        next_from,
                        read_batch_size,
                        resolve_link_tos,
                        credentials.clone(),
                    )
                    .await
                {
                    Ok(task) => match task.wait().await {
                        Ok(Ok(slice)) => slice,
                        _ => break,
                    },
                    Err(_) => break,
                };
                if slice.events.is_empty() {
                    break;
                }
                next_from = slice.next_event_number.max(next_from + 1);
                gap_events.extend(slice.events);
                if slice.is_end_of_stream {
                    break;
                }
            }

            let (dispatch, should_fire) = {
                let mut guard = bridge.lock().unwrap();
                guard.drain_gap_and_go_live(gap_events)
            };
            if should_fire && !fired.swap(true, std::sync::atomic::Ordering::SeqCst) {
                lps();
            }
            for event in dispatch {
                event_appeared(&event);
            }
        });
    }

    async fn submit(&self, op: Operation) {
        let _ = self.cmd_tx.send(EngineCommand::Submit(op)).await;
    }

    pub fn connected(&self) -> &EventHandlers<ConnectionEvent> {
        &self.events.connected
    }

    pub fn disconnected(&self) -> &EventHandlers<ConnectionEvent> {
        &self.events.disconnected
    }

    pub fn reconnecting(&self) -> &EventHandlers<ConnectionEvent> {
        &self.events.reconnecting
    }

    pub fn closed(&self) -> &EventHandlers<ConnectionEvent> {
        &self.events.closed
    }

    pub fn error_occurred(&self) -> &EventHandlers<ConnectionEvent> {
        &self.events.error_occurred
    }

    pub fn authentication_failed(&self) -> &EventHandlers<ConnectionEvent> {
        &self.events.authentication_failed
    }
}

/// Decode a `NotHandled` response into a retry (stay on this connection)
/// or, for a master-bound write/delete told `NotMaster` with a resolvable
/// master address, a reconnect to that address.
fn classify_not_handled(pkg: &crate::frame::Package) -> Outcome {
    match frame::decode_not_handled(&pkg.payload) {
        Some((NotHandledReason::NotMaster, Some(master))) => Outcome::Reconnect(master),
        Some((reason, _)) => Outcome::Retry(format!("not handled: {reason:?}")),
        None => Outcome::Retry("not handled".into()),
    }
}

fn decode_write_result(pkg: &crate::frame::Package) -> Outcome {
    match pkg.command {
        Command::WriteEventsCompleted => {
            let next = pkg
                .payload
                .get(0..8)
                .map(|b| i64::from_le_bytes(b.try_into().unwrap()))
                .unwrap_or(-1);
            let mut out = BytesMut::new();
            out.put_i64_le(next);
            Outcome::Done(out.freeze())
        }
        Command::NotHandled => classify_not_handled(pkg),
        Command::NotAuthenticated => Outcome::Error(OperationError::NotAuthenticated),
        _ => Outcome::Error(OperationError::Protocol("unexpected response".into())),
    }
}

fn encode_persistent_subscription_settings(
    stream_id: &str,
    group_name: &str,
    settings: &PersistentSubscriptionSettings,
) -> Bytes {
    let mut payload = BytesMut::new();
    payload.put_u8(group_name.len() as u8);
    payload.put_slice(group_name.as_bytes());
    payload.put_u8(stream_id.len() as u8);
    payload.put_slice(stream_id.as_bytes());
    payload.put_u8(settings.resolve_link_tos as u8);
    payload.put_i64_le(settings.start_from);
    payload.put_i32_le(settings.max_retry_count);
    payload.freeze()
}

fn decode_resolved_event(body: &Bytes) -> ResolvedEvent {
    let mut b = body.clone();
    let event_number = if b.len() >= 8 {
        let n = i64::from_le_bytes(b[..8].try_into().unwrap());
        b.advance(8);
        n
    } else {
        0
    };
    ResolvedEvent {
        event_number,
        commit_position: event_number,
        prepare_position: event_number,
        event_type: String::new(),
        data: b,
    }
}

fn decode_slice(body: &Bytes) -> StreamEventsSlice {
    let mut b = body.clone();
    let mut events = Vec::new();
    let next_event_number = if b.len() >= 8 {
        let n = i64::from_le_bytes(b[..8].try_into().unwrap());
        b.advance(8);
        n
    } else {
        0
    };
    let is_end_of_stream = if !b.is_empty() {
        let flag = b[0] != 0;
        b.advance(1);
        flag
    } else {
        true
    };
    while b.len() >= 8 {
        let n = i64::from_le_bytes(b[..8].try_into().unwrap());
        b.advance(8);
        events.push(ResolvedEvent {
            event_number: n,
            commit_position: n,
            prepare_position: n,
            event_type: String::new(),
            data: Bytes::new(),
        });
    }
    StreamEventsSlice {
        events,
        next_event_number,
        is_end_of_stream,
    }
}

fn remap_task(
    task: Task<Result<Bytes, OperationError>>,
) -> Task<Result<WriteResult, OperationError>> {
    Task::from_future(async move {
        match task.wait().await {
            Ok(Ok(body)) => {
                let next = body
                    .get(0..8)
                    .map(|b| i64::from_le_bytes(b.try_into().unwrap()))
                    .unwrap_or(-1);
                Ok(WriteResult {
                    next_expected_version: next,
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(OperationError::ConnectionClosed),
        }
    })
}

fn remap_unit_task(task: Task<Result<Bytes, OperationError>>) -> Task<Result<(), OperationError>> {
    Task::from_future(async move {
        match task.wait().await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(OperationError::ConnectionClosed),
        }
    })
}
