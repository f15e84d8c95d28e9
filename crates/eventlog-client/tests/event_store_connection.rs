//! End-to-end tests driving `EventStoreConnection` against a mock TCP peer
//! that speaks the real `Package` wire protocol, adapted from this
//! codebase's own mock-peer integration style.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use eventlog_client::connection::EventData;
use eventlog_client::discovery::StaticEndpointDiscoverer;
use eventlog_client::errors::DropReason;
use eventlog_client::frame::{Command, Package, PackageCodec};
use eventlog_client::EventStoreConnection;
use eventlog_settings::ConnectionSettings;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use uuid::Uuid;

async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

async fn accept_and_identify(listener: &TcpListener) -> Framed<TcpStream, PackageCodec> {
    let (stream, _) = listener.accept().await.unwrap();
    let mut framed = Framed::new(stream, PackageCodec);
    let identify = framed.next().await.unwrap().unwrap();
    assert_eq!(identify.command, Command::ClientIdentify);
    framed
        .send(Package::new(Command::ClientIdentified, Uuid::new_v4(), Bytes::new()))
        .await
        .unwrap();
    framed
}

fn write_result_payload(next_expected_version: i64) -> Bytes {
    let mut out = BytesMut::new();
    out.put_i64_le(next_expected_version);
    out.freeze()
}

#[tokio::test]
async fn append_success() {
    let (listener, addr) = bind().await;

    let server = tokio::spawn(async move {
        let mut framed = accept_and_identify(&listener).await;
        let write = framed.next().await.unwrap().unwrap();
        assert_eq!(write.command, Command::WriteEvents);
        framed
            .send(Package::new(
                Command::WriteEventsCompleted,
                write.correlation_id,
                write_result_payload(0),
            ))
            .await
            .unwrap();
    });

    let discoverer = Arc::new(StaticEndpointDiscoverer::new(addr));
    let connection = EventStoreConnection::new(ConnectionSettings::default(), discoverer);
    connection.connect_async().await.unwrap();

    let task = connection
        .append_to_stream("orders-1", -2, vec![EventData::new("a", Bytes::from_static(b"{}"))], None)
        .await
        .unwrap();
    let result = task.wait().await.unwrap().unwrap();
    assert_eq!(result.next_expected_version, 0);

    server.await.unwrap();
}

#[tokio::test]
async fn retry_on_transient_error_then_success() {
    let (listener, addr) = bind().await;

    let server = tokio::spawn(async move {
        let mut framed = accept_and_identify(&listener).await;
        let mut seen_ids = Vec::new();

        for _ in 0..2 {
            let write = framed.next().await.unwrap().unwrap();
            assert_eq!(write.command, Command::WriteEvents);
            seen_ids.push(write.correlation_id);
            framed
                .send(Package::new(Command::NotHandled, write.correlation_id, Bytes::new()))
                .await
                .unwrap();
        }

        let write = framed.next().await.unwrap().unwrap();
        seen_ids.push(write.correlation_id);
        framed
            .send(Package::new(
                Command::WriteEventsCompleted,
                write.correlation_id,
                write_result_payload(0),
            ))
            .await
            .unwrap();

        seen_ids.sort();
        seen_ids.dedup();
        assert_eq!(seen_ids.len(), 3, "each retry used a distinct correlation id");
    });

    let discoverer = Arc::new(StaticEndpointDiscoverer::new(addr));
    let connection = EventStoreConnection::new(ConnectionSettings::default(), discoverer);
    connection.connect_async().await.unwrap();

    let task = connection
        .append_to_stream("orders-2", -2, vec![EventData::new("a", Bytes::from_static(b"{}"))], None)
        .await
        .unwrap();
    let result = task.wait().await.unwrap().unwrap();
    assert_eq!(result.next_expected_version, 0);

    server.await.unwrap();
}

#[tokio::test]
async fn subscription_delivers_events_in_order_then_unsubscribe_drops() {
    let (listener, addr) = bind().await;

    let server = tokio::spawn(async move {
        let mut framed = accept_and_identify(&listener).await;

        let subscribe = framed.next().await.unwrap().unwrap();
        assert_eq!(subscribe.command, Command::SubscribeToStream);
        let sub_id = subscribe.correlation_id;
        framed
            .send(Package::new(Command::SubscriptionConfirmation, sub_id, Bytes::new()))
            .await
            .unwrap();

        for event_number in [7i64, 8, 9] {
            let mut payload = BytesMut::new();
            payload.put_i64_le(event_number);
            framed
                .send(Package::new(Command::StreamEventAppeared, sub_id, payload.freeze()))
                .await
                .unwrap();
        }

        let unsubscribe = framed.next().await.unwrap().unwrap();
        assert_eq!(unsubscribe.command, Command::UnsubscribeFromStream);
        assert_eq!(unsubscribe.correlation_id, sub_id);
        framed
            .send(Package::new(
                Command::SubscriptionDropped,
                sub_id,
                Bytes::from_static(&[0]),
            ))
            .await
            .unwrap();
    });

    let discoverer = Arc::new(StaticEndpointDiscoverer::new(addr));
    let connection = EventStoreConnection::new(ConnectionSettings::default(), discoverer);
    connection.connect_async().await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let dropped = Arc::new(Mutex::new(None));
    let seen_clone = Arc::clone(&seen);
    let dropped_clone = Arc::clone(&dropped);

    let task = connection
        .subscribe_to_stream(
            "orders-3",
            false,
            move |event| seen_clone.lock().unwrap().push(event.event_number),
            move |reason| *dropped_clone.lock().unwrap() = Some(reason),
            None,
        )
        .await;
    let subscription = task.wait().await.unwrap().unwrap();

    // give the three StreamEventAppeared frames a moment to land
    for _ in 0..50 {
        if seen.lock().unwrap().len() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(*seen.lock().unwrap(), vec![7, 8, 9]);

    subscription.close().await;
    for _ in 0..50 {
        if dropped.lock().unwrap().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(*dropped.lock().unwrap(), Some(DropReason::Unsubscribed));

    server.await.unwrap();
}

#[tokio::test]
async fn heartbeat_timeout_triggers_reconnect_and_resubmit_completes() {
    let (listener, addr) = bind().await;

    let server = tokio::spawn(async move {
        // First connection: identify, then go silent on everything the
        // client sends (including its heartbeat request) until the
        // client gives up and closes the transport from its side.
        let mut first = accept_and_identify(&listener).await;
        loop {
            match first.next().await {
                Some(Ok(_)) => continue,
                _ => break,
            }
        }

        // Second connection after reconnect: identify and answer the
        // write that was requeued across the disconnect.
        let mut second = accept_and_identify(&listener).await;
        let write = second.next().await.unwrap().unwrap();
        assert_eq!(write.command, Command::WriteEvents);
        second
            .send(Package::new(
                Command::WriteEventsCompleted,
                write.correlation_id,
                write_result_payload(0),
            ))
            .await
            .unwrap();
    });

    let settings = ConnectionSettings::builder()
        .with_heartbeat_interval(Duration::from_millis(30))
        .with_heartbeat_timeout(Duration::from_millis(30))
        .with_operation_timeout_check_period(Duration::from_millis(10))
        .with_reconnection_delay(Duration::from_millis(10))
        .build()
        .unwrap();

    let discoverer = Arc::new(StaticEndpointDiscoverer::new(addr));
    let connection = EventStoreConnection::new(settings, discoverer);
    connection.connect_async().await.unwrap();

    let disconnected = Arc::new(AtomicUsize::new(0));
    let reconnecting = Arc::new(AtomicUsize::new(0));
    let d1 = Arc::clone(&disconnected);
    let r1 = Arc::clone(&reconnecting);
    connection.disconnected().add(move |_| {
        d1.fetch_add(1, Ordering::SeqCst);
    });
    connection.reconnecting().add(move |_| {
        r1.fetch_add(1, Ordering::SeqCst);
    });

    // Submitted before the heartbeat fails; must survive the disconnect
    // and complete once the engine reconnects.
    let task = connection
        .append_to_stream("orders-4", -2, vec![EventData::new("a", Bytes::from_static(b"{}"))], None)
        .await
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), task.wait())
        .await
        .expect("operation should complete after reconnect")
        .unwrap()
        .unwrap();
    assert_eq!(result.next_expected_version, 0);

    assert!(disconnected.load(Ordering::SeqCst) >= 1);
    assert!(reconnecting.load(Ordering::SeqCst) >= 1);

    server.await.unwrap();
}
