//! Volatile subscription registry.
//!
//! A volatile subscription tracks a single `streamId` (empty means the
//! all-stream) from `Subscribing` through `Subscribed` to `Unsubscribed`.
//! Events are dispatched to `event_appeared` strictly in arrival order;
//! `subscription_dropped` fires exactly once, with the terminating reason.

use std::collections::HashMap;
use std::sync::Arc;

use eventlog_settings::UserCredentials;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::errors::DropReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Subscribing,
    Subscribed,
    Unsubscribed,
}

/// A single resolved event handed to `event_appeared`.
#[derive(Debug, Clone)]
pub struct ResolvedEvent {
    pub event_number: i64,
    pub commit_position: i64,
    pub prepare_position: i64,
    pub event_type: String,
    pub data: bytes::Bytes,
}

pub struct VolatileSubscription {
    pub correlation_id: Uuid,
    pub stream_id: String,
    pub resolve_link_tos: bool,
    pub credentials: Option<UserCredentials>,
    pub state: SubscriptionState,
    pub last_event_number: Option<i64>,
    pub last_commit_position: Option<i64>,
    /// Set by a caller that needs the server-confirmed anchor (the
    /// catch-up bridge's live-subscribe step); fired once by `confirm`.
    pub confirmation_tx: Option<oneshot::Sender<(i64, Option<i64>)>>,
    event_appeared: Arc<dyn Fn(&ResolvedEvent) + Send + Sync>,
    subscription_dropped: Arc<dyn Fn(DropReason) + Send + Sync>,
}

impl VolatileSubscription {
    pub fn new(
        stream_id: impl Into<String>,
        resolve_link_tos: bool,
        credentials: Option<UserCredentials>,
        event_appeared: impl Fn(&ResolvedEvent) + Send + Sync + 'static,
        subscription_dropped: impl Fn(DropReason) + Send + Sync + 'static,
    ) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            stream_id: stream_id.into(),
            resolve_link_tos,
            credentials,
            state: SubscriptionState::Subscribing,
            last_event_number: None,
            last_commit_position: None,
            confirmation_tx: None,
            event_appeared: Arc::new(event_appeared),
            subscription_dropped: Arc::new(subscription_dropped),
        }
    }

    pub fn is_all_stream(&self) -> bool {
        self.stream_id.is_empty()
    }
}

/// Registry of all volatile subscriptions, keyed by correlation id.
#[derive(Default)]
pub struct SubscriptionManager {
    subscriptions: HashMap<Uuid, VolatileSubscription>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sub: VolatileSubscription) -> Uuid {
        let id = sub.correlation_id;
        self.subscriptions.insert(id, sub);
        id
    }

    pub fn confirm(&mut self, id: Uuid, last_commit_position: i64, last_event_number: Option<i64>) {
        if let Some(sub) = self.subscriptions.get_mut(&id) {
            sub.state = SubscriptionState::Subscribed;
            sub.last_commit_position = Some(last_commit_position);
            sub.last_event_number = last_event_number;
            if let Some(tx) = sub.confirmation_tx.take() {
                let _ = tx.send((last_commit_position, last_event_number));
            }
        }
    }

    pub fn dispatch_event(&mut self, id: Uuid, event: ResolvedEvent) {
        if let Some(sub) = self.subscriptions.get_mut(&id) {
            sub.last_event_number = Some(event.event_number);
            sub.last_commit_position = Some(event.commit_position);
            (sub.event_appeared)(&event);
        }
    }

    /// Remove and drop a subscription with the given reason. Idempotent: a
    /// second call for the same id is a no-op.
    pub fn drop_subscription(&mut self, id: Uuid, reason: DropReason) {
        if let Some(mut sub) = self.subscriptions.remove(&id) {
            sub.state = SubscriptionState::Unsubscribed;
            (sub.subscription_dropped)(reason);
        }
    }

    pub fn drop_all(&mut self, reason: DropReason) {
        let ids: Vec<Uuid> = self.subscriptions.keys().copied().collect();
        for id in ids {
            self.drop_subscription(id, reason.clone());
        }
    }

    pub fn state_of(&self, id: Uuid) -> Option<SubscriptionState> {
        self.subscriptions.get(&id).map(|s| s.state)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording_sub(
        events: Arc<Mutex<Vec<i64>>>,
        drops: Arc<Mutex<Vec<DropReason>>>,
    ) -> VolatileSubscription {
        VolatileSubscription::new(
            "orders",
            false,
            None,
            move |e| events.lock().unwrap().push(e.event_number),
            move |r| drops.lock().unwrap().push(r),
        )
    }

    #[test]
    fn events_dispatch_in_arrival_order() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let drops = Arc::new(Mutex::new(Vec::new()));
        let mut mgr = SubscriptionManager::new();
        let id = mgr.register(recording_sub(Arc::clone(&events), drops));
        mgr.confirm(id, 0, None);

        for n in [7, 8, 9] {
            mgr.dispatch_event(
                id,
                ResolvedEvent {
                    event_number: n,
                    commit_position: n,
                    prepare_position: n,
                    event_type: "Test".into(),
                    data: bytes::Bytes::new(),
                },
            );
        }

        assert_eq!(*events.lock().unwrap(), vec![7, 8, 9]);
        assert_eq!(mgr.state_of(id), Some(SubscriptionState::Subscribed));
    }

    #[test]
    fn drop_fires_exactly_once() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let drops = Arc::new(Mutex::new(Vec::new()));
        let mut mgr = SubscriptionManager::new();
        let id = mgr.register(recording_sub(events, Arc::clone(&drops)));

        mgr.drop_subscription(id, DropReason::Unsubscribed);
        mgr.drop_subscription(id, DropReason::Unsubscribed);

        assert_eq!(drops.lock().unwrap().len(), 1);
        assert!(mgr.is_empty());
    }

    #[test]
    fn drop_all_clears_registry() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let drops = Arc::new(Mutex::new(Vec::new()));
        let mut mgr = SubscriptionManager::new();
        mgr.register(recording_sub(Arc::clone(&events), Arc::clone(&drops)));
        mgr.register(recording_sub(events, Arc::clone(&drops)));

        mgr.drop_all(DropReason::ConnectionClosed);
        assert!(mgr.is_empty());
        assert_eq!(drops.lock().unwrap().len(), 2);
    }
}
