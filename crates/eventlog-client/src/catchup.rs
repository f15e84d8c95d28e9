//! Catch-up subscription: bridges a historical reader with a live volatile
//! subscription under a no-gap, no-duplicate, strict-order invariant.
//!
//! Phases: `Pulling` historical pages, open a live subscription and buffer
//! its events unread, `CaughtUp` drains any remaining gap between the last
//! historical checkpoint and the live subscription's anchor, then `Live`
//! drains the buffer and dispatches live events as they arrive.

use std::collections::VecDeque;

use crate::errors::DropReason;
use crate::subscriptions::ResolvedEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchUpState {
    Pulling,
    CaughtUp,
    Live,
    Stopped,
}

/// Drives the catch-up algorithm. Historical reads are supplied by the
/// caller (the engine) via `feed_historical`; live events via
/// `feed_live`. The bridge itself only tracks checkpoints, dedup, and the
/// live buffer — it does not perform I/O.
pub struct CatchUpSubscription {
    pub stream_id: String,
    pub state: CatchUpState,
    last_checkpoint: i64,
    live_anchor: Option<i64>,
    live_queue: VecDeque<ResolvedEvent>,
    live_queue_cap: usize,
    live_processing_started_fired: bool,
}

impl CatchUpSubscription {
    pub fn new(stream_id: impl Into<String>, from_checkpoint: i64, live_queue_cap: usize) -> Self {
        Self {
            stream_id: stream_id.into(),
            state: CatchUpState::Pulling,
            last_checkpoint: from_checkpoint,
            live_anchor: None,
            live_queue: VecDeque::new(),
            live_queue_cap,
            live_processing_started_fired: false,
        }
    }

    pub fn last_checkpoint(&self) -> i64 {
        self.last_checkpoint
    }

    /// Feed one historical event read during the pull phase. Returns
    /// `Some(event)` to dispatch, or `None` if it was already processed
    /// (dedup).
    pub fn feed_historical(&mut self, event: ResolvedEvent) -> Option<ResolvedEvent> {
        if event.event_number <= self.last_checkpoint {
            return None;
        }
        self.last_checkpoint = event.event_number;
        Some(event)
    }

    /// Called once the historical pull phase reaches end-of-stream: open
    /// the live subscription's anchor position.
    pub fn begin_live_subscription(&mut self, anchor_event_number: i64) {
        self.state = CatchUpState::CaughtUp;
        self.live_anchor = Some(anchor_event_number);
    }

    /// Buffer a live event that arrived while still catching up. Returns
    /// `Err(DropReason::ProcessingQueueOverflow)` if the buffer is full.
    pub fn buffer_live(&mut self, event: ResolvedEvent) -> Result<(), DropReason> {
        if self.live_queue.len() >= self.live_queue_cap {
            self.state = CatchUpState::Stopped;
            return Err(DropReason::ProcessingQueueOverflow);
        }
        self.live_queue.push_back(event);
        Ok(())
    }

    /// Drain any remaining gap between `last_checkpoint` and the live
    /// anchor using further historical reads, then transition to `Live`
    /// and dispatch buffered events. Returns the events to dispatch, in
    /// order, and whether `live_processing_started` should fire (exactly
    /// once, before the first live-queue event is dispatched).
    pub fn drain_gap_and_go_live(
        &mut self,
        gap_events: Vec<ResolvedEvent>,
    ) -> (Vec<ResolvedEvent>, bool) {
        let mut dispatch = Vec::new();
        for event in gap_events {
            if let Some(e) = self.feed_historical(event) {
                dispatch.push(e);
            }
        }

        self.state = CatchUpState::Live;
        let mut fired_now = false;
        if !self.live_processing_started_fired {
            self.live_processing_started_fired = true;
            fired_now = true;
        }

        while let Some(event) = self.live_queue.pop_front() {
            if event.event_number <= self.last_checkpoint {
                continue;
            }
            self.last_checkpoint = event.event_number;
            dispatch.push(event);
        }

        (dispatch, fired_now)
    }

    /// Dispatch a live event once already in the `Live` state, applying the
    /// same dedup/ordering rule.
    pub fn feed_live(&mut self, event: ResolvedEvent) -> Option<ResolvedEvent> {
        debug_assert_eq!(self.state, CatchUpState::Live);
        if event.event_number <= self.last_checkpoint {
            return None;
        }
        self.last_checkpoint = event.event_number;
        Some(event)
    }

    /// Reset to the pull phase at the current checkpoint, e.g. after a
    /// disconnect — nothing buffered survives, only the checkpoint does.
    pub fn restart_after_disconnect(&mut self) {
        self.state = CatchUpState::Pulling;
        self.live_anchor = None;
        self.live_queue.clear();
    }

    pub fn stop(&mut self) {
        self.state = CatchUpState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: i64) -> ResolvedEvent {
        ResolvedEvent {
            event_number: n,
            commit_position: n,
            prepare_position: n,
            event_type: "Test".into(),
            data: bytes::Bytes::new(),
        }
    }

    #[test]
    fn historical_events_advance_checkpoint_and_dedup() {
        let mut sub = CatchUpSubscription::new("s", -1, 100);
        assert!(sub.feed_historical(event(0)).is_some());
        assert_eq!(sub.last_checkpoint(), 0);
        assert!(sub.feed_historical(event(0)).is_none(), "duplicate must be dropped");
        assert!(sub.feed_historical(event(1)).is_some());
    }

    #[test]
    fn full_bridge_delivers_strict_order_with_no_gap_or_dup() {
        let mut sub = CatchUpSubscription::new("s", 4, 10_000);
        // Pull phase: historical events 5..=10.
        let mut delivered = Vec::new();
        for n in 5..=10 {
            if let Some(e) = sub.feed_historical(event(n)) {
                delivered.push(e.event_number);
            }
        }
        sub.begin_live_subscription(10);

        // Live events 11, 12 arrive while still catching up (buffered).
        sub.buffer_live(event(11)).unwrap();
        sub.buffer_live(event(12)).unwrap();

        // No further gap to fill (anchor already reached via pull).
        let (gap_dispatch, fired) = sub.drain_gap_and_go_live(vec![]);
        delivered.extend(gap_dispatch.iter().map(|e| e.event_number));
        assert!(fired, "liveProcessingStarted fires exactly once");

        assert_eq!(delivered, vec![5, 6, 7, 8, 9, 10, 11, 12]);
        assert_eq!(sub.state, CatchUpState::Live);

        // Further live events dispatch directly.
        let e13 = sub.feed_live(event(13)).unwrap();
        assert_eq!(e13.event_number, 13);
    }

    #[test]
    fn overflowing_live_buffer_drops_with_reason() {
        let mut sub = CatchUpSubscription::new("s", -1, 1);
        sub.buffer_live(event(0)).unwrap();
        let err = sub.buffer_live(event(1)).unwrap_err();
        assert_eq!(err, DropReason::ProcessingQueueOverflow);
        assert_eq!(sub.state, CatchUpState::Stopped);
    }

    #[test]
    fn disconnect_restarts_from_last_checkpoint_without_replaying_buffer() {
        let mut sub = CatchUpSubscription::new("s", -1, 100);
        sub.feed_historical(event(0));
        sub.begin_live_subscription(0);
        sub.buffer_live(event(1)).unwrap();

        sub.restart_after_disconnect();
        assert_eq!(sub.state, CatchUpState::Pulling);
        assert_eq!(sub.last_checkpoint(), 0);

        // Re-pulling the same event again must still dedup against the
        // checkpoint that survived the restart.
        assert!(sub.feed_historical(event(0)).is_none());
        assert!(sub.feed_historical(event(1)).is_some());
    }
}
