//! Heartbeat and identify/authenticate handshake bookkeeping.
//!
//! Folded into the engine's own tick handling rather than run as a
//! separate task: the engine is single-threaded and cooperative, so a
//! second task racing it for the transport would violate the "only the
//! engine writes to the socket" rule.

use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Nothing due yet.
    None,
    /// Send our own `HeartbeatRequest`; no frame has arrived recently.
    SendRequest,
    /// The peer missed the response deadline; the transport must be torn
    /// down and the engine must reconnect.
    TimedOut,
}

pub struct HeartbeatTracker {
    interval: Duration,
    timeout: Duration,
    last_frame_at: Instant,
    awaiting_response_since: Option<Instant>,
}

impl HeartbeatTracker {
    pub fn new(interval: Duration, timeout: Duration, now: Instant) -> Self {
        Self {
            interval,
            timeout,
            last_frame_at: now,
            awaiting_response_since: None,
        }
    }

    /// Any inbound frame, not just a heartbeat response, counts as
    /// liveness (`Command::indicates_liveness`).
    pub fn record_frame(&mut self, now: Instant, indicates_liveness: bool) {
        if indicates_liveness {
            self.last_frame_at = now;
            self.awaiting_response_since = None;
        }
    }

    pub fn tick(&mut self, now: Instant) -> HeartbeatAction {
        if let Some(since) = self.awaiting_response_since {
            if now.duration_since(since) > self.timeout {
                return HeartbeatAction::TimedOut;
            }
            return HeartbeatAction::None;
        }

        if now.duration_since(self.last_frame_at) >= self.interval {
            self.awaiting_response_since = Some(now);
            return HeartbeatAction::SendRequest;
        }

        HeartbeatAction::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_quiet_within_interval() {
        let now = Instant::now();
        let mut tracker =
            HeartbeatTracker::new(Duration::from_millis(750), Duration::from_millis(1500), now);
        assert_eq!(tracker.tick(now + Duration::from_millis(100)), HeartbeatAction::None);
    }

    #[test]
    fn sends_request_after_interval_elapses() {
        let now = Instant::now();
        let mut tracker =
            HeartbeatTracker::new(Duration::from_millis(750), Duration::from_millis(1500), now);
        assert_eq!(
            tracker.tick(now + Duration::from_millis(751)),
            HeartbeatAction::SendRequest
        );
    }

    #[test]
    fn times_out_if_no_response_arrives() {
        let now = Instant::now();
        let mut tracker =
            HeartbeatTracker::new(Duration::from_millis(750), Duration::from_millis(1500), now);
        let t1 = now + Duration::from_millis(751);
        assert_eq!(tracker.tick(t1), HeartbeatAction::SendRequest);

        let t2 = t1 + Duration::from_millis(1501);
        assert_eq!(tracker.tick(t2), HeartbeatAction::TimedOut);
    }

    #[test]
    fn any_liveness_frame_resets_the_clock() {
        let now = Instant::now();
        let mut tracker =
            HeartbeatTracker::new(Duration::from_millis(750), Duration::from_millis(1500), now);
        let t1 = now + Duration::from_millis(751);
        assert_eq!(tracker.tick(t1), HeartbeatAction::SendRequest);

        tracker.record_frame(t1 + Duration::from_millis(10), true);
        let t2 = t1 + Duration::from_millis(20);
        assert_eq!(tracker.tick(t2), HeartbeatAction::None);
    }
}
