//! Decides when an advertisement should escalate to an active poll.

use std::time::Duration;
use tokio::time::Instant;

/// Side-effect free poll decision.
///
/// Reachability of the device is not part of the policy; the coordinator
/// checks for a connectable radio only after the policy says yes.
pub trait PollPolicy: Send + Sync {
    fn should_poll(&self, last_poll: Option<Instant>, now: Instant, advertisement_present: bool) -> bool;
}

/// Poll on cold start, then once per `interval`.
#[derive(Debug, Clone, Copy)]
pub struct IntervalPollPolicy {
    interval: Duration,
}

impl IntervalPollPolicy {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl PollPolicy for IntervalPollPolicy {
    fn should_poll(&self, last_poll: Option<Instant>, now: Instant, _advertisement_present: bool) -> bool {
        match last_poll {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }
}
