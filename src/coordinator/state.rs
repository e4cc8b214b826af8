//! Per-device coordinator state.

use serde::Serialize;
use strum::Display;
use tokio::time::Instant;

/// Life-cycle of one device coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
pub enum DeviceState {
    /// Not started or no subscribers; advertisements are dropped.
    Idle,
    AwaitingAdvertisement,
    /// An active poll is in flight.
    Polling,
    Publishing,
    /// Torn down; the coordinator accepts no further commands.
    Stopped,
}

/// Poll bookkeeping, owned by the device's coordinator task.
#[derive(Debug, Clone, Default)]
pub struct PollState {
    last_success: Option<Instant>,
    last_failure: Option<Instant>,
    in_flight: bool,
    attempt: u64,
    consecutive_failures: u32,
}

impl PollState {
    pub fn last_success(&self) -> Option<Instant> {
        self.last_success
    }

    pub fn last_failure(&self) -> Option<Instant> {
        self.last_failure
    }

    /// Reference time for the poll policy: the later of the last success
    /// and the last failure, so failures wait a full interval too.
    pub fn last_poll_time(&self) -> Option<Instant> {
        match (self.last_success, self.last_failure) {
            (Some(ok), Some(failed)) => Some(ok.max(failed)),
            (ok, failed) => ok.or(failed),
        }
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Sequence number of the most recent attempt.
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub(crate) fn begin(&mut self) -> u64 {
        self.in_flight = true;
        self.attempt += 1;
        self.attempt
    }

    pub(crate) fn succeed(&mut self, at: Instant) {
        self.in_flight = false;
        self.last_success = Some(at);
        self.consecutive_failures = 0;
    }

    pub(crate) fn fail(&mut self, at: Instant) {
        self.in_flight = false;
        self.last_failure = Some(at);
        self.consecutive_failures += 1;
    }
}
