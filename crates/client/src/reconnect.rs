//! Reconnection scheduling
//!
//! At most one reconnect timer exists at a time. Scheduling while a timer is
//! already pending keeps the earlier deadline, so a flapping connection
//! cannot stack overlapping attempts.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct ReconnectScheduler {
    /// `None` disables reconnection entirely
    interval: Option<Duration>,

    /// Cleared only by an explicit disconnect
    enabled: bool,

    due: Option<Instant>,
}

impl ReconnectScheduler {
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            interval,
            enabled: true,
            due: None,
        }
    }

    /// Arms the timer after a disconnection
    ///
    /// Returns the deadline of the pending attempt, if any.
    pub fn schedule(&mut self, now: Instant) -> Option<Instant> {
        if !self.enabled {
            return None;
        }
        let interval = self.interval?;
        Some(*self.due.get_or_insert(now + interval))
    }

    /// Consumes the timer if it has fired
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.due {
            Some(deadline) if deadline <= now => {
                self.due = None;
                self.enabled
            }
            _ => false,
        }
    }

    /// Drops the pending timer, if any
    pub fn cancel(&mut self) {
        self.due = None;
    }

    /// Explicit disconnect: no further attempts until re-enabled
    pub fn disable(&mut self) {
        self.enabled = false;
        self.due = None;
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && self.interval.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.due
    }
}
