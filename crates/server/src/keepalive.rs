//! Per-session liveness monitor
//!
//! Every `interval` the monitor issues a probe carrying a fresh random
//! token. The session must echo the token before `timeout` elapses or it is
//! destroyed. At most one probe is outstanding: an interval tick that finds
//! a probe still unanswered does not issue another.

use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

/// What the session should do when the monitor's deadline fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeepAliveAction {
    /// Send a probe with this token
    Probe(String),

    /// The outstanding probe went unanswered
    Expired,
}

#[derive(Debug, Clone)]
struct PendingPing {
    token: String,
    deadline: Instant,
}

#[derive(Debug, Clone)]
pub struct KeepAliveMonitor {
    interval: Duration,
    timeout: Duration,
    next_probe: Instant,
    outstanding: Option<PendingPing>,
}

impl KeepAliveMonitor {
    /// Starts monitoring; the first probe goes out one interval from `now`
    pub fn new(interval: Duration, timeout: Duration, now: Instant) -> Self {
        Self {
            interval,
            timeout,
            next_probe: now + interval,
            outstanding: None,
        }
    }

    /// When `poll` next needs to run
    pub fn deadline(&self) -> Instant {
        match &self.outstanding {
            Some(ping) => ping.deadline.min(self.next_probe),
            None => self.next_probe,
        }
    }

    /// Advances the monitor to `now`
    pub fn poll(&mut self, now: Instant) -> Option<KeepAliveAction> {
        if let Some(ping) = &self.outstanding {
            if ping.deadline <= now {
                tracing::debug!(token = %ping.token, "Keepalive probe expired");
                self.outstanding = None;
                return Some(KeepAliveAction::Expired);
            }
        }

        if self.next_probe > now {
            return None;
        }
        self.next_probe = now + self.interval;

        if self.outstanding.is_some() {
            return None;
        }

        let token = Uuid::new_v4().to_string();
        self.outstanding = Some(PendingPing {
            token: token.clone(),
            deadline: now + self.timeout,
        });
        Some(KeepAliveAction::Probe(token))
    }

    /// Clears the outstanding probe if `token` matches it
    pub fn acknowledge(&mut self, token: &str) -> bool {
        match &self.outstanding {
            Some(ping) if ping.token == token => {
                self.outstanding = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.outstanding.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(100);
    const TIMEOUT: Duration = Duration::from_millis(50);

    fn probe_token(action: Option<KeepAliveAction>) -> String {
        match action {
            Some(KeepAliveAction::Probe(token)) => token,
            other => panic!("Expected probe, got {:?}", other),
        }
    }

    #[test]
    fn test_first_probe_after_one_interval() {
        let start = Instant::now();
        let mut monitor = KeepAliveMonitor::new(INTERVAL, TIMEOUT, start);

        assert_eq!(monitor.deadline(), start + INTERVAL);
        assert_eq!(monitor.poll(start + INTERVAL / 2), None);

        probe_token(monitor.poll(start + INTERVAL));
        assert!(monitor.is_waiting());
        assert_eq!(monitor.deadline(), start + INTERVAL + TIMEOUT);
    }

    #[test]
    fn test_acknowledged_probe_never_expires() {
        let start = Instant::now();
        let mut monitor = KeepAliveMonitor::new(INTERVAL, TIMEOUT, start);

        let token = probe_token(monitor.poll(start + INTERVAL));
        assert!(monitor.acknowledge(&token));
        assert!(!monitor.is_waiting());

        assert_eq!(monitor.poll(start + INTERVAL + TIMEOUT), None);
        let next = probe_token(monitor.poll(start + INTERVAL * 2));
        assert_ne!(next, token);
    }

    #[test]
    fn test_unanswered_probe_expires() {
        let start = Instant::now();
        let mut monitor = KeepAliveMonitor::new(INTERVAL, TIMEOUT, start);

        probe_token(monitor.poll(start + INTERVAL));
        assert_eq!(
            monitor.poll(start + INTERVAL + TIMEOUT),
            Some(KeepAliveAction::Expired)
        );
    }

    #[test]
    fn test_wrong_token_is_not_an_ack() {
        let start = Instant::now();
        let mut monitor = KeepAliveMonitor::new(INTERVAL, TIMEOUT, start);

        probe_token(monitor.poll(start + INTERVAL));
        assert!(!monitor.acknowledge("not-the-token"));
        assert!(monitor.is_waiting());
    }

    #[test]
    fn test_single_probe_outstanding() {
        // timeout longer than the interval
        let start = Instant::now();
        let mut monitor = KeepAliveMonitor::new(INTERVAL, INTERVAL * 3, start);

        let token = probe_token(monitor.poll(start + INTERVAL));
        assert_eq!(monitor.poll(start + INTERVAL * 2), None);
        assert!(monitor.acknowledge(&token));
    }
}
