//! Outbound position update gate

use std::time::{Duration, Instant};

/// Default spacing between outgoing position updates
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_millis(100);

/// "Don't send if less than `interval` since the last send." Not a queue:
/// a refused update is simply superseded by the next one.
#[derive(Debug, Clone)]
pub struct UpdateThrottle {
    interval: Duration,
    last_sent: Option<Instant>,
}

impl UpdateThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
        }
    }

    /// Claim the send slot at `now`. Returns false while the gate is closed.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        let open = match self.last_sent {
            Some(last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        };
        if open {
            self.last_sent = Some(now);
        }
        open
    }

    /// Forget the last send, e.g. after a reconnect
    pub fn reset(&mut self) {
        self.last_sent = None;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for UpdateThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_UPDATE_INTERVAL)
    }
}
