use std::time::{Duration, Instant};

/// Trailing-edge debounce: fires once after `window` has passed with no new
/// events.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    last_event: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_event: None,
        }
    }

    pub fn record(&mut self, at: Instant) {
        self.last_event = Some(at);
    }

    pub fn is_pending(&self) -> bool {
        self.last_event.is_some()
    }

    /// True exactly once per burst, when the window has elapsed since the
    /// burst's last event.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.last_event {
            Some(last) if now.saturating_duration_since(last) >= self.window => {
                self.last_event = None;
                true
            }
            _ => false,
        }
    }
}
