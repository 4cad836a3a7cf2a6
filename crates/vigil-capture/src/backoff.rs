//! Exponential reconnect backoff.

use std::time::Duration;

/// Infinite sequence of waits: `initial, initial*m, initial*m^2, ...` capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    multiplier: f64,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, multiplier: f64, max: Duration) -> Self {
        Self {
            next: initial.min(max),
            multiplier: multiplier.max(1.0),
            max,
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        let grown = current.as_secs_f64() * self.multiplier;
        self.next = if grown >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(grown)
        };
        Some(current)
    }
}
