//! Exponential backoff with jitter for the realtime reconnect policy
//!
//! Standalone and independently testable so the ±20% jitter law can be
//! checked without standing up a socket.

use std::time::Duration;

use rand::Rng;

const BASE: Duration = Duration::from_secs(1);
const FACTOR: u32 = 2;
const CAP: Duration = Duration::from_secs(30);
const JITTER_RATIO: f64 = 0.2;

/// Tracks reconnect attempt count and produces the next delay
#[derive(Debug, Default)]
pub struct Backoff {
    attempt: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self { attempt: 0 }
    }

    /// Next delay for the current attempt, then advances the attempt
    /// counter. Delay grows `base * factor^attempt`, capped, ±20% jitter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = Self::delay_for_attempt(self.attempt);
        self.attempt += 1;
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    fn delay_for_attempt(attempt: u32) -> Duration {
        let exponent = FACTOR.saturating_pow(attempt.min(16));
        let uncapped = BASE.saturating_mul(exponent);
        let base_delay = uncapped.min(CAP);

        let mut rng = rand::rng();
        let jitter_fraction: f64 = rng.random_range(-JITTER_RATIO..=JITTER_RATIO);
        let millis = base_delay.as_millis() as f64 * (1.0 + jitter_fraction);
        Duration::from_millis(millis.max(0.0) as u64)
    }
}
