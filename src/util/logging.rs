//! # Rate-Limited Logging
//!
//! A small throttle for log statements inside retry loops. The echo
//! responder re-arms the receiver once per second after a failure; without
//! throttling, a dead radio turns the journal into a wall of identical
//! warnings.

use std::time::{Duration, Instant};

/// Caps how many log statements a retry loop may emit per time window.
#[derive(Debug)]
pub struct LogThrottle {
    window: Duration,
    max_per_window: u32,
    allowed: u32,
    window_started: Instant,
}

impl LogThrottle {
    /// Allow at most `max_per_window` messages per `window`.
    pub fn new(window: Duration, max_per_window: u32) -> Self {
        Self {
            window,
            max_per_window,
            allowed: 0,
            window_started: Instant::now(),
        }
    }

    /// Whether the caller should log this occurrence. Opens a fresh window
    /// once the current one has elapsed.
    pub fn allow(&mut self) -> bool {
        if self.window_started.elapsed() >= self.window {
            self.window_started = Instant::now();
            self.allowed = 0;
        }
        if self.allowed < self.max_per_window {
            self.allowed += 1;
            true
        } else {
            false
        }
    }
}
