//! Sliding-window occupancy tracking.
//!
//! The throttle keeps one window per key. Timestamps outside the window are
//! logically expired as soon as "now" moves past them; physical removal
//! happens lazily on access and during background cleanup.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Timestamps observed within a sliding window of fixed length.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    window: Duration,
    timestamps: VecDeque<Instant>,
}

impl SlidingWindow {
    /// Create an empty window of the given length.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            timestamps: VecDeque::new(),
        }
    }

    /// Remove timestamps that have fallen out of the window.
    pub fn purge(&mut self, now: Instant) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Purge, then admit the event if occupancy is below `max_rate`.
    ///
    /// Returns `true` (and records `now`) when the event fits in the window,
    /// `false` otherwise. Rejected events are not recorded, so an at-capacity
    /// window drains as time moves forward rather than being pushed ever
    /// further into the future by rejected traffic.
    pub fn try_admit(&mut self, now: Instant, max_rate: usize) -> bool {
        self.purge(now);
        if self.timestamps.len() < max_rate {
            self.timestamps.push_back(now);
            true
        } else {
            false
        }
    }

    /// Number of timestamps currently stored, including ones that may have
    /// logically expired since the last purge.
    pub fn occupancy(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether the window holds no timestamps.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}
