//! Admission control for provider attempts.
//!
//! A sliding-window counter: every granted attempt leaves its timestamp in a
//! deque, and a new attempt is admitted only while fewer than `ceiling`
//! timestamps are younger than the window. Refusal is immediate; callers get a
//! `rate_limited` outcome instead of waiting.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

use crate::time::{Clock, TokioClock};

/// Length of the rolling admission window.
pub const ADMISSION_WINDOW: Duration = Duration::from_millis(1000);

/// Upper bound on the grant buffer reserved at construction.
const PREALLOCATED_GRANTS: usize = 1024;

/// Sliding-window limiter on provider attempts, shared by every send it covers.
pub struct AdmissionGate {
    ceiling: usize,
    window: Duration,
    /// Grant timestamps, oldest first. Never longer than `ceiling`.
    granted: Mutex<VecDeque<Instant>>,
    clock: Arc<dyn Clock>,
}

impl AdmissionGate {
    /// Gate admitting at most `ceiling` attempts per rolling second.
    pub fn new(ceiling: u32) -> Self {
        Self::with_clock(ceiling, Arc::new(TokioClock))
    }

    /// Gate reading time from `clock`.
    pub fn with_clock(ceiling: u32, clock: Arc<dyn Clock>) -> Self {
        Self::with_window(ceiling, ADMISSION_WINDOW, clock)
    }

    /// Gate with a custom window length.
    pub fn with_window(ceiling: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        let ceiling = ceiling as usize;
        Self {
            ceiling,
            window,
            granted: Mutex::new(VecDeque::with_capacity(ceiling.min(PREALLOCATED_GRANTS))),
            clock,
        }
    }

    /// Try to admit one attempt.
    ///
    /// The lock is held only for the eviction and the push; it is never held
    /// across a provider call.
    pub fn allow(&self) -> bool {
        let now = self.clock.now();
        let mut granted = self.granted.lock();
        Self::evict_expired(&mut granted, now, self.window);

        if granted.len() < self.ceiling {
            granted.push_back(now);
            true
        } else {
            trace!(ceiling = self.ceiling, "admission refused");
            false
        }
    }

    /// Attempts that would currently be admitted.
    pub fn available(&self) -> usize {
        let now = self.clock.now();
        let mut granted = self.granted.lock();
        Self::evict_expired(&mut granted, now, self.window);
        self.ceiling - granted.len()
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    fn evict_expired(granted: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = granted.front() {
            if now.saturating_duration_since(*oldest) >= window {
                granted.pop_front();
            } else {
                break;
            }
        }
    }
}

impl std::fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("ceiling", &self.ceiling)
            .field("window", &self.window)
            .field("in_window", &self.granted.lock().len())
            .finish()
    }
}
