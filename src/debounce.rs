//! Rate limiting for glasses frames.
//!
//! Interim frames are held to one write per delay window, coalescing to the
//! latest; finals always go out immediately and cancel anything pending. The
//! debouncer is a pure state machine over `Instant` — the session worker polls
//! [`Debouncer::deadline`] in its select loop, which makes cancellation
//! race-free by construction.

use std::time::Duration;

use tokio::time::Instant;

/// Per-session glasses write debouncer.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    last_sent: Option<Instant>,
    pending: Option<String>,
    deadline: Option<Instant>,
}

impl Debouncer {
    /// Create a debouncer with the given minimum interim gap.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_sent: None,
            pending: None,
            deadline: None,
        }
    }

    /// Record a final write. Finals are never deferred; any pending interim
    /// is dropped (the final supersedes it).
    pub fn record_final(&mut self, now: Instant) {
        self.pending = None;
        self.deadline = None;
        self.last_sent = Some(now);
    }

    /// Offer an interim frame.
    ///
    /// Returns the frame when it may be written immediately; otherwise stores
    /// it (replacing any previously pending frame) and returns `None`.
    pub fn offer_interim(&mut self, frame: String, now: Instant) -> Option<String> {
        let due = self
            .last_sent
            .is_none_or(|last| now.saturating_duration_since(last) >= self.delay);
        if due {
            self.pending = None;
            self.deadline = None;
            self.last_sent = Some(now);
            return Some(frame);
        }
        if self.deadline.is_none() {
            // One reschedulable slot: later interims replace the frame but
            // keep the original deadline.
            self.deadline = self.last_sent.map(|last| last + self.delay);
        }
        self.pending = Some(frame);
        None
    }

    /// Deadline of the pending frame, if one is scheduled.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Take the pending frame once its deadline has passed.
    ///
    /// Firing with nothing pending is a no-op, so a stale timer wakeup after
    /// cancellation cannot double-send. The flush is the window's trailing
    /// write: it does not move `last_sent`, so an interim arriving a full
    /// window after the last immediate send still goes out directly.
    pub fn fire(&mut self, now: Instant) -> Option<String> {
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }
        self.deadline = None;
        self.pending.take()
    }

    /// Drop all state (session stop).
    pub fn clear(&mut self) {
        self.last_sent = None;
        self.pending = None;
        self.deadline = None;
    }
}
