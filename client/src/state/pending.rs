//! Pending indicator shared by every store operation.
//!
//! DESIGN
//! ======
//! The indicator is a tagged state rather than a bare flag: `Idle` before the
//! first call, `Pending(message)` while anything is in flight, `Done` once the
//! last in-flight call has finished. A counter tracks overlapping calls so a
//! fast call finishing early cannot clear the indicator under a slower one.
//! The message is always that of the most recently started call.
//!
//! Calls hold a [`PendingGuard`]; dropping it (normal return, early return,
//! or the future being dropped) is what ends the call.

#[cfg(test)]
#[path = "pending_test.rs"]
mod pending_test;

use std::sync::{Arc, Mutex, PoisonError};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum PendingState {
    #[default]
    Idle,
    Pending(String),
    Done,
}

impl PendingState {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Status text while pending.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Pending(message) => Some(message.as_str()),
            Self::Idle | Self::Done => None,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    in_flight: usize,
    state: PendingState,
}

#[derive(Debug, Default)]
pub struct PendingTracker {
    inner: Mutex<Inner>,
}

impl PendingTracker {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mark a call as started with `message` as the status text.
    #[must_use = "the call is pending only while the guard is alive"]
    pub fn begin(self: &Arc<Self>, message: &str) -> PendingGuard {
        let mut inner = self.lock();
        inner.in_flight += 1;
        inner.state = PendingState::Pending(message.to_owned());
        PendingGuard { tracker: Arc::clone(self) }
    }

    #[must_use]
    pub fn state(&self) -> PendingState {
        self.lock().state.clone()
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.lock().state.is_pending()
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    fn finish(&self) {
        let mut inner = self.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
        if inner.in_flight == 0 {
            inner.state = PendingState::Done;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Ends one pending call when dropped.
#[derive(Debug)]
pub struct PendingGuard {
    tracker: Arc<PendingTracker>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.tracker.finish();
    }
}
