// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::executor::Executor;
use crate::loom::sync::atomic::{AtomicBool, Ordering};
use crate::result::state::ResultState;
use core::fmt;
use core::time::Duration;
use std::sync::{Arc, Weak};

/// A handle to a timer registered on a [`TimerQueue`][crate::time::TimerQueue].
///
/// Dropping the handle cancels the timer; so does
/// [`cancel`][Timer::cancel], which is idempotent. A cancelled timer never
/// fires again, though a firing already handed to its executor may still run.
pub struct Timer {
    state: Option<Arc<TimerState>>,
}

/// What a timer does when its deadline passes.
pub(crate) enum TimerFire {
    /// Schedule the callback onto the timer's executor.
    Callback(Arc<dyn Fn() + Send + Sync>),
    /// Complete a delay-object result (on the timer's executor).
    Delay(Arc<ResultState<()>>),
}

pub(crate) struct TimerState {
    pub(crate) fire: TimerFire,
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) queue: Weak<super::queue::QueueInner>,
    pub(crate) due: Duration,
    pub(crate) frequency: Duration,
    pub(crate) oneshot: bool,
    pub(crate) cancelled: AtomicBool,
}

// === impl TimerState ===

impl TimerState {
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }

        // poke the queue so the worker reaps the entry promptly
        if let Some(queue) = self.queue.upgrade() {
            queue.poke();
        }
    }
}

// === impl Timer ===

impl Timer {
    pub(crate) fn new(state: Arc<TimerState>) -> Self {
        Self { state: Some(state) }
    }

    /// The delay between the timer's registration and its first firing.
    #[must_use]
    pub fn due_time(&self) -> Duration {
        self.state.as_ref().unwrap().due
    }

    /// The interval between consecutive firings; zero for one-shot timers.
    #[must_use]
    pub fn frequency(&self) -> Duration {
        self.state.as_ref().unwrap().frequency
    }

    /// Whether this timer fires at most once.
    #[must_use]
    pub fn is_one_shot(&self) -> bool {
        self.state.as_ref().unwrap().oneshot
    }

    /// Cancels the timer. Idempotent; the queue's worker discards the entry
    /// at its next sight of it.
    pub fn cancel(&self) {
        if let Some(state) = &self.state {
            state.cancel();
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.as_ref().unwrap();
        f.debug_struct("Timer")
            .field("due", &state.due)
            .field("frequency", &state.frequency)
            .field("one_shot", &state.oneshot)
            .field("cancelled", &state.is_cancelled())
            .finish()
    }
}
