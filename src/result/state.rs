// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::result::{Outcome, Status};
use core::mem;
use core::task::{Context, Poll, Waker};
use core::time::Duration;
use std::sync::{Condvar, Mutex};
use std::time::Instant;

/// The one-slot asynchronous value shared between a producer and a consumer.
///
/// The state moves `Empty → Ready → Taken`; the producer drives the first
/// transition exactly once, the consumer the second. While `Empty`, at most
/// one continuation (a [`Waker`] or a boxed callback) may be armed; the
/// producer fires it after publishing, *outside* the internal lock, so a
/// continuation may itself touch this or other states freely.
///
/// Blocking consumers park on the internal condvar instead of arming
/// anything.
pub(crate) struct ResultState<T> {
    inner: Mutex<Inner<T>>,
    on_ready: Condvar,
}

struct Inner<T> {
    slot: Slot<T>,
    consumer: Consumer,
}

enum Slot<T> {
    /// Nothing produced yet.
    Empty,
    /// An outcome has been published but not yet claimed.
    Ready(Outcome<T>),
    /// The outcome has been moved out by the consumer.
    Taken,
}

enum Consumer {
    None,
    /// A suspended future waiting to be woken.
    Waker(Waker),
    /// A composition continuation (`when_all`/`when_any`, `SharedResult`).
    Callback(Box<dyn FnOnce() + Send>),
}

/// Whether arming a continuation actually registered it, or the state was
/// already complete and the caller must act on the outcome itself.
#[derive(Debug, Eq, PartialEq)]
pub(crate) enum ArmResult {
    Armed,
    AlreadyReady,
}

// === impl ResultState ===

impl<T> ResultState<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                slot: Slot::Empty,
                consumer: Consumer::None,
            }),
            on_ready: Condvar::new(),
        }
    }

    /// Publishes the outcome. The producer side must call this exactly once.
    pub(crate) fn complete(&self, outcome: Outcome<T>) {
        let published = self.try_complete(outcome);
        debug_assert!(published, "result state completed twice");
    }

    /// Publishes the outcome unless one was already published; returns
    /// whether this call won.
    ///
    /// Used on racy producer paths (a driver's poll task completing
    /// concurrently with a stale queued copy being cancelled).
    pub(crate) fn try_complete(&self, outcome: Outcome<T>) -> bool {
        let consumer = {
            let mut inner = self.inner.lock().unwrap();
            if !matches!(inner.slot, Slot::Empty) {
                return false;
            }
            inner.slot = Slot::Ready(outcome);
            mem::replace(&mut inner.consumer, Consumer::None)
        };

        self.on_ready.notify_all();

        match consumer {
            Consumer::None => {}
            Consumer::Waker(waker) => waker.wake(),
            Consumer::Callback(callback) => callback(),
        }

        true
    }

    pub(crate) fn status(&self) -> Status {
        match &self.inner.lock().unwrap().slot {
            Slot::Empty => Status::Idle,
            Slot::Ready(Ok(_)) => Status::Value,
            Slot::Ready(Err(_)) => Status::Error,
            Slot::Taken => panic!("result already consumed"),
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        !matches!(self.inner.lock().unwrap().slot, Slot::Empty)
    }

    /// Blocks the calling thread until an outcome is published.
    pub(crate) fn wait(&self) {
        let mut inner = self.inner.lock().unwrap();
        while matches!(inner.slot, Slot::Empty) {
            inner = self.on_ready.wait(inner).unwrap();
        }
    }

    /// Blocks until an outcome is published or `deadline` passes, returning
    /// the status at wakeup. An already-elapsed deadline degenerates to a
    /// plain status query.
    pub(crate) fn wait_until(&self, deadline: Instant) -> Status {
        let mut inner = self.inner.lock().unwrap();
        loop {
            match &inner.slot {
                Slot::Empty => {}
                Slot::Ready(Ok(_)) => return Status::Value,
                Slot::Ready(Err(_)) => return Status::Error,
                Slot::Taken => panic!("result already consumed"),
            }

            let Some(timeout) = deadline.checked_duration_since(Instant::now()).filter(|d| !d.is_zero()) else {
                return Status::Idle;
            };
            (inner, _) = self.on_ready.wait_timeout(inner, timeout).unwrap();
        }
    }

    pub(crate) fn wait_for(&self, timeout: Duration) -> Status {
        self.wait_until(Instant::now() + timeout)
    }

    /// Moves the published outcome out of the state.
    ///
    /// # Panics
    ///
    /// Panics if no outcome has been published, or if it was already taken.
    pub(crate) fn take_outcome(&self) -> Outcome<T> {
        let mut inner = self.inner.lock().unwrap();
        match mem::replace(&mut inner.slot, Slot::Taken) {
            Slot::Ready(outcome) => outcome,
            Slot::Empty => panic!("result taken before completion"),
            Slot::Taken => panic!("result already consumed"),
        }
    }

    /// Consumer poll that claims the outcome once ready, arming the waker
    /// otherwise.
    pub(crate) fn poll_take(&self, cx: &mut Context<'_>) -> Poll<Outcome<T>> {
        let mut inner = self.inner.lock().unwrap();
        match &inner.slot {
            Slot::Ready(_) => {
                let Slot::Ready(outcome) = mem::replace(&mut inner.slot, Slot::Taken) else {
                    unreachable!()
                };
                Poll::Ready(outcome)
            }
            Slot::Taken => panic!("result polled after completion"),
            Slot::Empty => {
                inner.consumer = Consumer::Waker(cx.waker().clone());
                Poll::Pending
            }
        }
    }

    /// Consumer poll that leaves the outcome in place (the `resolve` mode).
    pub(crate) fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<()> {
        let mut inner = self.inner.lock().unwrap();
        if matches!(inner.slot, Slot::Empty) {
            inner.consumer = Consumer::Waker(cx.waker().clone());
            Poll::Pending
        } else {
            Poll::Ready(())
        }
    }

    /// Arms `callback` to fire once an outcome is published.
    ///
    /// If the state is already complete the callback is *not* stored and
    /// [`ArmResult::AlreadyReady`] is returned; the caller reacts directly.
    /// At most one consumer may be armed at a time.
    pub(crate) fn arm_callback(&self, callback: Box<dyn FnOnce() + Send>) -> ArmResult {
        let mut inner = self.inner.lock().unwrap();
        if !matches!(inner.slot, Slot::Empty) {
            return ArmResult::AlreadyReady;
        }
        debug_assert!(
            matches!(inner.consumer, Consumer::None),
            "result state already has an armed consumer"
        );
        inner.consumer = Consumer::Callback(callback);
        ArmResult::Armed
    }

    /// Atomically returns the continuation slot to empty, if and only if the
    /// producer has not yet observed it.
    ///
    /// Returns `true` if a continuation was deregistered. Used by `when_any`
    /// to detach the losing inputs.
    pub(crate) fn try_rewind_consumer(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if matches!(inner.slot, Slot::Empty) && !matches!(inner.consumer, Consumer::None) {
            inner.consumer = Consumer::None;
            true
        } else {
            false
        }
    }
}
