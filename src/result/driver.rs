// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::loom::sync::atomic::{AtomicU8, Ordering};
use crate::result::state::ResultState;
use crate::result::{Outcome, run_catching};
use core::pin::Pin;
use core::task::{Context, Poll};
use futures::task::{ArcWake, waker_ref};
use std::sync::{Arc, Mutex};

/// Drives a future to completion, publishing its output to a [`ResultState`].
///
/// The driver *is* the future's waker: whichever thread wakes it polls the
/// future right there. A future spawned onto an executor therefore runs its
/// first poll on that executor and every subsequent segment on the thread
/// that completed whatever it was awaiting, mirroring the inline-resumption
/// discipline of the rest of the crate. `resume_on` is the escape hatch that
/// moves a coroutine onto a specific executor.
pub(crate) struct Driver<T> {
    future: Mutex<Option<Pin<Box<dyn Future<Output = Outcome<T>> + Send>>>>,
    state: Arc<ResultState<T>>,
    /// Scheduling state; see the `SCHED_*` constants.
    sched: AtomicU8,
}

/// No poll in progress; a wake must claim the poll itself.
const SCHED_IDLE: u8 = 0;
/// Some thread is inside `poll`; a wake records itself via `SCHED_REPOLL`.
const SCHED_POLLING: u8 = 1;
/// A wake arrived during a poll; the polling thread loops again.
const SCHED_REPOLL: u8 = 2;
/// The future has completed (or panicked); wakes are ignored.
const SCHED_DONE: u8 = 3;

// === impl Driver ===

impl<T: Send + 'static> Driver<T> {
    pub(crate) fn new(
        future: impl Future<Output = Outcome<T>> + Send + 'static,
        state: Arc<ResultState<T>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            future: Mutex::new(Some(Box::pin(future))),
            state,
            sched: AtomicU8::new(SCHED_IDLE),
        })
    }

    pub(crate) fn state(&self) -> &Arc<ResultState<T>> {
        &self.state
    }

    /// Polls the driven future on the calling thread.
    ///
    /// Exactly one thread polls at a time; concurrent wakes are coalesced
    /// into a single re-poll through the scheduling word, so no wakeup is
    /// ever lost and the future's `&mut` access is never contended.
    pub(crate) fn poll_now(this: &Arc<Self>) {
        // claim the right to poll
        loop {
            match this.sched.load(Ordering::Acquire) {
                SCHED_IDLE => {
                    if this
                        .sched
                        .compare_exchange(
                            SCHED_IDLE,
                            SCHED_POLLING,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        break;
                    }
                }
                SCHED_POLLING => {
                    if this
                        .sched
                        .compare_exchange(
                            SCHED_POLLING,
                            SCHED_REPOLL,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        // the current poller will notice and loop
                        return;
                    }
                }
                _ => return,
            }
        }

        loop {
            // uncontended: only the `SCHED_POLLING` owner ever locks this
            let mut slot = this.future.lock().unwrap();
            let Some(future) = slot.as_mut() else {
                this.sched.store(SCHED_DONE, Ordering::Release);
                return;
            };

            let waker = waker_ref(this);
            let mut cx = Context::from_waker(&waker);

            match run_catching(|| future.as_mut().poll(&mut cx)) {
                Ok(Poll::Ready(outcome)) => {
                    *slot = None;
                    drop(slot);
                    this.sched.store(SCHED_DONE, Ordering::Release);
                    // a queued shutdown cancellation may already have broken
                    // the state, hence `try_`
                    this.state.try_complete(outcome);
                    return;
                }
                Ok(Poll::Pending) => {
                    drop(slot);
                    match this.sched.compare_exchange(
                        SCHED_POLLING,
                        SCHED_IDLE,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return,
                        // a wake arrived while we were polling
                        Err(_) => {
                            this.sched.store(SCHED_POLLING, Ordering::Release);
                        }
                    }
                }
                Err(error) => {
                    *slot = None;
                    drop(slot);
                    this.sched.store(SCHED_DONE, Ordering::Release);
                    this.state.try_complete(Err(error));
                    return;
                }
            }
        }
    }
}

impl<T: Send + 'static> ArcWake for Driver<T> {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        Driver::poll_now(arc_self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::AsyncResult;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::task::Waker;

    fn driven<T: Send + 'static>(
        future: impl Future<Output = Outcome<T>> + Send + 'static,
    ) -> (Arc<Driver<T>>, AsyncResult<T>) {
        let state = Arc::new(ResultState::new());
        let driver = Driver::new(future, state.clone());
        (driver, AsyncResult::from_state(state))
    }

    #[test]
    fn completes_synchronously_ready_futures() {
        let (driver, result) = driven(async { Ok(123) });
        Driver::poll_now(&driver);
        assert_eq!(result.get().unwrap(), 123);
    }

    #[test]
    fn captures_future_panics() {
        let (driver, result) = driven::<u32>(async { panic!("future exploded") });
        Driver::poll_now(&driver);
        assert!(result.get().unwrap_err().is_panic());
    }

    #[test]
    fn wake_resumes_on_the_waking_thread() {
        struct YieldOnce {
            woken: bool,
            waker_slot: Arc<Mutex<Option<Waker>>>,
        }
        impl Future for YieldOnce {
            type Output = Outcome<std::thread::ThreadId>;

            fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
                if self.woken {
                    Poll::Ready(Ok(std::thread::current().id()))
                } else {
                    self.woken = true;
                    *self.waker_slot.lock().unwrap() = Some(cx.waker().clone());
                    Poll::Pending
                }
            }
        }

        let waker_slot = Arc::new(Mutex::new(None));
        let (driver, result) = driven(YieldOnce {
            woken: false,
            waker_slot: waker_slot.clone(),
        });
        Driver::poll_now(&driver);

        let waker: Waker = waker_slot.lock().unwrap().take().unwrap();
        let handle = std::thread::spawn(move || {
            let id = std::thread::current().id();
            waker.wake();
            id
        });

        let waking_thread = handle.join().unwrap();
        assert_eq!(result.get().unwrap(), waking_thread);
    }

    #[test]
    fn self_wake_during_poll_triggers_repoll() {
        struct SelfWake {
            polls: Arc<AtomicUsize>,
        }
        impl Future for SelfWake {
            type Output = Outcome<usize>;

            fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
                let polls = self.polls.fetch_add(1, Ordering::Relaxed);
                if polls >= 2 {
                    Poll::Ready(Ok(polls))
                } else {
                    cx.waker().wake_by_ref();
                    Poll::Pending
                }
            }
        }

        let polls = Arc::new(AtomicUsize::new(0));
        let (driver, result) = driven(SelfWake {
            polls: polls.clone(),
        });
        Driver::poll_now(&driver);
        assert_eq!(result.get().unwrap(), 2);
        assert_eq!(polls.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn concurrent_wakes_complete_exactly_once() {
        crate::loom::model(|| {
            struct WaitForFlag {
                flag: Arc<AtomicBool>,
                waker_slot: Arc<Mutex<Option<Waker>>>,
            }
            impl Future for WaitForFlag {
                type Output = Outcome<u32>;

                fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
                    if self.flag.load(Ordering::Acquire) {
                        Poll::Ready(Ok(7))
                    } else {
                        *self.waker_slot.lock().unwrap() = Some(cx.waker().clone());
                        Poll::Pending
                    }
                }
            }

            let flag = Arc::new(AtomicBool::new(false));
            let waker_slot = Arc::new(Mutex::new(None));
            let (driver, result) = driven(WaitForFlag {
                flag: flag.clone(),
                waker_slot: waker_slot.clone(),
            });
            Driver::poll_now(&driver);

            let waker: Waker = waker_slot.lock().unwrap().take().unwrap();
            flag.store(true, Ordering::Release);

            let a = {
                let waker = waker.clone();
                crate::loom::thread::spawn(move || waker.wake())
            };
            let b = crate::loom::thread::spawn(move || waker.wake());

            a.join().unwrap();
            b.join().unwrap();

            assert_eq!(result.get().unwrap(), 7);
        });
    }
}
