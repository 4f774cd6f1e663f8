// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::error::{ShutdownError, TaskError};
use crate::executor::Executor;
use crate::loom::sync::atomic::{AtomicBool, Ordering};
use crate::result::AsyncResult;
use crate::result::state::ResultState;
use crate::runtime::ThreadCallbacks;
use crate::task::Task;
use crate::time::{Timer, TimerFire, TimerState};
use core::time::Duration;
use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Instant;

pub(crate) const NAME: &str = "weft::timer_queue";
const CANCEL_REASON: &str = "weft::timer_queue was shut down";

/// A deadline-ordered timer scheduler backed by one dedicated worker thread.
///
/// The worker sleeps until the nearest deadline (or until poked by an
/// insertion with an earlier deadline, a cancellation, or shutdown), fires
/// every timer whose deadline has passed by enqueueing its callback on the
/// timer's executor, advances periodic timers by their frequency, and drops
/// expired one-shots. The worker thread is started lazily by the first
/// registration.
///
/// Timer callbacks never run on the queue's own thread, so a slow callback
/// cannot delay other timers by more than one executor-queue transit.
pub struct TimerQueue {
    inner: Arc<QueueInner>,
}

pub(crate) struct QueueInner {
    core: Mutex<QueueCore>,
    cond: Condvar,
    shutdown: AtomicBool,
    callbacks: ThreadCallbacks,
}

struct QueueCore {
    /// Registered timers keyed by absolute fire time (the id breaks ties).
    timers: BTreeMap<(Instant, u64), Arc<TimerState>>,
    next_id: u64,
    worker: Option<thread::JoinHandle<()>>,
    shutdown: bool,
}

// === impl TimerQueue ===

impl TimerQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::with_callbacks(ThreadCallbacks::default())
    }

    pub(crate) fn with_callbacks(callbacks: ThreadCallbacks) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                core: Mutex::new(QueueCore {
                    timers: BTreeMap::new(),
                    next_id: 0,
                    worker: None,
                    shutdown: false,
                }),
                cond: Condvar::new(),
                shutdown: AtomicBool::new(false),
                callbacks,
            }),
        }
    }

    /// Registers a periodic timer: first fires after `due`, then every
    /// `frequency`, scheduling `callback` on `executor` each time.
    ///
    /// # Errors
    ///
    /// Fails if the queue has been shut down.
    pub fn make_timer<F>(
        &self,
        due: Duration,
        frequency: Duration,
        executor: &Arc<dyn Executor>,
        callback: F,
    ) -> Result<Timer, ShutdownError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.register(
            TimerFire::Callback(Arc::new(callback)),
            executor,
            due,
            frequency,
            false,
        )
        .map(Timer::new)
    }

    /// Registers a timer that fires exactly once, after `due`.
    ///
    /// # Errors
    ///
    /// Fails if the queue has been shut down.
    pub fn make_one_shot_timer<F>(
        &self,
        due: Duration,
        executor: &Arc<dyn Executor>,
        callback: F,
    ) -> Result<Timer, ShutdownError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.register(
            TimerFire::Callback(Arc::new(callback)),
            executor,
            due,
            Duration::ZERO,
            true,
        )
        .map(Timer::new)
    }

    /// Returns a result that completes (on `executor`) once `due` has
    /// elapsed.
    ///
    /// If the queue shuts down first, the result observes a broken-task
    /// error instead.
    ///
    /// # Errors
    ///
    /// Fails if the queue has already been shut down.
    pub fn make_delay_object(
        &self,
        due: Duration,
        executor: &Arc<dyn Executor>,
    ) -> Result<AsyncResult<()>, ShutdownError> {
        let state = Arc::new(ResultState::new());
        let timer_state = self.register(
            TimerFire::Delay(state.clone()),
            executor,
            due,
            Duration::ZERO,
            true,
        )?;

        // the delay object has no user-facing handle; keep it alive through
        // the queue instead of a `Timer` whose drop would cancel it
        drop(timer_state);
        Ok(AsyncResult::from_state(state))
    }

    /// Shuts the queue down: stops and joins the worker, breaks pending
    /// delay objects, and refuses further registrations. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Whether [`shutdown`][TimerQueue::shutdown] has been requested.
    #[must_use]
    pub fn shutdown_requested(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    fn register(
        &self,
        fire: TimerFire,
        executor: &Arc<dyn Executor>,
        due: Duration,
        frequency: Duration,
        oneshot: bool,
    ) -> Result<Arc<TimerState>, ShutdownError> {
        let state = Arc::new(TimerState {
            fire,
            executor: executor.clone(),
            queue: Arc::downgrade(&self.inner),
            due,
            frequency,
            oneshot,
            cancelled: AtomicBool::new(false),
        });

        let deadline = Instant::now() + due;

        let mut core = self.inner.core.lock().unwrap();
        if core.shutdown {
            return Err(ShutdownError(NAME));
        }

        let id = core.next_id;
        core.next_id += 1;

        let wake = match core.timers.first_key_value() {
            // only poke the worker if the new deadline is the nearest
            Some((&(first, _), _)) => deadline < first,
            None => true,
        };

        core.timers.insert((deadline, id), state.clone());

        if core.worker.is_none() {
            let inner = self.inner.clone();
            core.worker = Some(
                thread::Builder::new()
                    .name(NAME.into())
                    .spawn(move || inner.work_loop())
                    .expect("failed to spawn timer queue thread"),
            );
        } else if wake {
            self.inner.cond.notify_all();
        }

        drop(core);
        Ok(state)
    }
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimerQueue {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

// === impl QueueInner ===

impl QueueInner {
    /// Wakes the worker so it re-examines the nearest deadline.
    pub(crate) fn poke(&self) {
        self.cond.notify_all();
    }

    fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        let (worker, drained) = {
            let mut core = self.core.lock().unwrap();
            core.shutdown = true;
            (core.worker.take(), std::mem::take(&mut core.timers))
        };
        self.cond.notify_all();

        for state in drained.into_values() {
            state.cancelled.store(true, Ordering::Release);
            if let TimerFire::Delay(delay) = &state.fire {
                delay.try_complete(Err(TaskError::broken(CANCEL_REASON)));
            }
        }

        if let Some(worker) = worker {
            if worker.thread().id() == thread::current().id() {
                // shutdown from a timer callback running inline on the
                // worker; the loop exits on its own
            } else if worker.join().is_err() {
                tracing::error!("timer queue worker panicked before joining");
            }
        }

        tracing::debug!("timer queue shut down");
    }

    fn work_loop(self: Arc<Self>) {
        self.callbacks.thread_started(NAME);
        let _span = tracing::debug_span!("timer queue loop").entered();

        let mut core = self.core.lock().unwrap();
        while !core.shutdown {
            // reap cancelled timers at the head so they do not distort the
            // wait target
            while let Some((&key, state)) = core.timers.first_key_value() {
                if state.is_cancelled() {
                    core.timers.remove(&key);
                } else {
                    break;
                }
            }

            let Some((&(deadline, _), _)) = core.timers.first_key_value() else {
                core = self.cond.wait(core).unwrap();
                continue;
            };

            let now = Instant::now();
            let Some(timeout) = deadline.checked_duration_since(now).filter(|d| !d.is_zero())
            else {
                // fire everything that is due, outside the lock
                let mut due = Vec::new();
                while let Some((&key, _)) = core.timers.first_key_value() {
                    if key.0 <= now {
                        let state = core.timers.remove(&key).unwrap();
                        due.push((key, state));
                    } else {
                        break;
                    }
                }
                drop(core);

                let mut reinsert = Vec::new();
                for ((deadline, id), state) in due {
                    if state.is_cancelled() {
                        continue;
                    }
                    self.fire(&state);
                    if !state.oneshot {
                        reinsert.push(((deadline + state.frequency, id), state));
                    }
                }

                core = self.core.lock().unwrap();
                for (key, state) in reinsert {
                    core.timers.insert(key, state);
                }
                continue;
            };

            (core, _) = self.cond.wait_timeout(core, timeout).unwrap();
        }
        drop(core);

        self.callbacks.thread_stopped(NAME);
    }

    /// Hands one firing to the timer's executor.
    fn fire(&self, state: &Arc<TimerState>) {
        match &state.fire {
            TimerFire::Callback(callback) => {
                let callback = callback.clone();
                if let Err(error) = state.executor.enqueue(Task::new(move || callback())) {
                    tracing::warn!(%error, "timer callback rejected by its executor");
                }
            }
            TimerFire::Delay(delay) => {
                let complete = delay.clone();
                let cancel = delay.clone();
                let task = Task::with_cancel(
                    move || {
                        complete.try_complete(Ok(()));
                    },
                    move |reason| {
                        cancel.try_complete(Err(TaskError::Broken(reason)));
                    },
                );
                // a refused enqueue cancels the task, breaking the delay
                let _ = state.executor.enqueue(task);
            }
        }
    }
}
