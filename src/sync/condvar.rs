// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::error::TaskError;
use crate::executor::Executor;
use crate::result::state::ResultState;
use crate::result::{AsyncResult, Outcome};
use crate::sync::ScopedAsyncLock;
use crate::task::Task;
use core::fmt;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A condition variable for coroutines holding an
/// [`AsyncLock`][crate::sync::AsyncLock].
///
/// Waiting releases the caller's guard and suspends; a notification wakes the
/// waiter on the resume executor it supplied, where it re-acquires the lock
/// before returning. Notification order is first-in-first-out.
pub struct AsyncCondVar {
    waiters: Mutex<VecDeque<Waiter>>,
}

struct Waiter {
    state: Arc<ResultState<()>>,
    resume: Arc<dyn Executor>,
}

// === impl AsyncCondVar ===

impl AsyncCondVar {
    #[must_use]
    pub fn new() -> Self {
        Self {
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    /// Releases `guard` and suspends until notified, then re-acquires the
    /// lock on `resume_executor` before returning.
    ///
    /// On return the guard owns the lock again, even if the wait itself
    /// failed (unless the re-acquisition failed too, in which case the error
    /// is the re-acquisition's).
    ///
    /// # Panics
    ///
    /// Panics if `guard` does not own its lock.
    pub async fn wait(
        &self,
        resume_executor: &Arc<dyn Executor>,
        guard: &mut ScopedAsyncLock,
    ) -> Outcome<()> {
        assert!(
            guard.owns_lock(),
            "async condition variable waited on with an unlocked guard"
        );

        let state = Arc::new(ResultState::new());
        // register before unlocking so a notify racing with the release
        // cannot be lost
        self.waiters.lock().unwrap().push_back(Waiter {
            state: state.clone(),
            resume: resume_executor.clone(),
        });

        guard.unlock();

        let wait_outcome = AsyncResult::from_state(state).await;
        guard.lock(resume_executor).await?;
        wait_outcome
    }

    /// The predicate form of [`wait`][AsyncCondVar::wait]: loops
    /// unlock-suspend-relock until `predicate` returns true under the lock.
    ///
    /// # Panics
    ///
    /// Panics if `guard` does not own its lock.
    pub async fn wait_until<P>(
        &self,
        resume_executor: &Arc<dyn Executor>,
        guard: &mut ScopedAsyncLock,
        mut predicate: P,
    ) -> Outcome<()>
    where
        P: FnMut() -> bool,
    {
        while !predicate() {
            self.wait(resume_executor, guard).await?;
        }
        Ok(())
    }

    /// Wakes the longest-waiting coroutine, if any.
    ///
    /// A waiter whose resume executor has shut down observes a broken-task
    /// error; the notification then falls through to the next waiter so it
    /// is never lost.
    pub fn notify_one(&self) {
        loop {
            let Some(waiter) = self.waiters.lock().unwrap().pop_front() else {
                return;
            };
            if Self::wake(waiter) {
                return;
            }
        }
    }

    /// Wakes every waiting coroutine.
    pub fn notify_all(&self) {
        let drained = std::mem::take(&mut *self.waiters.lock().unwrap());
        for waiter in drained {
            // failures already broke their waiter, nothing to fall back to
            let _ = Self::wake(waiter);
        }
    }

    fn wake(waiter: Waiter) -> bool {
        let task = {
            let state = waiter.state.clone();
            let cancel_state = waiter.state.clone();
            Task::with_cancel(
                move || state.complete(Ok(())),
                move |reason| {
                    cancel_state.try_complete(Err(TaskError::Broken(reason)));
                },
            )
        };

        waiter.resume.enqueue(task).is_ok()
    }
}

impl Default for AsyncCondVar {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AsyncCondVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCondVar")
            .field("waiters", &self.waiters.lock().unwrap().len())
            .finish()
    }
}
