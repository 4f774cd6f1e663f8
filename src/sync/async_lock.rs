// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::error::TaskError;
use crate::executor::Executor;
use crate::result::state::ResultState;
use crate::result::{AsyncResult, LazyResult, Outcome};
use crate::task::Task;
use core::fmt;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A cooperative mutex for coroutines.
///
/// Unlike a system mutex, acquiring a contended `AsyncLock` suspends the
/// calling coroutine instead of blocking a thread. Waiters are served
/// strictly first-in-first-out; on release, ownership is handed directly to
/// the longest-waiting coroutine, which resumes on the executor it supplied
/// when it tried to acquire.
///
/// `AsyncLock` is a cheap handle: clones refer to the same underlying lock,
/// which is how the lock travels into the futures that wait on it.
///
/// If a waiter's resume executor refuses the wake-up (it has shut down), that
/// waiter's acquisition fails with a broken-task error and the lock is handed
/// to the next waiter instead, so the lock/unlock chain is never lost.
#[derive(Clone)]
pub struct AsyncLock {
    inner: Arc<Mutex<LockInner>>,
}

struct LockInner {
    locked: bool,
    waiters: VecDeque<Waiter>,
}

struct Waiter {
    state: Arc<ResultState<()>>,
    resume: Arc<dyn Executor>,
}

/// RAII guard over an [`AsyncLock`].
///
/// Default-constructed guards are empty (associated with no lock);
/// [`release`][ScopedAsyncLock::release] detaches an owning guard without
/// unlocking. The destructor unlocks if owning.
#[must_use = "dropping the guard releases the lock"]
pub struct ScopedAsyncLock {
    lock: Option<AsyncLock>,
    owns: bool,
}

// === impl AsyncLock ===

impl AsyncLock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(LockInner {
                locked: false,
                waiters: VecDeque::new(),
            })),
        }
    }

    /// Acquires the lock, suspending if it is currently held.
    ///
    /// When the lock is free the returned guard is produced inline; when
    /// contended, the caller resumes on `resume_executor` once the lock is
    /// handed over. The acquisition fails with a broken-task error if the
    /// lock is torn down or `resume_executor` shuts down before the handover.
    pub fn lock(&self, resume_executor: &Arc<dyn Executor>) -> LazyResult<ScopedAsyncLock> {
        let lock = self.clone();
        let resume = resume_executor.clone();

        LazyResult::from_future(async move {
            let waiter = {
                let mut inner = lock.inner.lock().unwrap();
                if inner.locked {
                    let state = Arc::new(ResultState::new());
                    inner.waiters.push_back(Waiter {
                        state: state.clone(),
                        resume,
                    });
                    Some(state)
                } else {
                    inner.locked = true;
                    None
                }
            };

            if let Some(state) = waiter {
                // completed by `unlock`, on our resume executor
                AsyncResult::from_state(state).await?;
            }

            Ok(ScopedAsyncLock::adopt(lock))
        })
    }

    /// Attempts a non-suspending acquisition; yields whether the lock was
    /// taken. A successful `try_lock` must be paired with
    /// [`unlock`][AsyncLock::unlock].
    pub fn try_lock(&self) -> LazyResult<bool> {
        let lock = self.clone();
        LazyResult::from_future(async move { Ok(lock.try_lock_now()) })
    }

    fn try_lock_now(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.locked {
            false
        } else {
            inner.locked = true;
            true
        }
    }

    /// Releases the lock, waking the longest-waiting acquirer if any.
    ///
    /// # Panics
    ///
    /// Panics if the lock is not currently held.
    pub fn unlock(&self) {
        loop {
            let waiter = {
                let mut inner = self.inner.lock().unwrap();
                assert!(inner.locked, "unlock of an unowned async lock");
                match inner.waiters.pop_front() {
                    // ownership transfers directly, `locked` stays set
                    Some(waiter) => waiter,
                    None => {
                        inner.locked = false;
                        return;
                    }
                }
            };

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

            if waiter.resume.enqueue(task).is_ok() {
                return;
            }
            // the refused enqueue cancelled the task, breaking that waiter's
            // acquisition; hand the lock to the next one
            tracing::debug!("async lock waiter lost its resume executor, trying the next");
        }
    }
}

impl Default for AsyncLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AsyncLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("AsyncLock")
            .field("locked", &inner.locked)
            .field("waiters", &inner.waiters.len())
            .finish()
    }
}

// === impl ScopedAsyncLock ===

impl ScopedAsyncLock {
    /// Creates an empty guard, associated with no lock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            lock: None,
            owns: false,
        }
    }

    /// Creates a guard associated with `lock` without owning it; pair with
    /// [`lock`][ScopedAsyncLock::lock] or [`try_lock`][ScopedAsyncLock::try_lock].
    #[must_use]
    pub fn deferred(lock: AsyncLock) -> Self {
        Self {
            lock: Some(lock),
            owns: false,
        }
    }

    /// Wraps a just-acquired `lock` into an owning guard.
    pub(crate) fn adopt(lock: AsyncLock) -> Self {
        Self {
            lock: Some(lock),
            owns: true,
        }
    }

    /// Whether this guard currently owns its lock.
    #[must_use]
    pub fn owns_lock(&self) -> bool {
        self.owns
    }

    /// Acquires the associated lock through this guard.
    ///
    /// # Panics
    ///
    /// Panics if the guard is empty ("no mutex") or already owns the lock
    /// ("deadlock").
    pub async fn lock(&mut self, resume_executor: &Arc<dyn Executor>) -> Outcome<()> {
        assert!(
            !self.owns,
            "deadlock: guard already owns its async lock"
        );
        let lock = self
            .lock
            .clone()
            .expect("guard is not associated with an async lock");

        let acquired = lock.lock(resume_executor).await?;
        // the new guard's ownership moves into self
        acquired.release();
        self.owns = true;
        Ok(())
    }

    /// Attempts a non-suspending acquisition through this guard.
    ///
    /// # Panics
    ///
    /// Panics on the same misuse as [`lock`][ScopedAsyncLock::lock].
    pub fn try_lock(&mut self) -> bool {
        assert!(
            !self.owns,
            "deadlock: guard already owns its async lock"
        );
        let lock = self
            .lock
            .as_ref()
            .expect("guard is not associated with an async lock");

        self.owns = lock.try_lock_now();
        self.owns
    }

    /// Releases the lock, keeping the association for later re-acquisition.
    ///
    /// # Panics
    ///
    /// Panics if the guard does not own the lock.
    pub fn unlock(&mut self) {
        assert!(self.owns, "guard does not own its async lock");
        self.owns = false;
        self.lock.as_ref().unwrap().unlock();
    }

    /// Detaches the guard from its lock *without* unlocking, returning the
    /// lock (if any). The caller becomes responsible for the release.
    pub fn release(mut self) -> Option<AsyncLock> {
        self.owns = false;
        self.lock.take()
    }

    /// Swaps two guards' associations and ownership.
    pub fn swap(&mut self, other: &mut Self) {
        core::mem::swap(&mut self.lock, &mut other.lock);
        core::mem::swap(&mut self.owns, &mut other.owns);
    }
}

impl Default for ScopedAsyncLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScopedAsyncLock {
    fn drop(&mut self) {
        if self.owns {
            self.lock.as_ref().unwrap().unlock();
        }
    }
}

impl fmt::Debug for ScopedAsyncLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedAsyncLock")
            .field("associated", &self.lock.is_some())
            .field("owns", &self.owns)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecutorExt, InlineExecutor, WorkerThreadExecutor};
    use core::time::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn inline_executor() -> Arc<dyn Executor> {
        Arc::new(InlineExecutor::new())
    }

    #[test]
    fn uncontended_lock_acquires_inline() {
        let lock = AsyncLock::new();
        let guard = lock.lock(&inline_executor()).run().get().unwrap();
        assert!(guard.owns_lock());
        drop(guard);

        // released; can be taken again
        assert!(lock.try_lock().run().get().unwrap());
        lock.unlock();
    }

    #[test]
    fn try_lock_fails_on_a_held_lock() {
        let lock = AsyncLock::new();
        assert!(lock.try_lock().run().get().unwrap());
        assert!(!lock.try_lock().run().get().unwrap());

        lock.unlock();
        assert!(lock.try_lock().run().get().unwrap());
        lock.unlock();
    }

    #[test]
    #[should_panic(expected = "unowned async lock")]
    fn unlocking_an_unowned_lock_panics() {
        let lock = AsyncLock::new();
        lock.unlock();
    }

    #[test]
    fn contended_waiters_are_served_fifo() {
        let lock = AsyncLock::new();
        let resume = inline_executor();
        let order = Arc::new(Mutex::new(Vec::new()));

        let guard = lock.lock(&resume).run().get().unwrap();

        let waiters: Vec<_> = (0..4)
            .map(|i| {
                let lock = lock.clone();
                let resume = resume.clone();
                let order = order.clone();
                LazyResult::from_future(async move {
                    let guard = lock.lock(&resume).await?;
                    order.lock().unwrap().push(i);
                    drop(guard);
                    Ok(())
                })
                .run()
            })
            .collect();

        // every waiter is queued behind the guard; releasing it cascades the
        // lock through the queue in arrival order
        drop(guard);
        for waiter in waiters {
            waiter.get().unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn mutual_exclusion_across_threads() {
        let lock = AsyncLock::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let threads = 4;
        let cycles = 1000;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let lock = lock.clone();
                let counter = counter.clone();
                thread::spawn(move || {
                    let resume = inline_executor();
                    for _ in 0..cycles {
                        let guard = lock.lock(&resume).run().get().unwrap();
                        let value = counter.load(Ordering::Relaxed);
                        thread::yield_now();
                        counter.store(value + 1, Ordering::Relaxed);
                        drop(guard);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), threads * cycles);
    }

    #[test]
    fn failed_resume_executor_breaks_the_waiter_and_hands_over() {
        let lock = AsyncLock::new();
        let dead: Arc<dyn Executor> = Arc::new(InlineExecutor::new());
        let alive = inline_executor();

        let guard = lock.lock(&alive).run().get().unwrap();

        // queue a waiter whose executor dies before the handover
        let doomed = lock.lock(&dead).run();
        let healthy = lock.lock(&alive).run();
        dead.shutdown();

        drop(guard);

        assert!(doomed.get().unwrap_err().is_broken());
        let guard = healthy.get().unwrap();
        assert!(guard.owns_lock());
    }

    #[test]
    fn guard_release_leaves_the_lock_held() {
        let lock = AsyncLock::new();
        let guard = lock.lock(&inline_executor()).run().get().unwrap();

        let released = guard.release().unwrap();
        assert!(!released.try_lock_now());

        released.unlock();
        assert!(lock.try_lock_now());
        lock.unlock();
    }

    #[test]
    fn deferred_guard_round_trip() {
        let lock = AsyncLock::new();
        let mut guard = ScopedAsyncLock::deferred(lock.clone());
        assert!(!guard.owns_lock());

        assert!(guard.try_lock());
        assert!(!lock.try_lock_now());
        guard.unlock();
        assert!(!guard.owns_lock());
    }

    #[test]
    #[should_panic(expected = "deadlock")]
    fn locking_an_owning_guard_panics() {
        let lock = AsyncLock::new();
        let mut guard = ScopedAsyncLock::deferred(lock);
        assert!(guard.try_lock());
        let _ = guard.try_lock();
    }

    #[test]
    fn uncontended_acquisition_resumes_inline() {
        let lock = AsyncLock::new();
        let resume = inline_executor();

        let acquired_on = {
            let lock = lock.clone();
            LazyResult::from_future(async move {
                let guard = lock.lock(&resume).await?;
                let id = thread::current().id();
                drop(guard);
                Ok(id)
            })
            .run()
        };

        assert_eq!(acquired_on.get().unwrap(), thread::current().id());
    }

    #[test]
    fn contended_acquisition_resumes_on_the_resume_executor() {
        let lock = AsyncLock::new();
        let worker = Arc::new(WorkerThreadExecutor::new());
        let worker_id = worker
            .submit(|| thread::current().id())
            .unwrap()
            .get()
            .unwrap();
        let resume: Arc<dyn Executor> = worker.clone();

        let guard = lock.lock(&resume).run().get().unwrap();

        let contended = {
            let lock = lock.clone();
            let resume = resume.clone();
            LazyResult::from_future(async move {
                let guard = lock.lock(&resume).await?;
                let id = thread::current().id();
                drop(guard);
                Ok(id)
            })
            .run()
        };

        thread::sleep(Duration::from_millis(20));
        drop(guard);

        assert_eq!(contended.get().unwrap(), worker_id);
    }
}
