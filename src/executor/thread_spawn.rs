// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::error::{BrokenTask, ShutdownError};
use crate::executor::Executor;
use crate::loom::sync::atomic::{AtomicBool, Ordering};
use crate::runtime::ThreadCallbacks;
use crate::task::Task;
use std::collections::HashMap;
use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

pub(crate) const NAME: &str = "weft::thread_executor";
const CANCEL_REASON: &str = "weft::thread_executor was shut down";

/// An executor that spawns a fresh OS thread per submitted task.
///
/// Meant for work that may block for a long time (file I/O, third-party
/// blocking calls); burning a whole thread per task keeps such work from
/// starving the thread pools.
///
/// Threads retire themselves when their task finishes: each retiring thread
/// parks its own handle in a one-element "last retired" slot and joins the
/// predecessor it evicts, keeping joins off the submission path. Shutdown
/// waits until every outstanding thread has retired, then joins the last.
///
/// As with [`WorkerThreadExecutor`][super::WorkerThreadExecutor], a `post`ed
/// task that panics terminates the process.
pub struct ThreadExecutor {
    inner: Arc<Inner>,
}

struct Inner {
    core: Mutex<Core>,
    cond: Condvar,
    shutdown: AtomicBool,
    callbacks: ThreadCallbacks,
}

#[derive(Default)]
struct Core {
    /// Handles of threads still running their task, by spawn id.
    active: HashMap<u64, thread::JoinHandle<()>>,
    /// Spawn ids of threads that retired before their handle was registered.
    retired_early: HashSet<u64>,
    /// The most recently retired thread, joined by the next one to retire.
    last_retired: Option<thread::JoinHandle<()>>,
    next_id: u64,
}

// === impl ThreadExecutor ===

impl ThreadExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self::with_callbacks(ThreadCallbacks::default())
    }

    pub(crate) fn with_callbacks(callbacks: ThreadCallbacks) -> Self {
        Self {
            inner: Arc::new(Inner {
                core: Mutex::new(Core::default()),
                cond: Condvar::new(),
                shutdown: AtomicBool::new(false),
                callbacks,
            }),
        }
    }
}

impl Inner {
    /// Moves this thread's handle from the active set into the last-retired
    /// slot and joins whichever predecessor it displaces.
    fn retire(&self, id: u64) {
        let predecessor = {
            let mut core = self.core.lock().unwrap();
            match core.active.remove(&id) {
                Some(own_handle) => core.last_retired.replace(own_handle),
                // we finished before `enqueue` registered our handle
                None => {
                    core.retired_early.insert(id);
                    None
                }
            }
        };
        self.cond.notify_all();

        if let Some(predecessor) = predecessor {
            // already retired, so this join returns almost immediately
            if predecessor.join().is_err() {
                tracing::error!("retired thread panicked before joining");
            }
        }
    }
}

impl Executor for ThreadExecutor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn enqueue(&self, mut task: Task) -> Result<(), ShutdownError> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            task.cancel(BrokenTask::new(CANCEL_REASON));
            return Err(ShutdownError(NAME));
        }

        let id = {
            let mut core = self.inner.core.lock().unwrap();
            let id = core.next_id;
            core.next_id += 1;
            id
        };

        let handle = thread::Builder::new()
            .name(NAME.into())
            .spawn({
                let inner = self.inner.clone();
                move || {
                    inner.callbacks.thread_started(NAME);
                    if catch_unwind(AssertUnwindSafe(|| task.run())).is_err() {
                        tracing::error!("a task panicked on the thread executor, aborting");
                        std::process::abort();
                    }
                    inner.callbacks.thread_stopped(NAME);
                    inner.retire(id);
                }
            })
            .expect("failed to spawn task thread");

        let mut core = self.inner.core.lock().unwrap();
        if core.retired_early.remove(&id) {
            // the thread already finished; it could not join anything, so
            // treat its handle as the latest retiree
            let predecessor = core.last_retired.replace(handle);
            drop(core);
            if let Some(predecessor) = predecessor {
                let _ = predecessor.join();
            }
        } else {
            core.active.insert(id, handle);
        }

        Ok(())
    }

    fn max_concurrency_level(&self) -> usize {
        usize::MAX
    }

    fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        let last = {
            let mut core = self.inner.core.lock().unwrap();
            while !core.active.is_empty() {
                core = self.inner.cond.wait(core).unwrap();
            }
            core.last_retired.take()
        };

        if let Some(last) = last {
            if last.join().is_err() {
                tracing::error!("retired thread panicked before joining");
            }
        }

        tracing::debug!("thread executor shut down");
    }

    fn shutdown_requested(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    fn shutdown_reason(&self) -> &'static str {
        CANCEL_REASON
    }
}

impl Default for ThreadExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
