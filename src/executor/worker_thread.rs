// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::deque::ArrayDeque;
use crate::error::{BrokenTask, ShutdownError};
use crate::executor::Executor;
use crate::loom::sync::atomic::{AtomicBool, Ordering};
use crate::runtime::ThreadCallbacks;
use crate::task::Task;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

pub(crate) const NAME: &str = "weft::worker_thread_executor";
const CANCEL_REASON: &str = "weft::worker_thread_executor was shut down";

/// An executor owning a single dedicated thread that drains a FIFO queue.
///
/// Tasks enqueued from any thread run strictly in order on the worker.
/// Shutdown raises a flag the worker checks before every pop (taking priority
/// over queued work), joins the thread, and cancels every remaining task.
///
/// A `post`ed task that panics terminates the process: the worker has no
/// owner to report the panic to, and crashing beats swallowing it. Panics in
/// `submit`ted callables are captured on their result instead.
pub struct WorkerThreadExecutor {
    inner: Arc<Inner>,
}

struct Inner {
    core: Mutex<Core>,
    cond: Condvar,
    shutdown: AtomicBool,
    callbacks: ThreadCallbacks,
}

struct Core {
    queue: ArrayDeque<Task>,
    join: Option<thread::JoinHandle<()>>,
}

// === impl WorkerThreadExecutor ===

impl WorkerThreadExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self::with_callbacks(ThreadCallbacks::default())
    }

    pub(crate) fn with_callbacks(callbacks: ThreadCallbacks) -> Self {
        let inner = Arc::new(Inner {
            core: Mutex::new(Core {
                queue: ArrayDeque::new(),
                join: None,
            }),
            cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            callbacks,
        });

        let join = thread::Builder::new()
            .name(NAME.into())
            .spawn({
                let inner = inner.clone();
                move || inner.work_loop()
            })
            .expect("failed to spawn worker thread");

        inner.core.lock().unwrap().join = Some(join);

        Self { inner }
    }
}

impl Inner {
    fn work_loop(self: Arc<Self>) {
        self.callbacks.thread_started(NAME);
        let _span = tracing::debug_span!("worker thread loop").entered();

        loop {
            let mut task = {
                let mut core = self.core.lock().unwrap();
                loop {
                    // the shutdown flag takes priority over pending tasks
                    if self.shutdown.load(Ordering::Acquire) {
                        drop(core);
                        self.callbacks.thread_stopped(NAME);
                        return;
                    }
                    if let Some(task) = core.queue.pop_front() {
                        break task;
                    }
                    core = self.cond.wait(core).unwrap();
                }
            };

            if catch_unwind(AssertUnwindSafe(|| task.run())).is_err() {
                tracing::error!("a task panicked on the worker thread executor, aborting");
                std::process::abort();
            }
        }
    }
}

impl Executor for WorkerThreadExecutor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn enqueue(&self, mut task: Task) -> Result<(), ShutdownError> {
        {
            let mut core = self.inner.core.lock().unwrap();
            if self.inner.shutdown.load(Ordering::Acquire) {
                drop(core);
                task.cancel(BrokenTask::new(CANCEL_REASON));
                return Err(ShutdownError(NAME));
            }
            core.queue.push_back(task);
        }

        self.inner.cond.notify_one();
        Ok(())
    }

    fn max_concurrency_level(&self) -> usize {
        1
    }

    fn shutdown(&self) {
        let (join, mut abandoned) = {
            let mut core = self.inner.core.lock().unwrap();
            if self.inner.shutdown.swap(true, Ordering::AcqRel) {
                return;
            }
            self.inner.cond.notify_one();

            let mut abandoned = Vec::with_capacity(core.queue.len());
            while let Some(task) = core.queue.pop_front() {
                abandoned.push(task);
            }
            (core.join.take(), abandoned)
        };

        if let Some(join) = join {
            if thread::current().id() == join.thread().id() {
                // shutdown from the worker itself; the loop exits after the
                // current task, nothing to join
            } else if join.join().is_err() {
                tracing::error!("worker thread panicked before joining");
            }
        }

        tracing::debug!(
            cancelled = abandoned.len(),
            "worker thread executor shut down"
        );
        for mut task in abandoned.drain(..) {
            task.cancel(BrokenTask::new(CANCEL_REASON));
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    fn shutdown_reason(&self) -> &'static str {
        CANCEL_REASON
    }
}

impl Default for WorkerThreadExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WorkerThreadExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
