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
use crate::task::Task;
use core::time::Duration;
use std::sync::{Condvar, Mutex};
use std::time::Instant;

pub(crate) const NAME: &str = "weft::manual_executor";
const CANCEL_REASON: &str = "weft::manual_executor was shut down";

/// A FIFO task queue pumped explicitly by the caller.
///
/// Nothing runs until some thread calls one of the `loop_*` operations;
/// multiple threads may pump and enqueue concurrently, with FIFO order
/// guaranteed across the combined operations. The `wait_for_*` operations
/// block until work is available without executing anything, which makes this
/// executor double as a synchronization point in tests and step-driven
/// simulations.
///
/// Panics from executed tasks propagate to the pumping caller.
#[derive(Debug)]
pub struct ManualExecutor {
    core: Mutex<Core>,
    cond: Condvar,
    shutdown: AtomicBool,
}

#[derive(Debug)]
struct Core {
    queue: ArrayDeque<Task>,
    shutdown: bool,
}

// === impl ManualExecutor ===

impl ManualExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: Mutex::new(Core {
                queue: ArrayDeque::new(),
                shutdown: false,
            }),
            cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// The number of queued tasks.
    #[must_use]
    pub fn size(&self) -> usize {
        self.core.lock().unwrap().queue.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Pops and runs one task. Returns `false` if the queue was empty.
    ///
    /// # Errors
    ///
    /// Fails if the executor has shut down.
    pub fn loop_once(&self) -> Result<bool, ShutdownError> {
        self.loop_once_until(None)
    }

    /// Pops and runs one task, waiting up to `timeout` for one to arrive.
    ///
    /// # Errors
    ///
    /// Fails if the executor has shut down (also while waiting).
    pub fn loop_once_for(&self, timeout: Duration) -> Result<bool, ShutdownError> {
        self.loop_once_until(Instant::now().checked_add(timeout))
    }

    /// Runs up to `max_count` already-queued tasks; returns how many ran.
    ///
    /// # Errors
    ///
    /// Fails if the executor has shut down.
    pub fn loop_n(&self, max_count: usize) -> Result<usize, ShutdownError> {
        let mut executed = 0;
        while executed < max_count {
            if !self.loop_once()? {
                break;
            }
            executed += 1;
        }
        Ok(executed)
    }

    /// Runs up to `max_count` tasks, waiting for tasks to arrive until
    /// `timeout` elapses; returns how many ran.
    ///
    /// # Errors
    ///
    /// Fails if the executor has shut down (also while waiting).
    pub fn loop_for(&self, max_count: usize, timeout: Duration) -> Result<usize, ShutdownError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut executed = 0;
        while executed < max_count {
            if !self.loop_once_until(deadline)? {
                break;
            }
            executed += 1;
        }
        Ok(executed)
    }

    /// Blocks until at least one task is queued.
    ///
    /// # Errors
    ///
    /// Fails if the executor has shut down (also while waiting).
    pub fn wait_for_task(&self) -> Result<(), ShutdownError> {
        self.wait_for_tasks_until(1, None).map(|_| ())
    }

    /// Blocks until at least one task is queued or `timeout` elapses;
    /// returns whether a task is available.
    ///
    /// # Errors
    ///
    /// Fails if the executor has shut down (also while waiting).
    pub fn wait_for_task_for(&self, timeout: Duration) -> Result<bool, ShutdownError> {
        self.wait_for_tasks_until(1, Instant::now().checked_add(timeout))
            .map(|count| count >= 1)
    }

    /// Blocks until at least `count` tasks are queued.
    ///
    /// # Errors
    ///
    /// Fails if the executor has shut down (also while waiting).
    pub fn wait_for_tasks(&self, count: usize) -> Result<(), ShutdownError> {
        self.wait_for_tasks_until(count, None).map(|_| ())
    }

    /// Blocks until at least `count` tasks are queued or `timeout` elapses;
    /// returns the number of tasks available at return.
    ///
    /// # Errors
    ///
    /// Fails if the executor has shut down (also while waiting).
    pub fn wait_for_tasks_for(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Result<usize, ShutdownError> {
        self.wait_for_tasks_until(count, Instant::now().checked_add(timeout))
    }

    /// Cancels and discards every queued task; returns how many were removed.
    ///
    /// # Errors
    ///
    /// Fails if the executor has shut down.
    pub fn clear(&self) -> Result<usize, ShutdownError> {
        let mut drained = {
            let mut core = self.core.lock().unwrap();
            if core.shutdown {
                return Err(ShutdownError(NAME));
            }
            core.drain()
        };

        let count = drained.len();
        for mut task in drained.drain(..) {
            task.cancel(BrokenTask::new(CANCEL_REASON));
        }
        Ok(count)
    }

    fn loop_once_until(&self, deadline: Option<Instant>) -> Result<bool, ShutdownError> {
        let mut task = {
            let mut core = self.core.lock().unwrap();
            loop {
                if core.shutdown {
                    return Err(ShutdownError(NAME));
                }
                if let Some(task) = core.queue.pop_front() {
                    break task;
                }

                let Some(deadline) = deadline else {
                    return Ok(false);
                };
                let Some(timeout) = deadline
                    .checked_duration_since(Instant::now())
                    .filter(|d| !d.is_zero())
                else {
                    return Ok(false);
                };
                (core, _) = self.cond.wait_timeout(core, timeout).unwrap();
            }
        };

        task.run();
        Ok(true)
    }

    fn wait_for_tasks_until(
        &self,
        count: usize,
        deadline: Option<Instant>,
    ) -> Result<usize, ShutdownError> {
        let mut core = self.core.lock().unwrap();
        loop {
            if core.shutdown {
                return Err(ShutdownError(NAME));
            }
            if core.queue.len() >= count {
                return Ok(core.queue.len());
            }

            match deadline {
                None => core = self.cond.wait(core).unwrap(),
                Some(deadline) => {
                    let Some(timeout) = deadline
                        .checked_duration_since(Instant::now())
                        .filter(|d| !d.is_zero())
                    else {
                        return Ok(core.queue.len());
                    };
                    (core, _) = self.cond.wait_timeout(core, timeout).unwrap();
                }
            }
        }
    }
}

impl Core {
    /// Moves the queued tasks out, leaving the queue empty.
    fn drain(&mut self) -> Vec<Task> {
        let mut drained = Vec::with_capacity(self.queue.len());
        while let Some(task) = self.queue.pop_front() {
            drained.push(task);
        }
        drained
    }
}

impl Executor for ManualExecutor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn enqueue(&self, mut task: Task) -> Result<(), ShutdownError> {
        {
            let mut core = self.core.lock().unwrap();
            if core.shutdown {
                drop(core);
                task.cancel(BrokenTask::new(CANCEL_REASON));
                return Err(ShutdownError(NAME));
            }
            core.queue.push_back(task);
        }

        self.cond.notify_all();
        Ok(())
    }

    fn bulk_enqueue(&self, tasks: Vec<Task>) -> Result<(), ShutdownError> {
        {
            let mut core = self.core.lock().unwrap();
            if core.shutdown {
                drop(core);
                for mut task in tasks {
                    task.cancel(BrokenTask::new(CANCEL_REASON));
                }
                return Err(ShutdownError(NAME));
            }
            for task in tasks {
                core.queue.push_back(task);
            }
        }

        self.cond.notify_all();
        Ok(())
    }

    fn max_concurrency_level(&self) -> usize {
        // tasks run on however many threads choose to pump the queue
        usize::MAX
    }

    fn shutdown(&self) {
        let mut drained = {
            let mut core = self.core.lock().unwrap();
            if core.shutdown {
                return;
            }
            core.shutdown = true;
            self.shutdown.store(true, Ordering::Release);
            core.drain()
        };

        self.cond.notify_all();

        tracing::debug!(removed = drained.len(), "manual executor shut down");
        for mut task in drained.drain(..) {
            task.cancel(BrokenTask::new(CANCEL_REASON));
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn shutdown_reason(&self) -> &'static str {
        CANCEL_REASON
    }
}

impl Default for ManualExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ManualExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
