// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::executor::{
    InlineExecutor, ManualExecutor, ThreadExecutor, ThreadPoolExecutor, WorkerThreadExecutor,
};
use crate::time::TimerQueue;
use core::fmt;
use core::time::Duration;
use std::sync::Arc;

const CPU_POOL_NAME: &str = "weft::thread_pool_executor";
const CPU_POOL_CANCEL_REASON: &str = "weft::thread_pool_executor was shut down";
const BACKGROUND_POOL_NAME: &str = "weft::background_executor";
const BACKGROUND_POOL_CANCEL_REASON: &str = "weft::background_executor was shut down";

const DEFAULT_MAX_IDLE_TIME: Duration = Duration::from_secs(2 * 60);
const BACKGROUND_THREAD_FACTOR: usize = 4;

/// Callbacks observing the lifecycle of every thread the runtime's executors
/// and timer queue create, invoked with the owning component's name.
#[derive(Clone, Default)]
pub struct ThreadCallbacks {
    on_start: Option<Arc<dyn Fn(&'static str) + Send + Sync>>,
    on_stop: Option<Arc<dyn Fn(&'static str) + Send + Sync>>,
}

/// Configuration for [`Runtime::with_options`].
#[derive(Clone)]
pub struct RuntimeOptions {
    max_cpu_threads: usize,
    max_cpu_idle_time: Duration,
    max_background_threads: usize,
    max_background_idle_time: Duration,
    callbacks: ThreadCallbacks,
}

/// Owns the shared executors and the timer queue and hands them out.
///
/// The runtime is the intended entry point: construct one, grab executors
/// from it, submit work, compose results. Dropping the runtime shuts down
/// the timer queue first (it schedules onto the executors) and then every
/// executor, cancelling still-queued tasks.
pub struct Runtime {
    cpu_pool: Arc<ThreadPoolExecutor>,
    background_pool: Arc<ThreadPoolExecutor>,
    thread_executor: Arc<ThreadExecutor>,
    inline_executor: Arc<InlineExecutor>,
    timer_queue: Arc<TimerQueue>,
    callbacks: ThreadCallbacks,
}

// === impl ThreadCallbacks ===

impl ThreadCallbacks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoked on every runtime-owned thread right after it starts.
    #[must_use]
    pub fn on_thread_start(mut self, callback: impl Fn(&'static str) + Send + Sync + 'static) -> Self {
        self.on_start = Some(Arc::new(callback));
        self
    }

    /// Invoked on every runtime-owned thread right before it exits.
    #[must_use]
    pub fn on_thread_stop(mut self, callback: impl Fn(&'static str) + Send + Sync + 'static) -> Self {
        self.on_stop = Some(Arc::new(callback));
        self
    }

    pub(crate) fn thread_started(&self, name: &'static str) {
        tracing::trace!(name, "thread started");
        if let Some(callback) = &self.on_start {
            callback(name);
        }
    }

    pub(crate) fn thread_stopped(&self, name: &'static str) {
        tracing::trace!(name, "thread stopping");
        if let Some(callback) = &self.on_stop {
            callback(name);
        }
    }
}

impl fmt::Debug for ThreadCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadCallbacks")
            .field("on_start", &self.on_start.is_some())
            .field("on_stop", &self.on_stop.is_some())
            .finish()
    }
}

// === impl RuntimeOptions ===

impl RuntimeOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Worker count of the CPU pool. Defaults to the hardware concurrency.
    #[must_use]
    pub fn max_cpu_threads(mut self, count: usize) -> Self {
        self.max_cpu_threads = count;
        self
    }

    /// How long an idle CPU-pool thread lingers before exiting.
    #[must_use]
    pub fn max_cpu_idle_time(mut self, idle_time: Duration) -> Self {
        self.max_cpu_idle_time = idle_time;
        self
    }

    /// Worker count of the background pool. Defaults to four times the
    /// hardware concurrency; background workers are expected to block.
    #[must_use]
    pub fn max_background_threads(mut self, count: usize) -> Self {
        self.max_background_threads = count;
        self
    }

    /// How long an idle background-pool thread lingers before exiting.
    #[must_use]
    pub fn max_background_idle_time(mut self, idle_time: Duration) -> Self {
        self.max_background_idle_time = idle_time;
        self
    }

    /// Thread lifecycle callbacks (see [`ThreadCallbacks`]).
    #[must_use]
    pub fn thread_callbacks(mut self, callbacks: ThreadCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        let hardware_concurrency = std::thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(1);

        Self {
            max_cpu_threads: hardware_concurrency,
            max_cpu_idle_time: DEFAULT_MAX_IDLE_TIME,
            max_background_threads: hardware_concurrency * BACKGROUND_THREAD_FACTOR,
            max_background_idle_time: DEFAULT_MAX_IDLE_TIME,
            callbacks: ThreadCallbacks::default(),
        }
    }
}

impl fmt::Debug for RuntimeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeOptions")
            .field("max_cpu_threads", &self.max_cpu_threads)
            .field("max_cpu_idle_time", &self.max_cpu_idle_time)
            .field("max_background_threads", &self.max_background_threads)
            .field("max_background_idle_time", &self.max_background_idle_time)
            .finish_non_exhaustive()
    }
}

// === impl Runtime ===

impl Runtime {
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(RuntimeOptions::default())
    }

    #[must_use]
    pub fn with_options(options: RuntimeOptions) -> Self {
        let cpu_pool = Arc::new(ThreadPoolExecutor::with_details(
            CPU_POOL_NAME,
            CPU_POOL_CANCEL_REASON,
            options.max_cpu_threads,
            options.max_cpu_idle_time,
            options.callbacks.clone(),
        ));

        let background_pool = Arc::new(ThreadPoolExecutor::with_details(
            BACKGROUND_POOL_NAME,
            BACKGROUND_POOL_CANCEL_REASON,
            options.max_background_threads,
            options.max_background_idle_time,
            options.callbacks.clone(),
        ));

        Self {
            cpu_pool,
            background_pool,
            thread_executor: Arc::new(ThreadExecutor::with_callbacks(options.callbacks.clone())),
            inline_executor: Arc::new(InlineExecutor::new()),
            timer_queue: Arc::new(TimerQueue::with_callbacks(options.callbacks.clone())),
            callbacks: options.callbacks,
        }
    }

    /// The work-stealing pool for CPU-bound tasks.
    #[must_use]
    pub fn cpu_pool(&self) -> &Arc<ThreadPoolExecutor> {
        &self.cpu_pool
    }

    /// The (larger) work-stealing pool for tasks expected to block.
    #[must_use]
    pub fn background_pool(&self) -> &Arc<ThreadPoolExecutor> {
        &self.background_pool
    }

    /// The thread-per-task executor for long-blocking work.
    #[must_use]
    pub fn thread_executor(&self) -> &Arc<ThreadExecutor> {
        &self.thread_executor
    }

    /// The executor that runs tasks inside `enqueue`.
    #[must_use]
    pub fn inline_executor(&self) -> &Arc<InlineExecutor> {
        &self.inline_executor
    }

    /// The shared timer queue.
    #[must_use]
    pub fn timer_queue(&self) -> &Arc<TimerQueue> {
        &self.timer_queue
    }

    /// Creates a fresh single-worker-thread executor. Unlike the shared
    /// executors, each call returns a new, caller-owned instance.
    #[must_use]
    pub fn make_worker_thread(&self) -> Arc<WorkerThreadExecutor> {
        Arc::new(WorkerThreadExecutor::with_callbacks(self.callbacks.clone()))
    }

    /// Creates a fresh manually pumped executor.
    #[must_use]
    pub fn make_manual(&self) -> Arc<ManualExecutor> {
        Arc::new(ManualExecutor::new())
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        use crate::executor::Executor;

        // the timer queue schedules onto the executors, so it goes first
        self.timer_queue.shutdown();
        self.cpu_pool.shutdown();
        self.background_pool.shutdown();
        self.thread_executor.shutdown();
        self.inline_executor.shutdown();
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("cpu_workers", &self.cpu_pool.worker_count())
            .field("background_workers", &self.background_pool.worker_count())
            .finish_non_exhaustive()
    }
}
