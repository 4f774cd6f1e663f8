// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::deque::ArrayDeque;
use crate::error::{BrokenTask, ShutdownError};
use crate::executor::Executor;
use crate::loom::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use crate::runtime::ThreadCallbacks;
use crate::task::Task;
use core::cell::Cell;
use core::fmt;
use core::time::Duration;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Instant;

pub(crate) const NAME: &str = "weft::thread_pool_executor";
const CANCEL_REASON: &str = "weft::thread_pool_executor was shut down";

/// A work-stealing thread pool with a fixed worker count and dynamically
/// recycled threads.
///
/// Each worker owns a local FIFO queue. The enqueue path prefers handing a
/// task directly to an idle worker (popped off a LIFO stack, so the most
/// recently parked worker goes first), then
/// self-enqueues if the caller is itself a worker of this pool, and falls
/// back to a round-robin pick. Workers that run dry steal from their
/// siblings' queues; workers that stay idle past the configured maximum idle
/// time let their thread exit, and the slot spins up a fresh thread the next
/// time work arrives.
///
/// Panics from `post`ed tasks are caught and discarded by the worker; panics
/// from `submit`ted callables are captured on their result.
pub struct ThreadPoolExecutor {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    name: &'static str,
    cancel_reason: &'static str,
    workers: Box<[WorkerSlot]>,
    idle: IdleStack,
    round_robin: AtomicUsize,
    max_idle_time: Duration,
    shutdown: AtomicBool,
    callbacks: ThreadCallbacks,
}

struct WorkerSlot {
    core: Mutex<WorkerCore>,
    cond: Condvar,
    /// Link used while this worker sits on the pool's idle stack; guarded by
    /// the stack's lock.
    next_idle: AtomicUsize,
}

struct WorkerCore {
    queue: ArrayDeque<Task>,
    status: WorkerStatus,
    thread: Option<thread::JoinHandle<()>>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum WorkerStatus {
    /// The worker thread is executing or looking for tasks.
    Running,
    /// The worker thread is parked on its condvar and listed on the idle
    /// stack.
    Idle,
    /// No live thread backs this slot.
    Exited,
}

/// Sentinel for "no worker" in the idle stack's links.
const NONE: usize = usize::MAX;

/// A LIFO stack of idle worker indices, threaded through the workers' own
/// `next_idle` links under a spinlock (the critical sections are a handful of
/// loads and stores).
struct IdleStack {
    head: spin::Mutex<usize>,
}

std::thread_local! {
    /// `(pool address, worker index)` of the pool worker running on this
    /// thread, if any. Lets the enqueue path detect self-enqueues.
    static CURRENT_WORKER: Cell<Option<(usize, usize)>> = const { Cell::new(None) };
}

// === impl IdleStack ===

impl IdleStack {
    fn new() -> Self {
        Self {
            head: spin::Mutex::new(NONE),
        }
    }

    fn push(&self, workers: &[WorkerSlot], index: usize) {
        let mut head = self.head.lock();
        workers[index].next_idle.store(*head, Ordering::Relaxed);
        *head = index;
    }

    fn pop(&self, workers: &[WorkerSlot]) -> Option<usize> {
        let mut head = self.head.lock();
        if *head == NONE {
            return None;
        }
        let index = *head;
        *head = workers[index].next_idle.load(Ordering::Relaxed);
        Some(index)
    }

    /// Unlinks `index` from the stack; returns `false` if it was not on it
    /// (somebody popped it concurrently).
    fn remove(&self, workers: &[WorkerSlot], index: usize) -> bool {
        let mut head = self.head.lock();
        let mut cursor = *head;

        if cursor == index {
            *head = workers[index].next_idle.load(Ordering::Relaxed);
            return true;
        }

        while cursor != NONE {
            let next = workers[cursor].next_idle.load(Ordering::Relaxed);
            if next == index {
                workers[cursor]
                    .next_idle
                    .store(workers[index].next_idle.load(Ordering::Relaxed), Ordering::Relaxed);
                return true;
            }
            cursor = next;
        }

        false
    }
}

// === impl ThreadPoolExecutor ===

impl ThreadPoolExecutor {
    /// Creates a pool with `worker_count` worker slots whose threads exit
    /// after `max_idle_time` without work.
    ///
    /// # Panics
    ///
    /// Panics if `worker_count` is zero.
    #[must_use]
    pub fn new(worker_count: usize, max_idle_time: Duration) -> Self {
        Self::with_details(
            NAME,
            CANCEL_REASON,
            worker_count,
            max_idle_time,
            ThreadCallbacks::default(),
        )
    }

    pub(crate) fn with_details(
        name: &'static str,
        cancel_reason: &'static str,
        worker_count: usize,
        max_idle_time: Duration,
        callbacks: ThreadCallbacks,
    ) -> Self {
        assert!(worker_count > 0, "a thread pool needs at least one worker");

        let workers = (0..worker_count)
            .map(|_| WorkerSlot {
                core: Mutex::new(WorkerCore {
                    queue: ArrayDeque::new(),
                    status: WorkerStatus::Exited,
                    thread: None,
                }),
                cond: Condvar::new(),
                next_idle: AtomicUsize::new(NONE),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            inner: Arc::new(PoolInner {
                name,
                cancel_reason,
                workers,
                idle: IdleStack::new(),
                round_robin: AtomicUsize::new(0),
                max_idle_time,
                shutdown: AtomicBool::new(false),
                callbacks,
            }),
        }
    }

    /// The fixed number of worker slots.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.inner.workers.len()
    }
}

// === impl PoolInner ===

/// The pool-level enqueue policy: idle worker first, then self-enqueue, then
/// round-robin.
fn pool_enqueue(pool: &Arc<PoolInner>, mut task: Task) -> Result<(), ShutdownError> {
    if pool.shutdown.load(Ordering::Acquire) {
        task.cancel(BrokenTask::new(pool.cancel_reason));
        return Err(ShutdownError(pool.name));
    }

    // 1. hand the task to the most recently idled worker
    if let Some(index) = pool.idle.pop(&pool.workers) {
        deliver(pool, index, task);
        return Ok(());
    }

    // 2. a worker enqueueing to its own pool keeps the task local
    if let Some(own) = pool.current_worker_index() {
        pool.workers[own].core.lock().unwrap().queue.push_back(task);
        return Ok(());
    }

    // 3. round-robin over the slots
    let index = pool.round_robin.fetch_add(1, Ordering::Relaxed) % pool.workers.len();
    deliver(pool, index, task);
    Ok(())
}

/// Pushes `task` onto worker `index`'s queue, waking or (re)spawning its
/// thread as needed.
fn deliver(pool: &Arc<PoolInner>, index: usize, task: Task) {
    let slot = &pool.workers[index];
    let mut retired = None;

    {
        let mut core = slot.core.lock().unwrap();
        core.queue.push_back(task);

        match core.status {
            // an active worker re-checks its queue before parking
            WorkerStatus::Running => {}
            WorkerStatus::Idle => {
                // round-robin delivery may target a stacked idle worker
                pool.idle.remove(&pool.workers, index);
                core.status = WorkerStatus::Running;
            }
            WorkerStatus::Exited => {
                core.status = WorkerStatus::Running;
                let pool = pool.clone();
                let handle = thread::Builder::new()
                    .name(format!("{}/{index}", pool.name))
                    .spawn(move || worker_main(&pool, index))
                    .expect("failed to spawn pool worker thread");
                retired = core.thread.replace(handle);
            }
        }
    }

    slot.cond.notify_one();

    // the previous thread of a recycled slot has already left its work
    // loop; join it off the delivery lock
    if let Some(retired) = retired {
        if retired.join().is_err() {
            tracing::error!(worker = index, "retired pool worker panicked");
        }
    }
}

/// Signals every worker to exit, joins their threads, then cancels whatever
/// they left queued.
fn pool_shutdown(pool: &PoolInner) {
    if pool.shutdown.swap(true, Ordering::AcqRel) {
        return;
    }

    let own_index = pool.current_worker_index();

    // signal every worker, idle or running, and collect their threads
    let mut handles = Vec::with_capacity(pool.workers.len());
    for (index, slot) in pool.workers.iter().enumerate() {
        let mut core = slot.core.lock().unwrap();
        if let Some(handle) = core.thread.take() {
            // a worker shutting down its own pool cannot join itself
            if own_index != Some(index) {
                handles.push(handle);
            }
        }
        slot.cond.notify_all();
    }

    for handle in handles {
        if handle.join().is_err() {
            tracing::error!("pool worker panicked before joining");
        }
    }

    // cancel everything the workers left behind
    let mut cancelled = 0_usize;
    for slot in &pool.workers {
        let mut core = slot.core.lock().unwrap();
        while let Some(mut task) = core.queue.pop_front() {
            task.cancel(BrokenTask::new(pool.cancel_reason));
            cancelled += 1;
        }
    }

    tracing::debug!(pool = pool.name, cancelled, "thread pool shut down");
}

impl PoolInner {
    /// Steals one task from the front of some other worker's queue.
    ///
    /// Victims are probed starting at the pool-wide round-robin cursor;
    /// contended victims are skipped rather than waited on.
    fn try_steal(&self, thief: usize) -> Option<Task> {
        let worker_count = self.workers.len();
        if worker_count <= 1 {
            return None;
        }

        let start = self.round_robin.fetch_add(1, Ordering::Relaxed) % worker_count;
        for offset in 0..worker_count {
            let victim = (start + offset) % worker_count;
            if victim == thief {
                continue;
            }

            if let Ok(mut core) = self.workers[victim].core.try_lock() {
                if let Some(task) = core.queue.pop_front() {
                    tracing::trace!(thief, victim, "stole a task");
                    return Some(task);
                }
            }
        }

        None
    }

    fn current_worker_index(&self) -> Option<usize> {
        let pool_id = core::ptr::from_ref(self) as usize;
        CURRENT_WORKER
            .get()
            .and_then(|(id, index)| (id == pool_id).then_some(index))
    }
}

fn worker_main(pool: &Arc<PoolInner>, index: usize) {
    CURRENT_WORKER.set(Some((Arc::as_ptr(pool) as usize, index)));
    pool.callbacks.thread_started(pool.name);
    let _span = tracing::debug_span!("pool worker loop", worker = index).entered();

    let slot = &pool.workers[index];

    'outer: while !pool.shutdown.load(Ordering::Acquire) {
        // 1. drain the local queue
        loop {
            if pool.shutdown.load(Ordering::Acquire) {
                break 'outer;
            }
            let task = slot.core.lock().unwrap().queue.pop_front();
            match task {
                Some(mut task) => run_guarded(&mut task, index),
                None => break,
            }
        }

        // 2. steal from a sibling
        if let Some(mut task) = pool.try_steal(index) {
            run_guarded(&mut task, index);
            continue;
        }

        // 3. park on the idle stack
        let mut core = slot.core.lock().unwrap();
        if !core.queue.is_empty() || pool.shutdown.load(Ordering::Acquire) {
            continue;
        }
        core.status = WorkerStatus::Idle;
        pool.idle.push(&pool.workers, index);
        tracing::trace!(worker = index, "going idle");

        let deadline = Instant::now() + pool.max_idle_time;
        let timed_out = loop {
            let Some(timeout) = deadline
                .checked_duration_since(Instant::now())
                .filter(|d| !d.is_zero())
            else {
                break true;
            };

            let result;
            (core, result) = slot.cond.wait_timeout(core, timeout).unwrap();

            if !core.queue.is_empty() || pool.shutdown.load(Ordering::Acquire) {
                core.status = WorkerStatus::Running;
                continue 'outer;
            }
            if result.timed_out() {
                break true;
            }
        };

        debug_assert!(timed_out);
        if pool.idle.remove(&pool.workers, index) {
            // nobody claimed us in time; give the thread back to the OS
            core.status = WorkerStatus::Exited;
            tracing::debug!(worker = index, "idle timeout, exiting thread");
            break;
        }

        // an enqueuer popped us off the stack; its delivery is imminent
        core.status = WorkerStatus::Running;
    }

    pool.callbacks.thread_stopped(pool.name);
    CURRENT_WORKER.set(None);
}

fn run_guarded(task: &mut Task, worker: usize) {
    if catch_unwind(AssertUnwindSafe(|| task.run())).is_err() {
        tracing::error!(worker, "a pool task panicked; discarding");
    }
}

impl Executor for ThreadPoolExecutor {
    fn name(&self) -> &'static str {
        self.inner.name
    }

    fn enqueue(&self, task: Task) -> Result<(), ShutdownError> {
        pool_enqueue(&self.inner, task)
    }

    fn max_concurrency_level(&self) -> usize {
        self.inner.workers.len()
    }

    fn shutdown(&self) {
        pool_shutdown(&self.inner);
    }

    fn shutdown_requested(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    fn shutdown_reason(&self) -> &'static str {
        self.inner.cancel_reason
    }
}

impl fmt::Debug for ThreadPoolExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPoolExecutor")
            .field("name", &self.inner.name)
            .field("workers", &self.inner.workers.len())
            .finish_non_exhaustive()
    }
}

impl Drop for ThreadPoolExecutor {
    fn drop(&mut self) {
        pool_shutdown(&self.inner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorExt;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn runs_submitted_tasks() {
        let _trace = crate::test_util::trace_init();

        let pool = ThreadPoolExecutor::new(4, Duration::from_secs(10));
        let results = pool
            .bulk_submit((0..100).map(|i| move || i * i))
            .unwrap();
        for (i, result) in results.into_iter().enumerate() {
            assert_eq!(result.get().unwrap(), i * i);
        }
    }

    #[test]
    fn work_spreads_across_workers() {
        let pool = Arc::new(ThreadPoolExecutor::new(4, Duration::from_secs(10)));
        let _shutdown = crate::test_util::ExecutorShutdowner(pool.clone());
        let seen = Arc::new(Mutex::new(HashSet::new()));

        let results: Vec<_> = (0..64)
            .map(|_| {
                let seen = seen.clone();
                pool.submit(move || {
                    // hold the worker briefly so siblings must participate
                    thread::sleep(Duration::from_millis(5));
                    seen.lock().unwrap().insert(thread::current().id());
                })
                .unwrap()
            })
            .collect();

        for result in results {
            result.get().unwrap();
        }

        assert!(seen.lock().unwrap().len() > 1);
    }

    #[test]
    fn self_enqueue_stays_in_the_pool() {
        let pool = Arc::new(ThreadPoolExecutor::new(2, Duration::from_secs(10)));

        let inner = {
            let pool = pool.clone();
            pool.clone()
                .submit(move || pool.submit(|| 21 * 2).unwrap())
                .unwrap()
        };

        let nested = inner.get().unwrap();
        assert_eq!(nested.get().unwrap(), 42);
    }

    #[test]
    fn idle_workers_time_out_and_slots_respawn() {
        let pool = ThreadPoolExecutor::new(2, Duration::from_millis(50));

        pool.submit(|| 1).unwrap().get().unwrap();

        // long enough for every worker to give up its thread
        thread::sleep(Duration::from_millis(300));

        // the pool still accepts and runs work afterwards
        assert_eq!(pool.submit(|| 2).unwrap().get().unwrap(), 2);
    }

    #[test]
    fn shutdown_cancels_queued_tasks() {
        let pool = ThreadPoolExecutor::new(1, Duration::from_secs(10));

        // wedge the single worker
        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        pool.post(move || {
            let _ = gate_rx.recv_timeout(Duration::from_secs(5));
        })
        .unwrap();
        thread::sleep(Duration::from_millis(20));

        let pending = pool.submit(|| 1).unwrap();

        let release = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let _ = gate_tx.send(());
        });

        pool.shutdown();
        release.join().unwrap();

        assert!(pending.get().unwrap_err().is_broken());
        assert!(pool.submit(|| 1).is_err());
    }

    #[test]
    fn pool_worker_panics_are_discarded() {
        let pool = ThreadPoolExecutor::new(1, Duration::from_secs(10));
        pool.post(|| panic!("swallowed")).unwrap();

        // the worker survives and keeps executing
        assert_eq!(pool.submit(|| 3).unwrap().get().unwrap(), 3);
    }

    #[test]
    fn stealing_redistributes_queued_work() {
        let pool = Arc::new(ThreadPoolExecutor::new(4, Duration::from_secs(10)));
        let counter = Arc::new(AtomicUsize::new(0));

        // saturate with brief tasks; stealing keeps everyone busy and all
        // tasks complete
        let results: Vec<_> = (0..512)
            .map(|_| {
                let counter = counter.clone();
                pool.submit(move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                })
                .unwrap()
            })
            .collect();

        for result in results {
            result.get().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 512);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let pool = ThreadPoolExecutor::new(2, Duration::from_secs(10));
        pool.shutdown();
        pool.shutdown();
        assert!(pool.shutdown_requested());
    }
}
