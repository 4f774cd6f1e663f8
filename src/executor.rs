// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

mod inline;
mod manual;
mod thread_pool;
mod thread_spawn;
mod worker_thread;

use crate::error::{ExecutorError, ShutdownError, TaskError};
use crate::result::driver::Driver;
use crate::result::state::ResultState;
use crate::result::{AsyncResult, run_catching};
use crate::task::Task;
use core::pin::Pin;
use core::task::{Context, Poll};
use std::sync::Arc;

pub use inline::InlineExecutor;
pub use manual::ManualExecutor;
pub use thread_pool::ThreadPoolExecutor;
pub use thread_spawn::ThreadExecutor;
pub use worker_thread::WorkerThreadExecutor;

/// An object that accepts tasks and arranges for their execution on some set
/// of threads.
///
/// All executors share the same shutdown discipline: [`shutdown`][Executor::shutdown]
/// is idempotent, unblocks every waiting worker, cancels still-queued tasks
/// with a [`BrokenTask`][crate::BrokenTask] error and joins owned threads.
/// Once shut down, every enqueue fails with [`ShutdownError`]; a task refused
/// this way is cancelled before the error is returned, so its result handle
/// (if any) observes the broken-task error.
pub trait Executor: Send + Sync {
    /// A human-readable name identifying this executor in errors and logs.
    fn name(&self) -> &'static str;

    /// Hands `task` to this executor for eventual execution.
    ///
    /// # Errors
    ///
    /// Fails if the executor has shut down; the task is cancelled first.
    fn enqueue(&self, task: Task) -> Result<(), ShutdownError>;

    /// Hands a batch of tasks to this executor, preserving their order.
    ///
    /// # Errors
    ///
    /// Fails if the executor has shut down; every task of the batch is
    /// cancelled first.
    fn bulk_enqueue(&self, tasks: Vec<Task>) -> Result<(), ShutdownError> {
        for task in tasks {
            self.enqueue(task)?;
        }
        Ok(())
    }

    /// An upper bound on how many tasks this executor may run in parallel.
    fn max_concurrency_level(&self) -> usize;

    /// Requests shutdown. Idempotent; see the trait docs for the discipline.
    fn shutdown(&self);

    /// Whether [`shutdown`][Executor::shutdown] has been requested.
    fn shutdown_requested(&self) -> bool;

    /// The reason given to tasks cancelled by this executor's shutdown.
    fn shutdown_reason(&self) -> &'static str {
        "executor was shut down"
    }
}

/// Generic submission helpers layered over [`Executor`].
///
/// Implemented for every executor (including `dyn Executor`).
pub trait ExecutorExt: Executor {
    /// Schedules `f` for execution and returns a result observing its
    /// return value (or panic).
    ///
    /// # Errors
    ///
    /// Fails if the executor has shut down.
    fn submit<F, T>(&self, f: F) -> Result<AsyncResult<T>, ShutdownError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (task, result) = submission(f);
        self.enqueue(task)?;
        Ok(result)
    }

    /// Schedules `f` fire-and-forget. Panics from `f` are swallowed by the
    /// executor's worker (or terminate the process, for executors whose
    /// workers have no owner to report to; see the concrete types).
    ///
    /// # Errors
    ///
    /// Fails if the executor has shut down.
    fn post<F>(&self, f: F) -> Result<(), ShutdownError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(Task::new(f))
    }

    /// [`submit`][ExecutorExt::submit]s a batch of callables, preserving
    /// order.
    ///
    /// # Errors
    ///
    /// Fails if the executor has shut down; every result of the batch
    /// observes the broken-task error.
    fn bulk_submit<F, T>(
        &self,
        fns: impl IntoIterator<Item = F>,
    ) -> Result<Vec<AsyncResult<T>>, ShutdownError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tasks, results): (Vec<_>, Vec<_>) = fns.into_iter().map(submission).unzip();
        self.bulk_enqueue(tasks)?;
        Ok(results)
    }

    /// [`post`][ExecutorExt::post]s a batch of callables, preserving order.
    ///
    /// # Errors
    ///
    /// Fails if the executor has shut down.
    fn bulk_post<F>(&self, fns: impl IntoIterator<Item = F>) -> Result<(), ShutdownError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.bulk_enqueue(fns.into_iter().map(Task::new).collect())
    }

    /// Spawns a future onto this executor, returning a result observing its
    /// output.
    ///
    /// The future's first poll runs on this executor. After a suspension it
    /// resumes on whichever thread completes the awaited operation, like
    /// every other continuation in this crate; use
    /// [`resume_on`] to move it somewhere specific.
    ///
    /// # Errors
    ///
    /// Fails if the executor has shut down.
    fn spawn<Fut>(&self, future: Fut) -> Result<AsyncResult<Fut::Output>, ShutdownError>
    where
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let state = Arc::new(ResultState::new());
        let driver = Driver::new(async move { Ok(future.await) }, state.clone());

        let task = Task::with_cancel(
            {
                let driver = driver.clone();
                move || Driver::poll_now(&driver)
            },
            {
                let state = state.clone();
                move |reason| {
                    state.try_complete(Err(TaskError::Broken(reason)));
                }
            },
        );

        self.enqueue(task)?;
        Ok(AsyncResult::from_state(state))
    }
}

impl<E: Executor + ?Sized> ExecutorExt for E {}

/// Builds the task/result pair for a submitted callable: running the task
/// publishes the callable's return value (or panic), cancelling it publishes
/// the broken-task error.
pub(crate) fn submission<F, T>(f: F) -> (Task, AsyncResult<T>)
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let state = Arc::new(ResultState::new());
    let result = AsyncResult::from_state(state.clone());

    let task = Task::with_cancel(
        {
            let state = state.clone();
            move || state.complete(run_catching(f))
        },
        move |reason| {
            state.try_complete(Err(TaskError::Broken(reason)));
        },
    );

    (task, result)
}

/// An awaitable that unconditionally suspends the current coroutine and
/// resumes it on `executor`.
///
/// If the executor refuses the reschedule (it has shut down), the coroutine
/// resumes inline instead and the await yields a
/// [`TaskError::Executor`] pairing the refusing executor with the underlying
/// error: the continuation always eventually runs, just not where it asked
/// to.
pub fn resume_on(executor: Arc<dyn Executor>) -> ResumeOn {
    ResumeOn {
        executor,
        queued: false,
    }
}

/// Future returned by [`resume_on`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct ResumeOn {
    executor: Arc<dyn Executor>,
    queued: bool,
}

impl Future for ResumeOn {
    type Output = Result<(), TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.queued {
            return Poll::Ready(Ok(()));
        }

        let waker = cx.waker().clone();
        match self.executor.enqueue(Task::new(move || waker.wake())) {
            Ok(()) => {
                self.queued = true;
                Poll::Pending
            }
            Err(source) => Poll::Ready(Err(TaskError::Executor(ExecutorError {
                executor: self.executor.name(),
                source,
            }))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::Status;

    #[test]
    fn submit_runs_and_reports() {
        let executor = InlineExecutor::new();
        let result = executor.submit(|| 6 * 7).unwrap();
        assert_eq!(result.status(), Status::Value);
        assert_eq!(result.get().unwrap(), 42);
    }

    #[test]
    fn submit_captures_panics() {
        let executor = InlineExecutor::new();
        let result = executor.submit(|| -> u32 { panic!("oh no") }).unwrap();
        assert!(result.get().unwrap_err().is_panic());
    }

    #[test]
    fn submit_after_shutdown_fails() {
        let executor = InlineExecutor::new();
        executor.shutdown();
        let err = executor.submit(|| 1).unwrap_err();
        assert_eq!(err.name(), executor.name());
    }

    #[test]
    fn cancelled_submission_breaks_the_result() {
        let (mut task, result) = submission(|| 5);
        task.cancel(crate::error::BrokenTask::new("never ran"));
        assert!(result.get().unwrap_err().is_broken());
    }

    #[test]
    fn bulk_submit_preserves_order() {
        let executor = InlineExecutor::new();
        let results = executor
            .bulk_submit((0..10).map(|i| move || i * 2))
            .unwrap();
        for (i, result) in results.into_iter().enumerate() {
            assert_eq!(result.get().unwrap(), i * 2);
        }
    }

    #[test]
    fn spawn_drives_a_future() {
        let executor = InlineExecutor::new();
        let result = executor.spawn(async { 1 + 1 }).unwrap();
        assert_eq!(result.get().unwrap(), 2);
    }

    #[test]
    fn spawn_after_shutdown_fails() {
        let executor = InlineExecutor::new();
        executor.shutdown();
        assert!(executor.spawn(async {}).is_err());
    }

    #[test]
    fn resume_on_rejection_surfaces_the_executor_error() {
        let executor: Arc<dyn Executor> = Arc::new(InlineExecutor::new());
        executor.shutdown();

        let executor_name = executor.name();
        let outcome = futures::executor::block_on(resume_on(executor));
        match outcome.unwrap_err() {
            TaskError::Executor(err) => assert_eq!(err.executor(), executor_name),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn resume_on_hops_to_the_executor() {
        let executor: Arc<dyn Executor> = Arc::new(InlineExecutor::new());
        let outcome = futures::executor::block_on(resume_on(executor));
        assert!(outcome.is_ok());
    }
}
