// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

pub(crate) mod driver;
mod lazy;
mod shared;
pub(crate) mod state;
pub mod when;

use crate::error::{Panicked, TaskError};
use core::fmt;
use core::pin::Pin;
use core::task::{Context, Poll};
use core::time::Duration;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

pub use lazy::LazyResult;
pub use shared::SharedResult;
pub use when::{WhenAnyResult, when_all, when_any};

use state::ResultState;

/// What a result currently holds.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Status {
    /// Nothing has been produced yet.
    Idle,
    /// A value has been published.
    Value,
    /// An error has been published.
    Error,
}

/// The outcome carried by a completed result: the produced value, or the way
/// the producing task failed.
pub type Outcome<T> = Result<T, TaskError>;

/// The consumer handle of a one-slot asynchronous value.
///
/// A result is produced by [`submit`][crate::executor::ExecutorExt::submit]ting
/// a callable, [`spawn`][crate::executor::ExecutorExt::spawn]ing a future, or
/// pairing with a [`ResultPromise`]. Consumers pick one of three disciplines:
///
/// * **blocking**: [`get`][AsyncResult::get], [`wait`][AsyncResult::wait],
///   [`wait_for`][AsyncResult::wait_for];
/// * **awaiting**: `AsyncResult` is a [`Future`] yielding the [`Outcome`];
/// * **resolving**: [`resolve`][AsyncResult::resolve] awaits readiness but
///   yields the handle itself, so the outcome can be inspected without being
///   unwrapped.
#[must_use = "results do nothing unless consumed"]
pub struct AsyncResult<T> {
    state: Arc<ResultState<T>>,
}

/// Future returned by [`AsyncResult::resolve`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Resolve<T> {
    result: Option<AsyncResult<T>>,
}

/// The producer handle of a one-slot asynchronous value.
///
/// Dropping an unfulfilled promise completes the state with a
/// [`BrokenTask`][crate::BrokenTask] error so the consumer is never left
/// hanging.
pub struct ResultPromise<T> {
    state: Option<Arc<ResultState<T>>>,
    retrieved: bool,
}

// === impl AsyncResult ===

impl<T> AsyncResult<T> {
    pub(crate) fn from_state(state: Arc<ResultState<T>>) -> Self {
        Self { state }
    }

    pub(crate) fn state(&self) -> &Arc<ResultState<T>> {
        &self.state
    }

    /// Queries what the result currently holds, without blocking.
    ///
    /// # Panics
    ///
    /// Panics if the outcome was already consumed through `poll`/`get`.
    #[must_use]
    pub fn status(&self) -> Status {
        self.state.status()
    }

    /// Blocks the calling thread until the result completes and returns the
    /// outcome.
    pub fn get(self) -> Outcome<T> {
        self.state.wait();
        self.state.take_outcome()
    }

    /// Blocks the calling thread until the result completes.
    pub fn wait(&self) {
        self.state.wait();
    }

    /// Blocks until the result completes or `timeout` elapses, returning the
    /// status at wakeup. A zero timeout degenerates to [`status`][Self::status].
    pub fn wait_for(&self, timeout: Duration) -> Status {
        self.state.wait_for(timeout)
    }

    /// Blocks until the result completes or `deadline` passes, returning the
    /// status at wakeup.
    pub fn wait_until(&self, deadline: Instant) -> Status {
        self.state.wait_until(deadline)
    }

    /// Awaits completion, yielding the ready handle itself rather than the
    /// outcome.
    pub fn resolve(self) -> Resolve<T> {
        Resolve { result: Some(self) }
    }
}

impl<T> Future for AsyncResult<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.state.poll_take(cx)
    }
}

impl<T> fmt::Debug for AsyncResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncResult").finish_non_exhaustive()
    }
}

// === impl Resolve ===

impl<T> Future for Resolve<T> {
    type Output = AsyncResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = self
            .result
            .as_ref()
            .expect("Resolve polled after completion");

        match result.state.poll_ready(cx) {
            Poll::Ready(()) => Poll::Ready(self.result.take().unwrap()),
            Poll::Pending => Poll::Pending,
        }
    }
}

// === impl ResultPromise ===

impl<T> ResultPromise<T> {
    #[expect(clippy::new_without_default, reason = "promises are deliberately explicit")]
    pub fn new() -> Self {
        Self {
            state: Some(Arc::new(ResultState::new())),
            retrieved: false,
        }
    }

    /// Returns the consumer handle associated with this promise.
    ///
    /// # Panics
    ///
    /// Panics if called more than once.
    pub fn get_result(&mut self) -> AsyncResult<T> {
        assert!(!self.retrieved, "result already retrieved from promise");
        self.retrieved = true;
        AsyncResult::from_state(self.state.as_ref().unwrap().clone())
    }

    /// Publishes `value`, completing the associated result.
    pub fn set_result(mut self, value: T) {
        self.state.take().unwrap().complete(Ok(value));
    }

    /// Publishes `error`, completing the associated result.
    pub fn set_error(mut self, error: TaskError) {
        self.state.take().unwrap().complete(Err(error));
    }

    /// Runs `f` and publishes its return value, or the panic it unwound with.
    pub fn set_from_function<F>(mut self, f: F)
    where
        F: FnOnce() -> T,
    {
        let outcome = run_catching(f);
        self.state.take().unwrap().complete(outcome);
    }

    pub(crate) fn complete(mut self, outcome: Outcome<T>) {
        self.state.take().unwrap().complete(outcome);
    }
}

impl<T> Drop for ResultPromise<T> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            state.complete(Err(TaskError::broken(
                "result_promise was destroyed before the result was set",
            )));
        }
    }
}

impl<T> fmt::Debug for ResultPromise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultPromise")
            .field("retrieved", &self.retrieved)
            .finish_non_exhaustive()
    }
}

/// Runs `f`, converting a panic into a [`TaskError::Panicked`] outcome.
pub(crate) fn run_catching<T, F>(f: F) -> Outcome<T>
where
    F: FnOnce() -> T,
{
    catch_unwind(AssertUnwindSafe(f))
        .map_err(|payload| TaskError::Panicked(Panicked::from_payload(payload.as_ref())))
}

/// Creates a result that is already completed with `value`.
pub fn make_ready_result<T>(value: T) -> AsyncResult<T> {
    let state = Arc::new(ResultState::new());
    state.complete(Ok(value));
    AsyncResult::from_state(state)
}

/// Creates a result that is already completed with `error`.
pub fn make_exceptional_result<T>(error: TaskError) -> AsyncResult<T> {
    let state = Arc::new(ResultState::new());
    state.complete(Err(error));
    AsyncResult::from_state(state)
}

/// Creates a lazy result whose body immediately produces `value` once
/// started.
pub fn make_ready_lazy_result<T>(value: T) -> LazyResult<T>
where
    T: Send + 'static,
{
    LazyResult::from_future(async move { Ok(value) })
}

/// Creates a lazy result whose body immediately produces `error` once
/// started.
pub fn make_exceptional_lazy_result<T>(error: TaskError) -> LazyResult<T>
where
    T: Send + 'static,
{
    LazyResult::from_future(async move { Err(error) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn promise_fulfills_result() {
        let mut promise = ResultPromise::new();
        let result = promise.get_result();
        assert_eq!(result.status(), Status::Idle);

        promise.set_result(99);
        assert_eq!(result.status(), Status::Value);
        assert_eq!(result.get().unwrap(), 99);
    }

    #[test]
    #[should_panic(expected = "result already retrieved")]
    fn second_get_result_panics() {
        let mut promise = ResultPromise::<()>::new();
        let _first = promise.get_result();
        let _second = promise.get_result();
    }

    #[test]
    fn dropped_promise_breaks_the_result() {
        let mut promise = ResultPromise::<u32>::new();
        let result = promise.get_result();
        drop(promise);

        let err = result.get().unwrap_err();
        assert!(err.is_broken());
    }

    #[test]
    fn set_from_function_captures_panics() {
        let mut promise = ResultPromise::<u32>::new();
        let result = promise.get_result();
        promise.set_from_function(|| panic!("whoops"));

        match result.get().unwrap_err() {
            TaskError::Panicked(p) => assert_eq!(p.message(), "whoops"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn cross_thread_get() {
        let mut promise = ResultPromise::new();
        let result = promise.get_result();

        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            promise.set_result("hello");
        });

        assert_eq!(result.get().unwrap(), "hello");
        producer.join().unwrap();
    }

    #[test]
    fn wait_for_reports_timeout_as_idle() {
        let mut promise = ResultPromise::<u32>::new();
        let result = promise.get_result();
        assert_eq!(result.wait_for(Duration::from_millis(5)), Status::Idle);

        promise.set_result(1);
        assert_eq!(result.wait_for(Duration::from_millis(5)), Status::Value);
    }

    #[test]
    fn ready_factories() {
        assert_eq!(make_ready_result(5).get().unwrap(), 5);

        let err = make_exceptional_result::<u32>(TaskError::broken("nope"))
            .get()
            .unwrap_err();
        assert!(err.is_broken());
    }

    #[test]
    fn await_yields_outcome() {
        let mut promise = ResultPromise::new();
        let result = promise.get_result();
        promise.set_result(7);

        let value = futures::executor::block_on(result).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn resolve_yields_a_ready_handle() {
        let mut promise = ResultPromise::new();
        let result = promise.get_result();
        promise.set_result(3);

        let ready = futures::executor::block_on(result.resolve());
        assert_eq!(ready.status(), Status::Value);
        assert_eq!(ready.get().unwrap(), 3);
    }
}
