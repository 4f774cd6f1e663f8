// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::error::TaskError;
use crate::result::state::ArmResult;
use crate::result::{AsyncResult, Outcome, Status};
use core::fmt;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};
use core::time::Duration;
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::Instant;

/// A refcounted, multi-consumer view over a result.
///
/// Unlike [`AsyncResult`], a `SharedResult` can be cloned and observed any
/// number of times: value outcomes are handed out by reference (the same
/// stable reference every time), error outcomes as clones sharing the same
/// underlying error object.
pub struct SharedResult<T> {
    shared: Arc<SharedState<T>>,
}

struct SharedState<T> {
    /// Written exactly once, when the underlying result completes.
    cell: OnceLock<Outcome<T>>,
    ready: Mutex<bool>,
    on_ready: Condvar,
    wakers: Mutex<Vec<Waker>>,
}

/// Future returned by [`SharedResult::resolve`].
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct SharedResolve<T> {
    shared: Option<SharedResult<T>>,
}

// === impl SharedResult ===

impl<T> SharedResult<T>
where
    T: Send + Sync + 'static,
{
    /// Wraps `result`, making its eventual outcome observable by any number
    /// of consumers.
    pub fn new(result: AsyncResult<T>) -> Self {
        let shared = Arc::new(SharedState {
            cell: OnceLock::new(),
            ready: Mutex::new(false),
            on_ready: Condvar::new(),
            wakers: Mutex::new(Vec::new()),
        });

        let state = result.state().clone();
        let armed = state.arm_callback(Box::new({
            let shared = shared.clone();
            let state = state.clone();
            move || shared.publish(state.take_outcome())
        }));
        if armed == ArmResult::AlreadyReady {
            shared.publish(state.take_outcome());
        }

        Self { shared }
    }

    /// Queries what the result currently holds, without blocking.
    #[must_use]
    pub fn status(&self) -> Status {
        match self.shared.cell.get() {
            None => Status::Idle,
            Some(Ok(_)) => Status::Value,
            Some(Err(_)) => Status::Error,
        }
    }

    /// Blocks until the result completes, returning a reference to the value
    /// or a clone of the error.
    pub fn get(&self) -> Result<&T, TaskError> {
        self.wait();
        match self.shared.cell.get().unwrap() {
            Ok(value) => Ok(value),
            Err(error) => Err(error.clone()),
        }
    }

    /// Blocks until the result completes.
    pub fn wait(&self) {
        let mut ready = self.shared.ready.lock().unwrap();
        while !*ready {
            ready = self.shared.on_ready.wait(ready).unwrap();
        }
    }

    /// Blocks until the result completes or `timeout` elapses, returning the
    /// status at wakeup.
    pub fn wait_for(&self, timeout: Duration) -> Status {
        self.wait_until(Instant::now() + timeout)
    }

    /// Blocks until the result completes or `deadline` passes, returning the
    /// status at wakeup.
    pub fn wait_until(&self, deadline: Instant) -> Status {
        let mut ready = self.shared.ready.lock().unwrap();
        while !*ready {
            let Some(timeout) = deadline
                .checked_duration_since(Instant::now())
                .filter(|d| !d.is_zero())
            else {
                return Status::Idle;
            };
            (ready, _) = self
                .shared
                .on_ready
                .wait_timeout(ready, timeout)
                .unwrap();
        }
        drop(ready);
        self.status()
    }

    /// Awaits completion, yielding a ready handle rather than the outcome.
    pub fn resolve(self) -> SharedResolve<T> {
        SharedResolve { shared: Some(self) }
    }

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<()> {
        let mut wakers = self.shared.wakers.lock().unwrap();
        if self.shared.cell.get().is_some() {
            Poll::Ready(())
        } else {
            wakers.push(cx.waker().clone());
            Poll::Pending
        }
    }
}

impl<T> SharedState<T> {
    fn publish(&self, outcome: Outcome<T>) {
        let stored = self.cell.set(outcome);
        debug_assert!(stored.is_ok(), "shared result published twice");

        *self.ready.lock().unwrap() = true;
        self.on_ready.notify_all();

        let wakers = std::mem::take(&mut *self.wakers.lock().unwrap());
        for waker in wakers {
            waker.wake();
        }
    }
}

impl<T> Clone for SharedResult<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> From<AsyncResult<T>> for SharedResult<T>
where
    T: Send + Sync + 'static,
{
    fn from(result: AsyncResult<T>) -> Self {
        Self::new(result)
    }
}

/// Awaiting a `SharedResult` yields a clone of the value (or of the error),
/// leaving the shared state observable by other consumers.
impl<T> Future for SharedResult<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.poll_ready(cx) {
            Poll::Ready(()) => match self.shared.cell.get().unwrap() {
                Ok(value) => Poll::Ready(Ok(value.clone())),
                Err(error) => Poll::Ready(Err(error.clone())),
            },
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for SharedResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedResult")
            .field("ready", &self.shared.cell.get().is_some())
            .finish()
    }
}

// === impl SharedResolve ===

impl<T> Future for SharedResolve<T>
where
    T: Send + Sync + 'static,
{
    type Output = SharedResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let shared = self
            .shared
            .as_ref()
            .expect("SharedResolve polled after completion");

        match shared.poll_ready(cx) {
            Poll::Ready(()) => Poll::Ready(self.shared.take().unwrap()),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{ResultPromise, make_exceptional_result, make_ready_result};

    #[test]
    fn repeated_get_returns_the_same_reference() {
        let shared = SharedResult::new(make_ready_result(String::from("stable")));

        let first: *const String = shared.get().unwrap();
        let second: *const String = shared.get().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn clones_observe_the_same_value() {
        let mut promise = ResultPromise::new();
        let shared = SharedResult::new(promise.get_result());
        let other = shared.clone();
        assert_eq!(shared.status(), Status::Idle);

        promise.set_result(11);

        assert_eq!(*shared.get().unwrap(), 11);
        assert_eq!(*other.get().unwrap(), 11);
    }

    #[test]
    fn error_outcomes_share_one_error_object() {
        let shared =
            SharedResult::new(make_exceptional_result::<u32>(TaskError::broken("gone")));

        let first = shared.get().unwrap_err();
        let second = shared.get().unwrap_err();
        match (first, second) {
            (TaskError::Broken(a), TaskError::Broken(b)) => assert_eq!(a, b),
            other => panic!("unexpected errors: {other:?}"),
        }
    }

    #[test]
    fn wrapping_a_completed_result_is_immediately_ready() {
        let shared = SharedResult::new(make_ready_result(3));
        assert_eq!(shared.status(), Status::Value);
        assert_eq!(*shared.get().unwrap(), 3);
    }

    #[test]
    fn awaiting_yields_clones() {
        let shared = SharedResult::new(make_ready_result(40));
        let value = futures::executor::block_on(shared.clone()).unwrap();
        assert_eq!(value, 40);
        // still observable afterwards
        assert_eq!(*shared.get().unwrap(), 40);
    }

    #[test]
    fn resolve_yields_a_ready_handle() {
        let shared = SharedResult::new(make_ready_result(2));
        let ready = futures::executor::block_on(shared.resolve());
        assert_eq!(ready.status(), Status::Value);
    }

    #[test]
    fn wait_for_reports_timeout_as_idle() {
        let mut promise = ResultPromise::<u32>::new();
        let shared = SharedResult::new(promise.get_result());
        assert_eq!(shared.wait_for(Duration::from_millis(5)), Status::Idle);
        promise.set_result(1);
        assert_eq!(shared.wait_for(Duration::from_millis(5)), Status::Value);
    }
}
