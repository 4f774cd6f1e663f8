// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::result::driver::Driver;
use crate::result::state::ResultState;
use crate::result::{AsyncResult, Outcome, Status};
use core::fmt;
use core::pin::Pin;
use core::task::{Context, Poll};
use std::sync::Arc;

/// A result whose producing body does not start until a consumer attaches.
///
/// Awaiting a `LazyResult` runs the body as part of the awaiting coroutine;
/// [`run`][LazyResult::run] converts it into an eager [`AsyncResult`],
/// starting the body immediately on the calling thread.
#[must_use = "lazy results do nothing unless `.await`ed or `run()`"]
pub struct LazyResult<T> {
    future: Option<Pin<Box<dyn Future<Output = Outcome<T>> + Send>>>,
}

// === impl LazyResult ===

impl<T> LazyResult<T>
where
    T: Send + 'static,
{
    pub(crate) fn from_future(future: impl Future<Output = Outcome<T>> + Send + 'static) -> Self {
        Self {
            future: Some(Box::pin(future)),
        }
    }

    /// Queries the result's status. A lazy result that has not been started
    /// is always [`Status::Idle`].
    #[must_use]
    pub fn status(&self) -> Status {
        Status::Idle
    }

    /// Starts the body eagerly, converting this into an [`AsyncResult`].
    ///
    /// The body runs on the calling thread up to its first suspension point;
    /// afterwards it resumes wherever its pending operations complete.
    pub fn run(mut self) -> AsyncResult<T> {
        let future = self.future.take().expect("lazy result already started");
        let state = Arc::new(ResultState::new());
        let driver = Driver::new(future, state.clone());
        Driver::poll_now(&driver);
        AsyncResult::from_state(state)
    }
}

impl<T> Future for LazyResult<T> {
    type Output = Outcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let future = self
            .future
            .as_mut()
            .expect("lazy result polled after completion");

        match future.as_mut().poll(cx) {
            Poll::Ready(outcome) => {
                self.future = None;
                Poll::Ready(outcome)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for LazyResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyResult")
            .field("started", &self.future.is_none())
            .finish()
    }
}
