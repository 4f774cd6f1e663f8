// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::any::Any;
use core::error::Error;
use core::fmt;
use std::sync::Arc;

/// Error returned when submitting work to an executor (or registering a timer)
/// that has been shut down.
///
/// The contained name identifies the component that refused the work.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ShutdownError(pub(crate) &'static str);

/// The producing side of a result was destroyed before it could run to
/// completion.
///
/// This is the error delivered to every task still sitting in an executor
/// queue when the executor shuts down, and to result consumers whose promise
/// was dropped unfulfilled.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BrokenTask {
    reason: &'static str,
}

/// The producing task panicked.
///
/// The panic payload's message is retained (shared between all clones of this
/// error, so every consumer of a [`SharedResult`][crate::SharedResult]
/// observes the same object).
#[derive(Clone, Debug)]
pub struct Panicked {
    message: Arc<str>,
}

/// An executor refused to accept a continuation that had to be scheduled onto
/// it, pairing the refusing executor's name with the underlying error.
///
/// The continuation still runs, inline on the thread that attempted the
/// enqueue; this error is what it observes instead of the awaited value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecutorError {
    pub(crate) executor: &'static str,
    pub(crate) source: ShutdownError,
}

/// The ways a result can fail to carry a value.
#[derive(Clone, Debug)]
pub enum TaskError {
    /// The producing task was cancelled before it could run.
    Broken(BrokenTask),
    /// The producing task panicked.
    Panicked(Panicked),
    /// A continuation could not be scheduled onto its resume executor.
    Executor(ExecutorError),
}

// === impl ShutdownError ===

impl ShutdownError {
    /// The name of the executor or timer queue that refused the operation.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` was shut down", self.0)
    }
}

impl Error for ShutdownError {}

// === impl BrokenTask ===

impl BrokenTask {
    pub(crate) const fn new(reason: &'static str) -> Self {
        Self { reason }
    }

    /// A human-readable description of why the task was abandoned.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        self.reason
    }
}

impl fmt::Display for BrokenTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task was broken: {}", self.reason)
    }
}

impl Error for BrokenTask {}

// === impl Panicked ===

impl Panicked {
    /// Extract the message of a panic payload, as produced by `catch_unwind`.
    ///
    /// `&str` and `String` payloads (which is what `panic!` produces) are
    /// retained verbatim, anything else is replaced by a placeholder.
    pub(crate) fn from_payload(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(msg) = payload.downcast_ref::<&'static str>() {
            Arc::from(*msg)
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            Arc::from(msg.as_str())
        } else {
            Arc::from("<non-string panic payload>")
        };

        Self { message }
    }

    /// The message the producing task panicked with.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl PartialEq for Panicked {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.message, &other.message)
    }
}

impl fmt::Display for Panicked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task panicked: {}", self.message)
    }
}

impl Error for Panicked {}

// === impl ExecutorError ===

impl ExecutorError {
    /// The name of the executor that rejected the continuation.
    #[must_use]
    pub fn executor(&self) -> &'static str {
        self.executor
    }
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "an error occurred while scheduling a continuation onto `{}`: {}",
            self.executor, self.source
        )
    }
}

impl Error for ExecutorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

// === impl TaskError ===

impl TaskError {
    pub(crate) fn broken(reason: &'static str) -> Self {
        Self::Broken(BrokenTask::new(reason))
    }

    /// Returns `true` if the producing task was cancelled.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        matches!(self, Self::Broken(_))
    }

    /// Returns `true` if the producing task panicked.
    #[must_use]
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Broken(err) => fmt::Display::fmt(err, f),
            Self::Panicked(err) => fmt::Display::fmt(err, f),
            Self::Executor(err) => fmt::Display::fmt(err, f),
        }
    }
}

impl Error for TaskError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Broken(err) => Some(err),
            Self::Panicked(err) => Some(err),
            Self::Executor(err) => Some(err),
        }
    }
}

impl From<BrokenTask> for TaskError {
    fn from(err: BrokenTask) -> Self {
        Self::Broken(err)
    }
}

impl From<ExecutorError> for TaskError {
    fn from(err: ExecutorError) -> Self {
        Self::Executor(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_error_display() {
        let err = ShutdownError("weft::thread_pool_executor");
        assert_eq!(
            err.to_string(),
            "`weft::thread_pool_executor` was shut down"
        );
        assert_eq!(err.name(), "weft::thread_pool_executor");
    }

    #[test]
    fn panicked_retains_str_payloads() {
        let res = std::panic::catch_unwind(|| panic!("boom"));
        let payload = res.unwrap_err();
        let panicked = Panicked::from_payload(payload.as_ref());
        assert_eq!(panicked.message(), "boom");

        // clones share the same payload object
        let clone = panicked.clone();
        assert_eq!(clone, panicked);
    }

    #[test]
    fn task_error_sources_chain() {
        let err = TaskError::Executor(ExecutorError {
            executor: "weft::manual_executor",
            source: ShutdownError("weft::manual_executor"),
        });
        let source = err.source().expect("executor error has a source");
        let inner = source.source().expect("shutdown error is chained");
        assert_eq!(inner.to_string(), "`weft::manual_executor` was shut down");
    }
}
