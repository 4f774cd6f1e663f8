// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A general-purpose concurrency runtime: a small set of cooperating
//! executors, a composable asynchronous-value type, timer scheduling, and
//! asynchronous synchronization primitives built on top of them.

mod deque;
mod error;
pub mod executor;
mod loom;
pub mod result;
pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;

#[cfg(test)]
mod test_util;

pub use error::{BrokenTask, ExecutorError, Panicked, ShutdownError, TaskError};
pub use executor::{
    Executor, ExecutorExt, InlineExecutor, ManualExecutor, ResumeOn, ThreadExecutor,
    ThreadPoolExecutor, WorkerThreadExecutor, resume_on,
};
pub use result::{
    AsyncResult, LazyResult, Outcome, ResultPromise, SharedResult, Status, WhenAnyResult,
    make_exceptional_lazy_result, make_exceptional_result, make_ready_lazy_result,
    make_ready_result, when_all, when_any,
};
pub use runtime::{Runtime, RuntimeOptions, ThreadCallbacks};
pub use sync::{AsyncCondVar, AsyncLock, ScopedAsyncLock};
pub use task::Task;
pub use time::{Timer, TimerQueue};
