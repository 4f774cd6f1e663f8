// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::error::{BrokenTask, ShutdownError};
use crate::executor::Executor;
use crate::loom::sync::atomic::{AtomicBool, Ordering};
use crate::task::Task;

pub(crate) const NAME: &str = "weft::inline_executor";
const CANCEL_REASON: &str = "weft::inline_executor was shut down";

/// An executor that runs tasks directly inside [`enqueue`][Executor::enqueue],
/// on the calling thread.
///
/// Useful as a resume executor for continuations that should run wherever
/// their trigger fires, and in tests.
#[derive(Debug, Default)]
pub struct InlineExecutor {
    shutdown: AtomicBool,
}

// === impl InlineExecutor ===

impl InlineExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shutdown: AtomicBool::new(false),
        }
    }
}

impl Executor for InlineExecutor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn enqueue(&self, mut task: Task) -> Result<(), ShutdownError> {
        if self.shutdown.load(Ordering::Acquire) {
            task.cancel(BrokenTask::new(CANCEL_REASON));
            return Err(ShutdownError(NAME));
        }

        task.run();
        Ok(())
    }

    fn max_concurrency_level(&self) -> usize {
        0
    }

    fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn shutdown_reason(&self) -> &'static str {
        CANCEL_REASON
    }
}
