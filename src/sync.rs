// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Asynchronous synchronization primitives built on top of the result state:
//! a cooperative FIFO mutex and a condition variable whose waiters resume on
//! an executor of their choosing.

mod async_lock;
mod condvar;

pub use async_lock::{AsyncLock, ScopedAsyncLock};
pub use condvar::AsyncCondVar;
