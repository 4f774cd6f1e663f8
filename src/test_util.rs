// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

#![allow(dead_code, reason = "not every test module uses every helper")]

use crate::executor::Executor;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs a fmt subscriber honoring `RUST_LOG` for the current test.
pub(crate) fn trace_init() -> tracing::subscriber::DefaultGuard {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .set_default()
}

/// RAII helper that shuts an executor down at scope exit, so tests cannot
/// leak worker threads on assertion failures.
pub(crate) struct ExecutorShutdowner(pub(crate) Arc<dyn Executor>);

impl Drop for ExecutorShutdowner {
    fn drop(&mut self) {
        self.0.shutdown();
    }
}
