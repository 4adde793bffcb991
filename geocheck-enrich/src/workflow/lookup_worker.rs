//! Isolated lookup worker
//!
//! Runs an async job on a dedicated OS thread with its own tokio runtime and
//! blocks the caller until it finishes. This keeps the blocking pipeline
//! entry point usable from plain `main` as well as from inside an existing
//! runtime, where `block_on` on the caller's thread would panic.

use geocheck_common::{Error, Result};
use std::future::Future;
use tracing::debug;

/// Worker that owns the runtime for blocking batch runs
#[derive(Debug, Clone, Copy, Default)]
pub struct LookupWorker {
    /// Runtime worker threads; tokio's default (one per core) when `None`
    worker_threads: Option<usize>,
}

impl LookupWorker {
    pub fn new(worker_threads: Option<usize>) -> Self {
        Self {
            worker_threads: worker_threads.filter(|n| *n > 0),
        }
    }

    pub fn worker_threads(&self) -> Option<usize> {
        self.worker_threads
    }

    /// Run `job` to completion on the worker thread
    pub fn run_blocking<F, Fut, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T>,
        T: Send + 'static,
    {
        let worker_threads = self.worker_threads;

        let handle = std::thread::Builder::new()
            .name("geocheck-lookup".to_string())
            .spawn(move || -> Result<T> {
                let mut builder = tokio::runtime::Builder::new_multi_thread();
                builder.enable_all();
                if let Some(threads) = worker_threads {
                    builder.worker_threads(threads);
                }
                let runtime = builder.build()?;
                debug!(?worker_threads, "Lookup worker runtime started");
                Ok(runtime.block_on(job()))
            })?;

        handle
            .join()
            .map_err(|_| Error::Internal("Lookup worker thread panicked".to_string()))?
    }
}
