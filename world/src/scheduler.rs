//! The bounded worker pool shared by the loader and generator: a `tokio`
//! runtime, named worker threads, and a blocking single-thread mode for
//! deterministic tests.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::*;
use config::WorldConfig;
use tokio::runtime::{Builder, Runtime};

use crate::error::SchedulerError;

/// `coreThreads = 2`, `maxThreads = max(2, cpus)`.
pub struct Scheduler {
    runtime: Runtime,
    blocking: bool,
}

impl Scheduler {
    /// Runs submitted jobs on a real multi-thread pool. `core_threads` is a
    /// floor on the worker count: tokio's multi-thread runtime has no
    /// elastic core/max pool, so `core_threads` and `max_threads` are
    /// collapsed into a single `worker_threads` count, taking whichever is
    /// larger.
    pub fn new(
        core_threads: usize,
        max_threads: usize,
        keep_alive_seconds: u64,
    ) -> Result<Self, SchedulerError> {
        let threads = max_threads.max(core_threads).max(2);
        let mut builder = Builder::new_multi_thread();
        builder
            .worker_threads(threads)
            .thread_keep_alive(Duration::from_secs(keep_alive_seconds))
            .thread_name_fn(|| {
                static NEXT: AtomicUsize = AtomicUsize::new(0);
                let id = NEXT.fetch_add(1, Ordering::Relaxed);
                format!("world-worker-{}", id)
            })
            .on_thread_start(|| trace!("world worker thread starting"))
            .enable_time();

        let runtime = builder.build()?;
        Ok(Self {
            runtime,
            blocking: false,
        })
    }

    /// Builds the pool from the world's loaded config: `coreThreads`,
    /// `maxThreads` and the keep-alive all come from [`WorldConfig`] rather
    /// than being hand-wired per host.
    pub fn from_config(cfg: &WorldConfig) -> Result<Self, SchedulerError> {
        Self::new(cfg.core_threads, cfg.max_threads(), cfg.keep_alive_seconds)
    }

    /// Runs submitted jobs synchronously on the calling thread; used by
    /// scenario tests that need deterministic ordering without sleeps.
    pub fn new_blocking() -> Result<Self, SchedulerError> {
        let runtime = Builder::new_current_thread().enable_time().build()?;
        Ok(Self {
            runtime,
            blocking: true,
        })
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// FIFO-submits a fire-and-forget job; completion is observed through
    /// whatever callback the job itself invokes, not through a returned
    /// handle. On the blocking scheduler
    /// the job runs to completion before this returns, giving scenario
    /// tests deterministic ordering; on the real pool it runs on the
    /// worker threads.
    pub fn spawn<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.blocking {
            self.runtime.block_on(job);
        } else {
            self.runtime.spawn(job);
        }
    }

    /// Blocks on a future using this scheduler's runtime; used by callers
    /// (the tick thread) that need a synchronous result from async work.
    pub fn block_on<F: Future>(&self, job: F) -> F::Output {
        self.runtime.block_on(job)
    }

    /// Refuses new submissions (the caller must stop calling `submit` -
    /// there is no further gate here; the pipeline's own
    /// `cancel_load_operations` flag is what actually stops new loads) and
    /// waits up to `drain_seconds` for in-flight work, logging a warning if
    /// it doesn't drain in time.
    pub fn shutdown(self, drain_seconds: u64) {
        let deadline = Duration::from_secs(drain_seconds);
        self.runtime.shutdown_timeout(deadline);
    }
}
