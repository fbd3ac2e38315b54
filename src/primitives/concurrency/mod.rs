//! Structured fan-out for read-only store fetches.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::warn;

/// Runs independent read tasks either inline or on rayon workers.
///
/// Every call joins all of its tasks before returning, so no task outlives the
/// operation that spawned it. The per-group fan-out runs on a dedicated pool when a
/// thread cap is configured, otherwise on the global rayon pool.
pub struct FetchPool {
    parallel: bool,
    pool: Option<ThreadPool>,
}

impl FetchPool {
    /// Builds a pool. `threads == 0` uses the global rayon pool.
    pub fn new(parallel: bool, threads: usize) -> Self {
        let pool = if parallel && threads > 0 {
            match ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|index| format!("dbtree-fetch-{index}"))
                .build()
            {
                Ok(pool) => Some(pool),
                Err(err) => {
                    warn!(threads, error = %err, "dbtree.pool.fallback_global");
                    None
                }
            }
        } else {
            None
        };
        Self { parallel, pool }
    }

    /// Runs all tasks on the calling thread.
    pub fn sequential() -> Self {
        Self::new(false, 0)
    }

    /// Returns true if tasks may run concurrently.
    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// Runs three tasks and waits for all of them.
    pub fn join3<A, B, C, RA, RB, RC>(&self, a: A, b: B, c: C) -> (RA, RB, RC)
    where
        A: FnOnce() -> RA + Send,
        B: FnOnce() -> RB + Send,
        C: FnOnce() -> RC + Send,
        RA: Send,
        RB: Send,
        RC: Send,
    {
        if !self.parallel {
            return (a(), b(), c());
        }
        let run = move || {
            let (ra, (rb, rc)) = rayon::join(a, || rayon::join(b, c));
            (ra, rb, rc)
        };
        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }

    /// Applies `f` to every item, preserving input order in the output.
    pub fn map<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Send + Sync,
    {
        if !self.parallel {
            return items.into_iter().map(f).collect();
        }
        match &self.pool {
            Some(pool) => pool.install(|| items.into_par_iter().map(f).collect()),
            None => items.into_par_iter().map(f).collect(),
        }
    }
}

impl std::fmt::Debug for FetchPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchPool")
            .field("parallel", &self.parallel)
            .field("threads", &self.pool.as_ref().map(ThreadPool::current_num_threads))
            .finish()
    }
}
