use log::debug;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParallelError {
    #[error("Thread error: {0}")]
    ThreadError(String),

    #[error("Invalid thread count: {0}")]
    InvalidThreadCount(usize),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Cooperative cancellation flag shared between the caller and workers.
///
/// Workers poll it between units of work (rows); setting it makes the
/// running computation return [`ParallelError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Returns `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<(), ParallelError> {
        if self.is_cancelled() {
            Err(ParallelError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Builds a dedicated rayon pool with `threads` workers.
pub fn build_pool(threads: usize) -> Result<rayon::ThreadPool, ParallelError> {
    if threads == 0 {
        return Err(ParallelError::InvalidThreadCount(0));
    }
    debug!("Building thread pool with {} threads", threads);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| ParallelError::ThreadError(format!("Failed to build thread pool: {}", e)))
}

/// Maps every index in `0..n` in parallel, keeping results in index order.
///
/// The token is checked before each item; the first cancellation observed
/// aborts the whole map. Because each result is stored at its own index the
/// output does not depend on scheduling.
pub fn par_map_indexed<U, F>(n: usize, cancel: &CancelToken, f: F) -> Result<Vec<U>, ParallelError>
where
    U: Send,
    F: Fn(usize) -> U + Send + Sync,
{
    (0..n)
        .into_par_iter()
        .map(|i| {
            cancel.check()?;
            Ok(f(i))
        })
        .collect()
}
