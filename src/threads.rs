use std::sync::atomic::{AtomicUsize, Ordering};

// 0 = let rayon decide (all cores), n > 0 = exactly n workers.
static THREADS: AtomicUsize = AtomicUsize::new(0);

/// Set the number of worker threads used by parallel regions
///
/// `0` restores the backend default (all available cores). Changing the
/// value between calls is fine; changing it during a call is undefined.
pub fn set_threads(n: usize) {
    THREADS.store(n, Ordering::Relaxed);
}

/// Get the configured number of worker threads
///
/// ### Returns
///
/// The configured count, `0` meaning the backend default.
pub fn get_threads() -> usize {
    THREADS.load(Ordering::Relaxed)
}

/// Run a parallel region under the configured worker count.
///
/// With a non-zero count the closure runs inside a scoped pool of exactly
/// that many workers; otherwise it runs on rayon's global pool.
pub(crate) fn scoped<R: Send>(f: impl FnOnce() -> R + Send) -> R {
    match get_threads() {
        0 => f(),
        n => rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build()
            .expect("failed to build worker pool")
            .install(f),
    }
}
