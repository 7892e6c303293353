//! Data-parallel helpers backed by one process-wide worker pool.
//!
//! The pool is sized once, either explicitly through [`configure_threads`]
//! before first use or lazily to the machine's physical core count. All
//! helpers block the caller until every index has been processed.

use std::sync::OnceLock;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{info, warn};

static POOL: OnceLock<Option<ThreadPool>> = OnceLock::new();

/// Number of physical cores, not counting hyperthread siblings.
pub fn default_threads() -> usize {
    num_cpus::get_physical().max(1)
}

fn build(threads: usize) -> Option<ThreadPool> {
    let threads = threads.max(1);
    match ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("infer-worker-{}", i))
        .build()
    {
        Ok(pool) => {
            info!(threads, "worker pool started");
            Some(pool)
        }
        Err(e) => {
            warn!(error = %e, "failed to start worker pool, using rayon's global pool");
            None
        }
    }
}

/// Size the worker pool. Only the first call (or the first parallel
/// operation) decides the size; later calls are ignored with a warning.
///
/// Returns true if this call configured the pool.
pub fn configure_threads(threads: usize) -> bool {
    let mut configured = false;
    POOL.get_or_init(|| {
        configured = true;
        build(threads)
    });
    if !configured {
        warn!(
            requested = threads,
            current = thread_count(),
            "worker pool already configured"
        );
    }
    configured
}

/// Number of worker threads parallel operations run on.
pub fn thread_count() -> usize {
    match pool() {
        Some(pool) => pool.current_num_threads(),
        None => rayon::current_num_threads(),
    }
}

fn pool() -> Option<&'static ThreadPool> {
    POOL.get_or_init(|| build(default_threads())).as_ref()
}

/// Run `op` inside the worker pool so rayon iterators inside it use the
/// pool's threads.
pub fn install<R, F>(op: F) -> R
where
    R: Send,
    F: FnOnce() -> R + Send,
{
    match pool() {
        Some(pool) => pool.install(op),
        None => op(),
    }
}

/// Call `action(i)` for every `i` in `start..end`, in no particular order.
pub fn parallel_for<F>(start: usize, end: usize, action: F)
where
    F: Fn(usize) + Sync + Send,
{
    install(|| (start..end).into_par_iter().for_each(action))
}

/// Collect `f(i)` for every `i` in `start..end`, in index order.
pub fn parallel_map<T, F>(start: usize, end: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    install(|| (start..end).into_par_iter().map(f).collect())
}

/// Set `out[i] = f(i)` for every slot.
pub fn parallel_fill<T, F>(out: &mut [T], f: F)
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    install(|| {
        out.par_iter_mut()
            .enumerate()
            .for_each(|(i, slot)| *slot = f(i))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_parallel_for_visits_every_index_once() {
        let hits: Vec<AtomicUsize> = (0..100).map(|_| AtomicUsize::new(0)).collect();
        parallel_for(10, 90, |i| {
            hits[i].fetch_add(1, Ordering::Relaxed);
        });
        for (i, h) in hits.iter().enumerate() {
            let expected = usize::from((10..90).contains(&i));
            assert_eq!(h.load(Ordering::Relaxed), expected, "index {}", i);
        }
    }

    #[test]
    fn test_parallel_for_empty_range() {
        let calls = AtomicUsize::new(0);
        parallel_for(5, 5, |_| {
            calls.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_parallel_map_keeps_order() {
        let squares = parallel_map(0, 50, |i| i * i);
        assert_eq!(squares, (0..50).map(|i| i * i).collect::<Vec<_>>());
    }

    #[test]
    fn test_parallel_fill() {
        let mut out = vec![0usize; 33];
        parallel_fill(&mut out, |i| i + 1);
        assert_eq!(out[0], 1);
        assert_eq!(out[32], 33);
    }

    #[test]
    fn test_default_threads_is_physical_core_count() {
        assert_eq!(default_threads(), num_cpus::get_physical().max(1));
    }

    #[test]
    fn test_pool_is_configured_once() {
        let _ = thread_count();
        assert!(!configure_threads(3));
        assert!(thread_count() >= 1);
    }
}
