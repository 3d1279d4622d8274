/// Worker pool sizing for batch execution.
///
/// Batches run on a local rayon pool rather than the global one, so an
/// embedding application keeps control of its own threads.

use tracing::debug;

use crate::domain::error::{EngineError, EngineResult};

/// Half the logical cores, minimum 1 worker.
pub fn default_workers() -> usize {
    std::cmp::max(1, num_cpus::get() / 2)
}

/// Build a pool with `workers` threads.
pub fn build_pool(workers: usize) -> EngineResult<rayon::ThreadPool> {
    let workers = std::cmp::max(1, workers);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("arborist-worker-{}", i))
        .build()
        .map_err(|e| EngineError::Config(format!("cannot build worker pool: {}", e)))?;

    debug!(
        "Built worker pool: {} workers (system has {} cores)",
        workers,
        num_cpus::get()
    );
    Ok(pool)
}
