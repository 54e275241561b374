use crate::directory::Worker;

/// Index of the worker with the least workload.
///
/// Scans left to right and only moves on a strictly smaller workload, so ties
/// go to the earliest worker in the list.
///
/// # Panics
///
/// `workers` must not be empty; callers check for alive workers first.
pub fn least_loaded(workers: &[Worker]) -> usize {
    assert!(!workers.is_empty(), "least_loaded called without workers");

    let mut found = 0;
    for (i, worker) in workers.iter().enumerate() {
        if worker.workload < workers[found].workload {
            found = i;
        }
    }
    found
}
