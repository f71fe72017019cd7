//! Request-scoped compute-once cell.

use std::future::Future;

use tokio::sync::OnceCell;

use crate::error::ReconcileResult;

/// Holds the outcome of a computation that must run at most once per
/// request, including its failure.
///
/// The first caller runs the computation; concurrent callers wait for it and
/// receive a clone of the same outcome. When the computing future is dropped
/// before it finishes, nothing is stored and the next caller starts over.
#[derive(Debug)]
pub struct ComputeOnce<T> {
    cell: OnceCell<ReconcileResult<T>>,
}

impl<T> Default for ComputeOnce<T> {
    fn default() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }
}

impl<T: Clone> ComputeOnce<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the stored outcome, computing it with `compute` if absent.
    pub async fn get_or_compute<F, Fut>(&self, compute: F) -> ReconcileResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ReconcileResult<T>>,
    {
        self.cell.get_or_init(compute).await.clone()
    }

    /// The stored outcome, if the computation already finished.
    pub fn get(&self) -> Option<ReconcileResult<T>> {
        self.cell.get().cloned()
    }

    /// Seed the cell with a known value. Returns false if it was already set.
    pub fn seed(&self, value: T) -> bool {
        self.cell.set(Ok(value)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReconcileError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_computation() {
        let once = Arc::new(ComputeOnce::<u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let once = Arc::clone(&once);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    once.get_or_compute(|| async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(7)
                    })
                    .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_cached() {
        let once = ComputeOnce::<u32>::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let err = once
                .get_or_compute(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ReconcileError::invariant("boom"))
                })
                .await
                .unwrap_err();
            assert!(err.is_invariant_violation());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_computation_is_not_stored() {
        let once = ComputeOnce::<u32>::new();

        let pending = once.get_or_compute(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(1)
        });
        let timed_out = tokio::time::timeout(Duration::from_millis(10), pending).await;
        assert!(timed_out.is_err());
        assert!(once.get().is_none());

        let value = once.get_or_compute(|| async { Ok(2) }).await.unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn test_seed_skips_computation() {
        let once = ComputeOnce::<u32>::new();
        assert!(once.seed(5));
        assert!(!once.seed(6));
        let value = once
            .get_or_compute(|| async { Err(ReconcileError::invariant("unreachable")) })
            .await
            .unwrap();
        assert_eq!(value, 5);
    }
}
