//! Parallel validation over the isolated validator pool.

use estuary_chain::ValidationError;
use rayon::prelude::*;
use std::sync::Arc;

/// Fans validation work out across the isolated rayon validator pool.
///
/// This is the only intra-consumer parallelism in the pipelines; `install`
/// keeps the parallel iterators off the global rayon pool.
#[derive(Clone)]
pub struct ParallelValidationPolicy {
    pool: Arc<rayon::ThreadPool>,
}

impl ParallelValidationPolicy {
    /// Wrap the validator pool.
    pub fn new(pool: Arc<rayon::ThreadPool>) -> Self {
        Self { pool }
    }

    /// Validate every item, failing the whole batch on any failure.
    pub fn validate_all<T, F>(&self, items: &[T], validate: F) -> Result<(), ValidationError>
    where
        T: Sync,
        F: Fn(&T) -> Result<(), ValidationError> + Send + Sync,
    {
        self.pool
            .install(|| items.par_iter().try_for_each(|item| validate(item)))
    }

    /// Validate every item independently, returning per-item results in
    /// input order.
    pub fn validate_each<T, F>(&self, items: &[T], validate: F) -> Vec<Result<(), ValidationError>>
    where
        T: Sync,
        F: Fn(&T) -> Result<(), ValidationError> + Send + Sync,
    {
        self.pool
            .install(|| items.par_iter().map(|item| validate(item)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ParallelValidationPolicy {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(2)
            .build()
            .unwrap();
        ParallelValidationPolicy::new(Arc::new(pool))
    }

    #[test]
    fn validate_all_fails_on_any_failure() {
        let policy = policy();
        let items: Vec<u64> = (0..100).collect();
        assert!(policy.validate_all(&items, |_| Ok(())).is_ok());
        assert_eq!(
            policy.validate_all(&items, |item| {
                if *item == 57 {
                    Err(ValidationError::ZeroAmount)
                } else {
                    Ok(())
                }
            }),
            Err(ValidationError::ZeroAmount)
        );
    }

    #[test]
    fn validate_each_keeps_input_order() {
        let policy = policy();
        let items: Vec<u64> = (0..16).collect();
        let results = policy.validate_each(&items, |item| {
            if item % 2 == 0 {
                Ok(())
            } else {
                Err(ValidationError::ZeroAmount)
            }
        });
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.is_ok(), i % 2 == 0);
        }
    }
}
