//! Concurrency planning module for Image Squisher
//!
//! Derives the worker pool size and the conversion bound from configuration.

use crate::config::Config;

/// Conversions launched per job: one per target format.
pub const CONVERSIONS_PER_JOB: u32 = 2;

/// Concurrency plan derived from configuration and system resources
#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencyPlan {
    /// Total logical CPU cores available
    pub total_cores: u32,
    /// Number of pool workers, each running one image pipeline at a time
    pub workers: u32,
    /// Upper bound on encoder processes alive at once
    pub max_in_flight_conversions: u32,
}

impl ConcurrencyPlan {
    /// Derive a concurrency plan from configuration
    ///
    /// - Detects CPU cores via num_cpus
    /// - Uses `processing.threads` when set, otherwise one worker per core
    /// - Bounds in-flight conversions to two per worker
    pub fn derive(cfg: &Config) -> Self {
        let total_cores = num_cpus::get() as u32;
        let workers = cfg.processing.threads.unwrap_or(total_cores).max(1);

        Self {
            total_cores,
            workers,
            max_in_flight_conversions: workers * CONVERSIONS_PER_JOB,
        }
    }

    /// A plan with an explicit worker count, independent of the host.
    pub fn with_workers(workers: u32) -> Self {
        let workers = workers.max(1);
        Self {
            total_cores: num_cpus::get() as u32,
            workers,
            max_in_flight_conversions: workers * CONVERSIONS_PER_JOB,
        }
    }
}

/// Public function to derive a concurrency plan from configuration
pub fn derive_plan(cfg: &Config) -> ConcurrencyPlan {
    ConcurrencyPlan::derive(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_explicit_threads_are_used(threads in 1u32..512) {
            let mut cfg = Config::default();
            cfg.processing.threads = Some(threads);

            let plan = derive_plan(&cfg);

            prop_assert_eq!(plan.workers, threads);
            prop_assert_eq!(plan.max_in_flight_conversions, threads * 2);
        }
    }

    #[test]
    fn test_auto_threads_follow_core_count() {
        let cfg = Config::default();
        let plan = derive_plan(&cfg);

        assert_eq!(plan.workers, num_cpus::get() as u32);
        assert_eq!(plan.total_cores, num_cpus::get() as u32);
        assert_eq!(plan.max_in_flight_conversions, plan.workers * 2);
    }

    #[test]
    fn test_with_workers_never_zero() {
        let plan = ConcurrencyPlan::with_workers(0);
        assert_eq!(plan.workers, 1);
        assert_eq!(plan.max_in_flight_conversions, 2);
    }
}
