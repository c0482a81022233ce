//! Limiter capability and the default in-memory implementation.
//!
//! The engine only ever asks a limiter one question: may `key` take a permit
//! now? Counters, windows and storage are the limiter's business.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, trace};

use super::counter::RateLimitCounter;
use super::rules::{Operator, Rate};
use super::source::RateConfig;
use crate::error::Result;

/// A limiter attached to one tree node.
pub trait RateLimiter: Send + Sync {
    /// Attempt to take one permit for `key`.
    ///
    /// `Ok(false)` means the limit is exceeded. Errors are reserved for
    /// limiter failures such as an unreachable backing store.
    fn try_acquire(&self, key: &str) -> Result<bool>;
}

/// Creates limiters for node configurations.
pub trait LimiterProvider: Send + Sync {
    fn create(&self, config: &RateConfig) -> Arc<dyn RateLimiter>;
}

impl<F> LimiterProvider for F
where
    F: Fn(&RateConfig) -> Arc<dyn RateLimiter> + Send + Sync,
{
    fn create(&self, config: &RateConfig) -> Arc<dyn RateLimiter> {
        self(config)
    }
}

/// Provider of [`InMemoryRateLimiter`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct InMemoryLimiterProvider;

impl LimiterProvider for InMemoryLimiterProvider {
    fn create(&self, config: &RateConfig) -> Arc<dyn RateLimiter> {
        debug!(
            source = %config.source.id(),
            limits = config.rates.limits.len(),
            operator = ?config.rates.operator,
            "Creating in-memory limiter"
        );
        Arc::new(InMemoryRateLimiter::new(
            config.rates.limits.clone(),
            config.rates.operator,
        ))
    }
}

/// Fixed-window limiter keeping one set of counters per key.
///
/// This struct is thread-safe and can be shared across threads.
#[derive(Debug)]
pub struct InMemoryRateLimiter {
    limits: Vec<Rate>,
    operator: Operator,
    /// Counters indexed by match key, one per limit
    counters: DashMap<String, Vec<RateLimitCounter>>,
}

impl InMemoryRateLimiter {
    pub fn new(limits: Vec<Rate>, operator: Operator) -> Self {
        Self {
            limits,
            operator,
            counters: DashMap::new(),
        }
    }

    /// Current count of each limit for a key, or `None` if the key is unseen.
    pub fn current_counts(&self, key: &str) -> Option<Vec<u64>> {
        self.counters
            .get(key)
            .map(|c| c.iter().map(|counter| counter.current_count()).collect())
    }

    /// Number of keys with live counters.
    pub fn key_count(&self) -> usize {
        self.counters.len()
    }

    /// Clear all counters.
    pub fn clear(&self) {
        self.counters.clear();
    }
}

impl RateLimiter for InMemoryRateLimiter {
    fn try_acquire(&self, key: &str) -> Result<bool> {
        if self.limits.is_empty() {
            return Ok(true);
        }

        let counters = self.counters.entry(key.to_string()).or_insert_with(|| {
            self.limits
                .iter()
                .map(|l| RateLimitCounter::new(l.permits, l.duration))
                .collect()
        });

        let results: Vec<bool> = counters.iter().map(|c| c.increment(1)).collect();
        let admitted = match self.operator {
            Operator::And => results.iter().all(|r| *r),
            Operator::Or => results.iter().any(|r| *r),
        };

        trace!(key = %key, admitted, "In-memory limiter attempt");
        Ok(admitted)
    }
}
