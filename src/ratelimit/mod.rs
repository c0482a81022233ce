//! Rate limit definitions, sources and limiters.

mod counter;
mod limiter;
mod rules;
mod source;

pub use counter::RateLimitCounter;
pub use limiter::{InMemoryLimiterProvider, InMemoryRateLimiter, LimiterProvider, RateLimiter};
pub use rules::{Operator, Rate, Rates, RulesFile};
pub use source::{RateConfig, RateSource, SourceOrigin};
