//! Rategate - declarative rate-limit resolution and request admission
//!
//! Rate limits come from two sources: name-keyed rules and code elements
//! (resources and their endpoints). Both are built into trees, merged so that
//! a rule naming an element moves onto it, and pruned to the subtrees that
//! take part in limiting. Each request walks every matching chain from leaf to
//! root, taking a permit at every node whose matcher accepts it.

pub mod config;
pub mod element;
pub mod engine;
pub mod error;
pub mod expression;
pub mod gate;
pub mod matcher;
pub mod ratelimit;
pub mod registry;
pub mod request;
pub mod tree;

pub use config::RateGateConfig;
pub use element::Element;
pub use engine::{Decision, ExceededLimit, LimiterFactory};
pub use error::{RateGateError, Result};
pub use gate::{RateGate, RateGateBuilder};
pub use matcher::{MatchResult, Matcher};
pub use ratelimit::{Rate, Rates};
pub use request::{RequestFacts, RequestSnapshot};
