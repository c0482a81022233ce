//! Name-keyed registries for matchers, limiter providers and listeners.
//!
//! Registries are filled by the caller before the gate is built and are read
//! while trees are compiled. They are safe to share across threads.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::matcher::Matcher;
use crate::ratelimit::LimiterProvider;

/// Something observable happened at a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitEvent<'a> {
    /// The node's matcher matched the request
    Matched { node: &'a str, key: &'a str },
    /// A permit was taken
    Consumed { node: &'a str, key: &'a str },
    /// The limit was exceeded
    Exceeded { node: &'a str, key: &'a str },
}

impl<'a> RateLimitEvent<'a> {
    pub fn node(&self) -> &'a str {
        match self {
            RateLimitEvent::Matched { node, .. }
            | RateLimitEvent::Consumed { node, .. }
            | RateLimitEvent::Exceeded { node, .. } => node,
        }
    }

    pub fn key(&self) -> &'a str {
        match self {
            RateLimitEvent::Matched { key, .. }
            | RateLimitEvent::Consumed { key, .. }
            | RateLimitEvent::Exceeded { key, .. } => key,
        }
    }
}

/// Receives rate limit events for a node.
pub trait RateLimitListener: Send + Sync {
    fn on_event(&self, event: &RateLimitEvent<'_>);
}

impl<F> RateLimitListener for F
where
    F: Fn(&RateLimitEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &RateLimitEvent<'_>) {
        self(event)
    }
}

/// Default listener: writes events to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl RateLimitListener for TracingListener {
    fn on_event(&self, event: &RateLimitEvent<'_>) {
        match event {
            RateLimitEvent::Matched { node, key } => {
                trace!(node = %node, key = %key, "Request matched")
            }
            RateLimitEvent::Consumed { node, key } => {
                trace!(node = %node, key = %key, "Permit consumed")
            }
            RateLimitEvent::Exceeded { node, key } => {
                info!(node = %node, key = %key, "Rate limit exceeded")
            }
        }
    }
}

/// Matchers, limiter providers and listeners keyed by node name.
pub struct Registries {
    matchers: RwLock<HashMap<String, Matcher>>,
    limiter_providers: RwLock<HashMap<String, Arc<dyn LimiterProvider>>>,
    listeners: RwLock<HashMap<String, Arc<dyn RateLimitListener>>>,
    default_listener: RwLock<Arc<dyn RateLimitListener>>,
}

impl Default for Registries {
    fn default() -> Self {
        Self::new()
    }
}

impl Registries {
    pub fn new() -> Self {
        Self {
            matchers: RwLock::new(HashMap::new()),
            limiter_providers: RwLock::new(HashMap::new()),
            listeners: RwLock::new(HashMap::new()),
            default_listener: RwLock::new(Arc::new(TracingListener)),
        }
    }

    /// Register a matcher, replacing any previous one for `name`.
    pub fn register_matcher(&self, name: impl Into<String>, matcher: Matcher) {
        let name = name.into();
        if self.matchers.write().insert(name.clone(), matcher).is_some() {
            warn!(name = %name, "Replacing registered matcher");
        } else {
            debug!(name = %name, "Registered matcher");
        }
    }

    pub fn matcher(&self, name: &str) -> Option<Matcher> {
        self.matchers.read().get(name).cloned()
    }

    /// True if a matcher other than [`Matcher::Never`] is registered.
    pub fn has_matcher(&self, name: &str) -> bool {
        self.matchers.read().get(name).is_some_and(|m| !m.is_never())
    }

    /// Names with a registered matcher, sorted.
    pub fn matcher_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.matchers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn register_limiter_provider(&self, name: impl Into<String>, provider: Arc<dyn LimiterProvider>) {
        let name = name.into();
        if self.limiter_providers.write().insert(name.clone(), provider).is_some() {
            warn!(name = %name, "Replacing registered limiter provider");
        } else {
            debug!(name = %name, "Registered limiter provider");
        }
    }

    pub fn limiter_provider(&self, name: &str) -> Option<Arc<dyn LimiterProvider>> {
        self.limiter_providers.read().get(name).cloned()
    }

    pub fn register_listener(&self, name: impl Into<String>, listener: Arc<dyn RateLimitListener>) {
        let name = name.into();
        if self.listeners.write().insert(name.clone(), listener).is_some() {
            warn!(name = %name, "Replacing registered listener");
        } else {
            debug!(name = %name, "Registered listener");
        }
    }

    /// Replace the listener used for nodes without their own.
    pub fn set_default_listener(&self, listener: Arc<dyn RateLimitListener>) {
        *self.default_listener.write() = listener;
    }

    /// The listener for `name`, falling back to the default listener.
    pub fn listener(&self, name: &str) -> Arc<dyn RateLimitListener> {
        match self.listeners.read().get(name) {
            Some(listener) => Arc::clone(listener),
            None => Arc::clone(&self.default_listener.read()),
        }
    }
}

impl std::fmt::Debug for Registries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registries")
            .field("matchers", &self.matcher_names())
            .field("limiter_providers", &self.limiter_providers.read().len())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}
