//! Structural matching of requests against element routes.

use std::fmt;

use super::{MatchResult, Matcher};
use crate::element::ElementRoute;
use crate::ratelimit::RateSource;
use crate::request::RequestFacts;

/// Supplies the structural matcher for an endpoint-bearing source.
pub trait EndpointMatcherProvider: Send + Sync {
    /// `None` when the source carries nothing to match on.
    fn matcher(&self, source: &RateSource) -> Option<Matcher>;
}

/// Matches path templates segment by segment.
///
/// `{name}` and `*` match exactly one segment, `**` matches everything that
/// follows. Prefix routes also match any deeper path.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathTemplateMatcherProvider;

impl EndpointMatcherProvider for PathTemplateMatcherProvider {
    fn matcher(&self, source: &RateSource) -> Option<Matcher> {
        if !source.is_endpoint() {
            return None;
        }
        let routes = source.routes()?.to_vec();
        Some(Matcher::Endpoint(EndpointMatcher::new(source.id(), routes)))
    }
}

/// Matches when any route answers the request; the key is the source id.
#[derive(Clone, PartialEq, Eq)]
pub struct EndpointMatcher {
    key: String,
    routes: Vec<ElementRoute>,
}

impl EndpointMatcher {
    pub fn new(key: impl Into<String>, routes: Vec<ElementRoute>) -> Self {
        Self {
            key: key.into(),
            routes,
        }
    }

    pub fn routes(&self) -> &[ElementRoute] {
        &self.routes
    }

    pub fn matches(&self, request: &dyn RequestFacts) -> MatchResult {
        let method = request.method();
        let path = request.path();
        if self.routes.iter().any(|r| route_matches(r, method, path)) {
            MatchResult::Matched(self.key.clone())
        } else {
            MatchResult::NoMatch
        }
    }
}

impl fmt::Debug for EndpointMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let patterns: Vec<&str> = self.routes.iter().map(|r| r.pattern.as_str()).collect();
        f.debug_struct("EndpointMatcher")
            .field("key", &self.key)
            .field("patterns", &patterns)
            .finish()
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn is_variable(segment: &str) -> bool {
    segment == "*" || (segment.starts_with('{') && segment.ends_with('}'))
}

/// Whether a route answers `method` at `path`.
pub fn route_matches(route: &ElementRoute, method: &str, path: &str) -> bool {
    if !route.methods.is_empty() && !route.methods.iter().any(|m| m.eq_ignore_ascii_case(method)) {
        return false;
    }

    let mut actual = segments(path);
    for expected in segments(&route.pattern) {
        if expected == "**" {
            return true;
        }
        match actual.next() {
            Some(segment) if is_variable(expected) || segment == expected => {}
            _ => return false,
        }
    }
    route.prefix || actual.next().is_none()
}
