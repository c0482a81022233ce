//! Request matchers.
//!
//! A [`Matcher`] maps a request to a [`MatchResult`]: the key to count the
//! request under, no match, or disabled for a node that takes part in no
//! decision. Matchers compose with [`Matcher::and`], keeping the key of the
//! left-most constituent.

mod compose;
mod path;

use std::fmt;
use std::sync::Arc;

use crate::expression::Expression;
use crate::request::RequestFacts;

pub use compose::{MatcherComposer, NodeMatchers};
pub use path::{route_matches, EndpointMatcher, EndpointMatcherProvider, PathTemplateMatcherProvider};

/// Outcome of matching one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    /// Count the request under this key
    Matched(String),
    NoMatch,
    /// The matcher never matches anything
    Disabled,
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Matched(_))
    }
}

/// A caller-supplied matcher.
pub trait RequestMatcher: Send + Sync {
    /// Return the key to count the request under, or `None` if it does not match.
    fn match_request(&self, request: &dyn RequestFacts) -> Option<String>;
}

impl<F> RequestMatcher for F
where
    F: Fn(&dyn RequestFacts) -> Option<String> + Send + Sync,
{
    fn match_request(&self, request: &dyn RequestFacts) -> Option<String> {
        self(request)
    }
}

/// A composable request matcher.
#[derive(Clone)]
pub enum Matcher {
    /// Matches nothing
    Never,
    /// Request path and method
    Endpoint(EndpointMatcher),
    /// A condition expression; matches under `key`
    Expression { expression: Arc<Expression>, key: String },
    Custom(Arc<dyn RequestMatcher>),
    And(Box<Matcher>, Box<Matcher>),
}

impl Matcher {
    /// Wrap a caller-supplied matcher.
    pub fn custom<M: RequestMatcher + 'static>(matcher: M) -> Self {
        Matcher::Custom(Arc::new(matcher))
    }

    pub fn expression(expression: Expression, key: impl Into<String>) -> Self {
        Matcher::Expression {
            expression: Arc::new(expression),
            key: key.into(),
        }
    }

    /// Both must match; the key comes from `self`.
    #[must_use]
    pub fn and(self, other: Matcher) -> Matcher {
        Matcher::And(Box::new(self), Box::new(other))
    }

    pub fn is_never(&self) -> bool {
        matches!(self, Matcher::Never)
    }

    pub fn matches(&self, request: &dyn RequestFacts) -> MatchResult {
        match self {
            Matcher::Never => MatchResult::Disabled,
            Matcher::Endpoint(endpoint) => endpoint.matches(request),
            Matcher::Expression { expression, key } => {
                if expression.matches(request) {
                    MatchResult::Matched(key.clone())
                } else {
                    MatchResult::NoMatch
                }
            }
            Matcher::Custom(custom) => match custom.match_request(request) {
                Some(key) => MatchResult::Matched(key),
                None => MatchResult::NoMatch,
            },
            Matcher::And(left, right) => match left.matches(request) {
                MatchResult::Matched(key) => match right.matches(request) {
                    MatchResult::Matched(_) => MatchResult::Matched(key),
                    other => other,
                },
                other => other,
            },
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Never => f.write_str("Never"),
            Matcher::Endpoint(endpoint) => f.debug_tuple("Endpoint").field(endpoint).finish(),
            Matcher::Expression { expression, key } => f
                .debug_struct("Expression")
                .field("expression", &expression.source())
                .field("key", key)
                .finish(),
            Matcher::Custom(_) => f.write_str("Custom"),
            Matcher::And(left, right) => f.debug_tuple("And").field(left).field(right).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestSnapshot;

    fn header_matcher(key: &str) -> Matcher {
        Matcher::expression(Expression::parse("web.request.header=X-Test").unwrap(), key)
    }

    #[test]
    fn test_never_is_disabled() {
        let req = RequestSnapshot::default();
        assert_eq!(Matcher::Never.matches(&req), MatchResult::Disabled);
        assert!(Matcher::Never.is_never());
    }

    #[test]
    fn test_and_keeps_left_key() {
        let left = Matcher::custom(|_: &dyn RequestFacts| Some("user-7".to_string()));
        let matcher = left.and(header_matcher("node"));

        let hit = RequestSnapshot::default().with_header("X-Test", "1");
        assert_eq!(matcher.matches(&hit), MatchResult::Matched("user-7".to_string()));

        let miss = RequestSnapshot::default();
        assert_eq!(matcher.matches(&miss), MatchResult::NoMatch);
    }

    #[test]
    fn test_and_short_circuits_on_left() {
        let left = Matcher::custom(|_: &dyn RequestFacts| None);
        let matcher = left.and(Matcher::Never);
        assert_eq!(matcher.matches(&RequestSnapshot::default()), MatchResult::NoMatch);
    }

    #[test]
    fn test_custom_matcher_from_facts() {
        let by_principal = Matcher::custom(|r: &dyn RequestFacts| r.user_principal());
        let req = RequestSnapshot::default().with_principal("alice");
        assert_eq!(by_principal.matches(&req), MatchResult::Matched("alice".to_string()));
        assert!(!by_principal.matches(&RequestSnapshot::default()).is_match());
    }

    #[test]
    fn test_debug_output() {
        let matcher = Matcher::Never.and(header_matcher("k"));
        let debug = format!("{:?}", matcher);
        assert!(debug.contains("web.request.header=X-Test"));
    }
}
