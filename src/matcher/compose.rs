//! Composing the matcher for a tree node.

use tracing::debug;

use super::{EndpointMatcherProvider, Matcher};
use crate::error::Result;
use crate::expression::Expression;
use crate::registry::Registries;
use crate::tree::{NodeId, Tree};

/// The matchers attached to one node.
#[derive(Debug, Clone)]
pub struct NodeMatchers {
    /// Decides whether the node takes part and under which key
    pub main: Matcher,
    /// One entry per limit; `None` for limits without a condition
    pub per_limit: Vec<Option<Matcher>>,
    /// Generated matcher to store under the node's name once the node is live
    pub unpublished: Option<Matcher>,
}

impl NodeMatchers {
    pub fn never() -> Self {
        Self {
            main: Matcher::Never,
            per_limit: Vec::new(),
            unpublished: None,
        }
    }
}

/// Builds node matchers from structure, conditions and registered matchers.
pub struct MatcherComposer<'a> {
    endpoints: &'a dyn EndpointMatcherProvider,
    registries: &'a Registries,
}

impl<'a> MatcherComposer<'a> {
    pub fn new(endpoints: &'a dyn EndpointMatcherProvider, registries: &'a Registries) -> Self {
        Self {
            endpoints,
            registries,
        }
    }

    /// Compose the matchers for `id`.
    ///
    /// Nodes with no limits of their own or above them never match. A matcher
    /// registered under the node's name goes first, so its key wins; when none
    /// is registered the generated matcher is returned in
    /// [`NodeMatchers::unpublished`]. Composing never writes the registry.
    pub fn compose(&self, tree: &Tree, id: NodeId) -> Result<NodeMatchers> {
        let Some(config) = tree.config(id) else {
            return Ok(NodeMatchers::never());
        };
        let name = tree.name(id);

        let limited_above = tree
            .ancestors(id)
            .any(|a| tree.config(a).is_some_and(|c| c.rates.has_limits()));
        if !config.rates.has_limits() && !limited_above {
            return Ok(NodeMatchers::never());
        }

        let condition = match &config.rates.condition {
            Some(text) => Some(Matcher::expression(Expression::parse(text)?, name)),
            None => None,
        };
        let structural = if config.source.is_endpoint() {
            self.endpoints.matcher(&config.source)
        } else {
            None
        };
        let generated = match (structural, condition) {
            (Some(structural), Some(condition)) => structural.and(condition),
            (Some(structural), None) => structural,
            (None, Some(condition)) => condition,
            (None, None) => Matcher::Never,
        };

        let (main, unpublished) = match self.registries.matcher(name) {
            Some(registered) if !registered.is_never() => {
                if generated.is_never() {
                    (registered, None)
                } else {
                    (registered.and(generated), None)
                }
            }
            _ => (generated.clone(), Some(generated)),
        };

        let per_limit = config
            .rates
            .limits
            .iter()
            .map(|limit| -> Result<Option<Matcher>> {
                match &limit.condition {
                    Some(text) => Ok(Some(Matcher::expression(Expression::parse(text)?, name))),
                    None => Ok(None),
                }
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(node = %name, matcher = ?main, "Composed node matcher");
        Ok(NodeMatchers {
            main,
            per_limit,
            unpublished,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{discover, Element};
    use crate::error::RateGateError;
    use crate::matcher::{MatchResult, PathTemplateMatcherProvider};
    use crate::ratelimit::{Rate, Rates};
    use crate::request::{RequestFacts, RequestSnapshot};
    use crate::tree::{build_element_tree, build_property_tree};
    use std::collections::BTreeMap;

    fn element_tree(elements: &[Element]) -> Tree {
        build_element_tree(&discover(elements)).unwrap()
    }

    #[test]
    fn test_unlimited_chain_never_matches() {
        let tree = element_tree(&[Element::resource("a").member(Element::endpoint("b").path("/b"))]);
        let registries = Registries::new();
        let composer = MatcherComposer::new(&PathTemplateMatcherProvider, &registries);

        let b = tree.find("b").unwrap();
        let matchers = composer.compose(&tree, b).unwrap();
        assert!(matchers.main.is_never());
        assert!(matchers.unpublished.is_none());
        assert!(registries.matcher("b").is_none());
    }

    #[test]
    fn test_endpoint_under_limited_parent_matches_by_path() {
        let tree = element_tree(&[Element::resource("a")
            .limit(Rate::per_minute(10))
            .member(Element::endpoint("b").path("/b"))]);
        let registries = Registries::new();
        let composer = MatcherComposer::new(&PathTemplateMatcherProvider, &registries);

        let matchers = composer.compose(&tree, tree.find("b").unwrap()).unwrap();
        let req = RequestSnapshot::new("GET", "/b");
        assert_eq!(matchers.main.matches(&req), MatchResult::Matched("b".to_string()));
        assert!(!registries.has_matcher("b"));
        assert!(matchers.unpublished.is_some_and(|m| !m.is_never()));
    }

    #[test]
    fn test_condition_narrows_structural_match() {
        let tree = element_tree(&[Element::endpoint("b")
            .path("/b")
            .limit(Rate::per_minute(1))
            .condition("web.request.header=X-Api-Key")]);
        let registries = Registries::new();
        let composer = MatcherComposer::new(&PathTemplateMatcherProvider, &registries);
        let main = composer.compose(&tree, tree.find("b").unwrap()).unwrap().main;

        assert!(main.matches(&RequestSnapshot::new("GET", "/b").with_header("X-Api-Key", "k")).is_match());
        assert_eq!(main.matches(&RequestSnapshot::new("GET", "/b")), MatchResult::NoMatch);
        assert_eq!(
            main.matches(&RequestSnapshot::new("GET", "/c").with_header("X-Api-Key", "k")),
            MatchResult::NoMatch
        );
    }

    #[test]
    fn test_registered_matcher_key_wins() {
        let tree = element_tree(&[Element::endpoint("b").path("/b").limit(Rate::per_minute(1))]);
        let registries = Registries::new();
        registries.register_matcher("b", Matcher::custom(|r: &dyn RequestFacts| r.user_principal()));
        let composer = MatcherComposer::new(&PathTemplateMatcherProvider, &registries);
        let main = composer.compose(&tree, tree.find("b").unwrap()).unwrap().main;

        assert!(composer.compose(&tree, tree.find("b").unwrap()).unwrap().unpublished.is_none());
        let alice = RequestSnapshot::new("GET", "/b").with_principal("alice");
        assert_eq!(main.matches(&alice), MatchResult::Matched("alice".to_string()));
        let elsewhere = RequestSnapshot::new("GET", "/c").with_principal("alice");
        assert_eq!(main.matches(&elsewhere), MatchResult::NoMatch);
    }

    #[test]
    fn test_property_without_condition() {
        let mut limits = BTreeMap::new();
        limits.insert("plain".to_string(), Rates::of(Rate::per_second(1)));
        limits.insert("custom".to_string(), Rates::of(Rate::per_second(1)));
        let (tree, _) = build_property_tree(&limits).unwrap();

        let registries = Registries::new();
        registries.register_matcher("custom", Matcher::custom(|_: &dyn RequestFacts| Some("all".to_string())));
        let composer = MatcherComposer::new(&PathTemplateMatcherProvider, &registries);

        let plain = composer.compose(&tree, tree.find("plain").unwrap()).unwrap();
        assert!(plain.main.is_never());

        let custom = composer.compose(&tree, tree.find("custom").unwrap()).unwrap();
        assert_eq!(
            custom.main.matches(&RequestSnapshot::default()),
            MatchResult::Matched("all".to_string())
        );
    }

    #[test]
    fn test_property_condition_keys_by_name() {
        let mut limits = BTreeMap::new();
        limits.insert(
            "guests".to_string(),
            Rates::of(Rate::per_second(1)).condition("web.session.user.role=GUEST"),
        );
        let (tree, _) = build_property_tree(&limits).unwrap();
        let registries = Registries::new();
        let composer = MatcherComposer::new(&PathTemplateMatcherProvider, &registries);
        let main = composer.compose(&tree, tree.find("guests").unwrap()).unwrap().main;

        let guest = RequestSnapshot::default().with_role("GUEST");
        assert_eq!(main.matches(&guest), MatchResult::Matched("guests".to_string()));
    }

    #[test]
    fn test_per_limit_matchers() {
        let tree = element_tree(&[Element::endpoint("b").path("/b").rates(
            Rates::new()
                .limit(Rate::per_second(1).when("web.session.user.role=GUEST"))
                .limit(Rate::per_minute(100)),
        )]);
        let registries = Registries::new();
        let composer = MatcherComposer::new(&PathTemplateMatcherProvider, &registries);
        let matchers = composer.compose(&tree, tree.find("b").unwrap()).unwrap();

        assert_eq!(matchers.per_limit.len(), 2);
        assert!(matchers.per_limit[0].is_some());
        assert!(matchers.per_limit[1].is_none());
    }

    #[test]
    fn test_bad_condition_fails() {
        let tree = element_tree(&[Element::endpoint("b")
            .path("/b")
            .limit(Rate::per_minute(1))
            .condition("web.request.body=x")]);
        let registries = Registries::new();
        let composer = MatcherComposer::new(&PathTemplateMatcherProvider, &registries);

        let err = composer.compose(&tree, tree.find("b").unwrap()).unwrap_err();
        assert!(matches!(err, RateGateError::Expression(_)));
    }
}
