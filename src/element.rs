//! Code elements and their discovery.
//!
//! An [`Element`] describes something that serves requests: a resource (a
//! type-like grouping, optionally mounted at base paths) or an endpoint (a
//! member answering specific paths and methods). Elements nest the way
//! declaring types nest their members. [`discover`] turns them into
//! [`ElementNode`] trees whose sources carry fully composed routes.

use http::Method;
use serde::{Deserialize, Serialize};

use crate::ratelimit::{Rate, RateConfig, RateSource, Rates};

/// What kind of code element this is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    /// Grouping of endpoints; its paths are base paths for its members
    #[default]
    Resource,
    /// A member answering requests at its paths
    Endpoint,
}

/// A code element, optionally carrying rate limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub id: String,
    #[serde(default)]
    pub kind: ElementKind,
    #[serde(default)]
    pub paths: Vec<String>,
    /// HTTP methods; empty matches any method
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub rates: Rates,
    #[serde(default)]
    pub delegate_to_parent: bool,
    #[serde(default)]
    pub members: Vec<Element>,
}

impl Element {
    pub fn resource(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ElementKind::Resource,
            ..Self::default()
        }
    }

    pub fn endpoint(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ElementKind::Endpoint,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.paths.push(path.into());
        self
    }

    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.methods.push(method.as_str().to_string());
        self
    }

    #[must_use]
    pub fn rates(mut self, rates: Rates) -> Self {
        self.rates = rates;
        self
    }

    #[must_use]
    pub fn limit(mut self, rate: Rate) -> Self {
        self.rates.limits.push(rate);
        self
    }

    #[must_use]
    pub fn condition(mut self, condition: impl Into<String>) -> Self {
        self.rates.condition = Some(condition.into());
        self
    }

    #[must_use]
    pub fn delegate_to_parent(mut self) -> Self {
        self.delegate_to_parent = true;
        self
    }

    #[must_use]
    pub fn member(mut self, member: Element) -> Self {
        self.members.push(member);
        self
    }
}

/// A path pattern plus the methods it answers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRoute {
    pub pattern: String,
    /// Uppercase method names; empty matches any method
    pub methods: Vec<String>,
    /// Match the pattern as a prefix at segment boundaries
    pub prefix: bool,
}

impl ElementRoute {
    pub fn exact(pattern: impl Into<String>, methods: Vec<String>) -> Self {
        Self {
            pattern: pattern.into(),
            methods,
            prefix: false,
        }
    }

    pub fn prefix(pattern: impl Into<String>, methods: Vec<String>) -> Self {
        Self {
            pattern: pattern.into(),
            methods,
            prefix: true,
        }
    }
}

/// A discovered element with its composed source and rates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementNode {
    pub config: RateConfig,
    pub children: Vec<ElementNode>,
}

impl ElementNode {
    pub fn id(&self) -> &str {
        self.config.source.id()
    }
}

/// Discover a forest of top-level elements.
pub fn discover(elements: &[Element]) -> Vec<ElementNode> {
    elements.iter().map(discover_one).collect()
}

/// Discover one top-level element and its members.
pub fn discover_one(element: &Element) -> ElementNode {
    discover_within(element, &[])
}

fn discover_within(element: &Element, base_paths: &[String]) -> ElementNode {
    let own_paths = compose_paths(base_paths, &element.paths);
    let methods = normalize_methods(&element.methods);

    let children: Vec<ElementNode> = element
        .members
        .iter()
        .map(|m| discover_within(m, &own_paths))
        .collect();

    let routes = match element.kind {
        ElementKind::Endpoint => {
            if own_paths.is_empty() {
                // An endpoint without any path answers at the root.
                vec![ElementRoute::exact("/", methods)]
            } else {
                own_paths
                    .iter()
                    .map(|p| ElementRoute::exact(p.clone(), methods.clone()))
                    .collect()
            }
        }
        ElementKind::Resource if !element.paths.is_empty() => own_paths
            .iter()
            .map(|p| ElementRoute::prefix(p.clone(), methods.clone()))
            .collect(),
        ElementKind::Resource => {
            // Without base paths a resource answers whatever its members answer.
            let mut routes: Vec<ElementRoute> = Vec::new();
            for child in &children {
                for route in child.config.source.routes().unwrap_or_default() {
                    if !routes.contains(route) {
                        routes.push(route.clone());
                    }
                }
            }
            routes
        }
    };

    let source = RateSource::element(
        element.id.clone(),
        routes,
        &element.rates,
        element.delegate_to_parent,
    );
    ElementNode {
        config: RateConfig::new(source, element.rates.clone()),
        children,
    }
}

fn normalize_methods(methods: &[String]) -> Vec<String> {
    methods.iter().map(|m| m.trim().to_ascii_uppercase()).collect()
}

fn compose_paths(base: &[String], own: &[String]) -> Vec<String> {
    match (base.is_empty(), own.is_empty()) {
        (true, true) => Vec::new(),
        (true, false) => own.iter().map(|p| join_path("", p)).collect(),
        (false, true) => base.to_vec(),
        (false, false) => base
            .iter()
            .flat_map(|b| own.iter().map(move |p| join_path(b, p)))
            .collect(),
    }
}

fn join_path(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    match (base.is_empty(), path.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{}", path),
        (false, true) => ensure_leading_slash(base),
        (false, false) => format!("{}/{}", ensure_leading_slash(base), path),
    }
}

fn ensure_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "users"), "/users");
        assert_eq!(join_path("/api/", "/users"), "/api/users");
        assert_eq!(join_path("api", ""), "/api");
        assert_eq!(join_path("", ""), "/");
    }

    #[test]
    fn test_endpoint_paths_compose_with_resource() {
        let element = Element::resource("users")
            .path("/api")
            .path("/v2")
            .member(
                Element::endpoint("users.get")
                    .method(Method::GET)
                    .path("/users/{id}"),
            );
        let node = discover_one(&element);

        let resource_routes = node.config.source.routes().unwrap();
        assert_eq!(resource_routes.len(), 2);
        assert!(resource_routes.iter().all(|r| r.prefix));

        let member = &node.children[0];
        let routes = member.config.source.routes().unwrap();
        let patterns: Vec<&str> = routes.iter().map(|r| r.pattern.as_str()).collect();
        assert_eq!(patterns, vec!["/api/users/{id}", "/v2/users/{id}"]);
        assert_eq!(routes[0].methods, vec!["GET".to_string()]);
        assert!(!routes[0].prefix);
    }

    #[test]
    fn test_resource_without_paths_answers_member_routes() {
        let element = Element::resource("orders")
            .member(Element::endpoint("orders.create").method(Method::POST).path("/orders"))
            .member(Element::endpoint("orders.list").path("/orders"));
        let node = discover_one(&element);

        let routes = node.config.source.routes().unwrap();
        assert_eq!(routes.len(), 2);
        assert!(node.config.source.is_endpoint());
        assert!(!node.config.source.is_group_type());
    }

    #[test]
    fn test_resource_without_endpoints_is_group() {
        let element = Element::resource("group").member(Element::resource("inner"));
        let node = discover_one(&element);
        assert!(node.config.source.is_group_type());
        assert!(node.children[0].config.source.is_group_type());
    }

    #[test]
    fn test_methods_normalized() {
        let element = Element {
            id: "e".to_string(),
            kind: ElementKind::Endpoint,
            paths: vec!["/e".to_string()],
            methods: vec!["post".to_string()],
            ..Element::default()
        };
        let node = discover_one(&element);
        assert_eq!(node.config.source.routes().unwrap()[0].methods, vec!["POST"]);
    }

    #[test]
    fn test_rate_limited_follows_rates() {
        let element = Element::resource("a")
            .limit(Rate::per_minute(10))
            .member(Element::endpoint("b").path("/b"));
        let node = discover_one(&element);
        assert!(node.config.source.is_rate_limited());
        assert!(!node.children[0].config.source.is_rate_limited());
    }
}
