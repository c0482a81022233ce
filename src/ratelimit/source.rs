//! Rule origins and the payload carried by tree nodes.

use super::rules::Rates;
use crate::element::ElementRoute;

/// Where a [`RateSource`] came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOrigin {
    /// A reserved tree root
    Root,
    /// A name-keyed configuration entry
    Property,
    /// A code element and the request routes it answers
    Element(Vec<ElementRoute>),
}

/// Identity of one rule's origin. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateSource {
    id: String,
    group_type: bool,
    rate_limited: bool,
    delegate_to_parent: bool,
    origin: SourceOrigin,
}

impl RateSource {
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            id: name.into(),
            group_type: true,
            rate_limited: false,
            delegate_to_parent: false,
            origin: SourceOrigin::Root,
        }
    }

    pub fn property(name: impl Into<String>, rates: &Rates) -> Self {
        Self {
            id: name.into(),
            group_type: false,
            rate_limited: rates.has_limits(),
            delegate_to_parent: false,
            origin: SourceOrigin::Property,
        }
    }

    /// Source for a code element.
    ///
    /// An element with no routes is a pure group.
    pub fn element(
        id: impl Into<String>,
        routes: Vec<ElementRoute>,
        rates: &Rates,
        delegate_to_parent: bool,
    ) -> Self {
        Self {
            id: id.into(),
            group_type: routes.is_empty(),
            rate_limited: rates.has_limits(),
            delegate_to_parent,
            origin: SourceOrigin::Element(routes),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_group_type(&self) -> bool {
        self.group_type
    }

    pub fn is_rate_limited(&self) -> bool {
        self.rate_limited
    }

    pub fn delegates_to_parent(&self) -> bool {
        self.delegate_to_parent
    }

    pub fn origin(&self) -> &SourceOrigin {
        &self.origin
    }

    /// Routes of the backing code element, if any.
    pub fn routes(&self) -> Option<&[ElementRoute]> {
        match &self.origin {
            SourceOrigin::Element(routes) => Some(routes),
            _ => None,
        }
    }

    /// True if this source can be matched by request path and method.
    pub fn is_endpoint(&self) -> bool {
        !self.group_type && self.routes().is_some_and(|r| !r.is_empty())
    }
}

/// A `(RateSource, Rates)` pair, the payload of a tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateConfig {
    pub source: RateSource,
    pub rates: Rates,
}

impl RateConfig {
    pub fn new(source: RateSource, rates: Rates) -> Self {
        Self { source, rates }
    }

    /// Keep the source, replace the rates.
    pub fn with_rates(&self, rates: Rates) -> Self {
        Self {
            source: self.source.clone(),
            rates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::Rate;

    #[test]
    fn test_property_source() {
        let rates = Rates::of(Rate::per_second(1));
        let source = RateSource::property("orders", &rates);
        assert_eq!(source.id(), "orders");
        assert!(source.is_rate_limited());
        assert!(!source.is_group_type());
        assert!(!source.is_endpoint());
        assert!(source.routes().is_none());
    }

    #[test]
    fn test_element_without_routes_is_group() {
        let source = RateSource::element("svc", Vec::new(), &Rates::new(), false);
        assert!(source.is_group_type());
        assert!(!source.is_rate_limited());
        assert!(!source.is_endpoint());
    }

    #[test]
    fn test_element_with_routes_is_endpoint() {
        let routes = vec![ElementRoute::exact("/users", Vec::new())];
        let source = RateSource::element("users", routes, &Rates::new(), true);
        assert!(source.is_endpoint());
        assert!(source.delegates_to_parent());
    }

    #[test]
    fn test_with_rates_keeps_source() {
        let source = RateSource::element(
            "foo",
            vec![ElementRoute::exact("/foo", Vec::new())],
            &Rates::new(),
            false,
        );
        let config = RateConfig::new(source.clone(), Rates::new());
        let replaced = config.with_rates(Rates::of(Rate::per_minute(3)));
        assert_eq!(replaced.source, source);
        assert_eq!(replaced.rates.limits.len(), 1);
        assert_ne!(replaced, config);
    }
}
