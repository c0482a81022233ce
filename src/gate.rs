//! The rate gate: builds both trees, compiles them and serves decisions.
//!
//! The live trees sit behind a `RwLock<Arc<Snapshot>>`. Readers clone the
//! `Arc` and evaluate without holding the lock. Runtime registration builds a
//! new snapshot on the side and swaps it in, so a reader sees either the old
//! trees or the new ones, never a partially linked node.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::info;

use crate::config::RateLimitingConfig;
use crate::element::{self, Element, ElementNode};
use crate::engine::{self, CompileContext, CompiledTree, Decision, LimiterFactory, Snapshot, TreeKind};
use crate::error::{RateGateError, Result};
use crate::matcher::{EndpointMatcherProvider, PathTemplateMatcherProvider};
use crate::ratelimit::{InMemoryLimiterProvider, LimiterProvider, Rates, RulesFile};
use crate::registry::Registries;
use crate::request::RequestFacts;
use crate::tree::{add_element_node, has_rate_limited_descendant, prune_properties, MergedTrees, Tree};

/// Builder for [`RateGate`].
pub struct RateGateBuilder {
    settings: RateLimitingConfig,
    rate_limits: BTreeMap<String, Rates>,
    elements: Vec<Element>,
    registries: Registries,
    endpoints: Arc<dyn EndpointMatcherProvider>,
    limiters: Arc<dyn LimiterProvider>,
}

impl Default for RateGateBuilder {
    fn default() -> Self {
        Self {
            settings: RateLimitingConfig::default(),
            rate_limits: BTreeMap::new(),
            elements: Vec::new(),
            registries: Registries::new(),
            endpoints: Arc::new(PathTemplateMatcherProvider),
            limiters: Arc::new(InMemoryLimiterProvider),
        }
    }
}

impl RateGateBuilder {
    pub fn settings(mut self, settings: RateLimitingConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.settings.enabled = enabled;
        self
    }

    pub fn properties_first_match_only(mut self, first_match_only: bool) -> Self {
        self.settings.properties_first_match_only = first_match_only;
        self
    }

    pub fn elements_first_match_only(mut self, first_match_only: bool) -> Self {
        self.settings.elements_first_match_only = first_match_only;
        self
    }

    /// Add a name-keyed rule.
    pub fn rate_limit(mut self, name: impl Into<String>, rates: Rates) -> Self {
        self.rate_limits.insert(name.into(), rates);
        self
    }

    pub fn element(mut self, element: Element) -> Self {
        self.elements.push(element);
        self
    }

    /// Add every rule and element from a rules file.
    pub fn rules(mut self, rules: RulesFile) -> Self {
        self.rate_limits.extend(rules.rate_limits);
        self.elements.extend(rules.elements);
        self
    }

    pub fn endpoint_matchers(mut self, provider: Arc<dyn EndpointMatcherProvider>) -> Self {
        self.endpoints = provider;
        self
    }

    /// Limiter provider for nodes without a registered one.
    pub fn limiter_provider(mut self, provider: Arc<dyn LimiterProvider>) -> Self {
        self.limiters = provider;
        self
    }

    /// Pre-register matchers, limiter providers and listeners by name.
    pub fn configure<F: FnOnce(&Registries)>(self, f: F) -> Self {
        f(&self.registries);
        self
    }

    pub fn build(self) -> Result<RateGate> {
        for (name, rates) in &self.rate_limits {
            rates.validate(name)?;
        }
        for element in &self.elements {
            validate_element(element)?;
        }

        let discovered = element::discover(&self.elements);
        let merged = MergedTrees::build(&self.rate_limits, &discovered)?;

        let ctx = CompileContext {
            registries: &self.registries,
            endpoints: self.endpoints.as_ref(),
            limiters: self.limiters.as_ref(),
        };
        let snapshot = Snapshot {
            properties: CompiledTree::compile(
                TreeKind::Properties,
                merged.properties,
                self.settings.properties_first_match_only,
                &ctx,
            )?,
            elements: CompiledTree::compile(
                TreeKind::Elements,
                merged.elements,
                self.settings.elements_first_match_only,
                &ctx,
            )?,
            transferred: merged.transferred,
        };

        snapshot.properties.publish_matchers(&self.registries, 0);
        snapshot.elements.publish_matchers(&self.registries, 0);

        info!(
            enabled = self.settings.enabled,
            property_nodes = snapshot.properties.tree().len() - 1,
            element_nodes = snapshot.elements.tree().len() - 1,
            "Rate gate ready"
        );

        Ok(RateGate {
            inner: Arc::new(GateInner {
                settings: self.settings,
                registries: self.registries,
                endpoints: self.endpoints,
                limiters: self.limiters,
                snapshot: RwLock::new(Arc::new(snapshot)),
                registration: Mutex::new(()),
            }),
        })
    }
}

fn validate_element(element: &Element) -> Result<()> {
    element.rates.validate(&element.id)?;
    element.members.iter().try_for_each(validate_element)
}

struct GateInner {
    settings: RateLimitingConfig,
    registries: Registries,
    endpoints: Arc<dyn EndpointMatcherProvider>,
    limiters: Arc<dyn LimiterProvider>,
    snapshot: RwLock<Arc<Snapshot>>,
    /// Serializes registrations; readers never take it
    registration: Mutex<()>,
}

/// Admission control over the merged property and element trees.
///
/// Cheap to clone and safe to share across threads.
#[derive(Clone)]
pub struct RateGate {
    inner: Arc<GateInner>,
}

impl RateGate {
    pub fn builder() -> RateGateBuilder {
        RateGateBuilder::default()
    }

    pub fn settings(&self) -> &RateLimitingConfig {
        &self.inner.settings
    }

    pub fn registries(&self) -> &Registries {
        &self.inner.registries
    }

    /// The current trees.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.inner.snapshot.read())
    }

    /// Register a code element after construction.
    ///
    /// Fails if the element or any of its members is already in the element
    /// tree. A same-named property rule moves onto the new element.
    pub fn register(&self, element: &Element) -> Result<()> {
        validate_element(element)?;
        let _registration = self.inner.registration.lock();
        let current = self.snapshot();

        let mut node = element::discover_one(element);
        let mut ids = Vec::new();
        collect_ids(&node, &mut ids);
        if let Some(id) = ids.iter().find(|id| current.elements.tree().contains(id)) {
            return Err(RateGateError::AlreadyRegistered { id: id.clone() });
        }

        let mut transferred = BTreeSet::new();
        transfer_from_properties(&mut node, current.properties.tree(), &mut transferred);

        let mut tree = current.elements.tree().clone();
        let root = tree.root();
        add_element_node(&mut tree, root, &node)?;

        let ctx = CompileContext {
            registries: &self.inner.registries,
            endpoints: self.inner.endpoints.as_ref(),
            limiters: self.inner.limiters.as_ref(),
        };
        let elements = current.elements.extend(tree, &ctx)?;
        let properties = if transferred.is_empty() {
            current.properties.clone()
        } else {
            current
                .properties
                .reindex(prune_properties(current.properties.tree(), &transferred))
        };

        let mut all_transferred = current.transferred.clone();
        all_transferred.extend(transferred.iter().cloned());

        let existing = current.elements.tree().len();
        elements.publish_matchers(&self.inner.registries, existing);
        *self.inner.snapshot.write() = Arc::new(Snapshot {
            properties,
            elements,
            transferred: all_transferred,
        });

        info!(
            element = %element.id,
            nodes = ids.len(),
            transferred = transferred.len(),
            "Registered element"
        );
        Ok(())
    }

    /// Evaluate requests against both trees as they are now.
    pub fn limiter_factory(&self) -> LimiterFactory {
        LimiterFactory::new(self.snapshot(), None, self.inner.settings.enabled)
    }

    /// Evaluate requests against the chains under one element.
    pub fn limiter_factory_for(&self, id: &str) -> Result<LimiterFactory> {
        let snapshot = self.snapshot();
        let node = snapshot
            .elements
            .tree()
            .find(id)
            .filter(|n| !snapshot.elements.tree().is_root(*n))
            .ok_or_else(|| RateGateError::UnknownElement { id: id.to_string() })?;
        Ok(LimiterFactory::new(snapshot, Some(node), self.inner.settings.enabled))
    }

    /// Decide on one request against the current trees.
    pub fn evaluate(&self, request: &dyn RequestFacts) -> Result<Decision> {
        if !self.inner.settings.enabled {
            return Ok(Decision::admit());
        }
        engine::evaluate(&self.snapshot(), request, None)
    }

    /// True if a node named `name` exists and it or a node below it is rate limited.
    pub fn is_rate_limited(&self, name: &str) -> bool {
        let snapshot = self.snapshot();
        let limited = [&snapshot.properties, &snapshot.elements]
            .into_iter()
            .any(|compiled| limited_in(compiled.tree(), name, &snapshot.transferred));
        limited
    }

    /// True if the element or any member would take part in rate limiting.
    pub fn is_element_rate_limited(&self, element: &Element) -> bool {
        if self.is_rate_limited(&element.id) {
            return true;
        }
        let snapshot = self.snapshot();
        let properties = snapshot.properties.tree();
        element_limited(element, properties)
    }

    /// True if a matcher other than the match-nothing one is registered for `name`.
    pub fn has_matching(&self, name: &str) -> bool {
        self.inner.registries.has_matcher(name)
    }
}

impl std::fmt::Debug for RateGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateGate")
            .field("settings", &self.inner.settings)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

fn limited_in(tree: &Tree, name: &str, transferred: &BTreeSet<String>) -> bool {
    tree.find(name)
        .is_some_and(|id| !tree.is_root(id) && has_rate_limited_descendant(tree, id, transferred))
}

fn element_limited(element: &Element, properties: &Tree) -> bool {
    element.rates.has_limits()
        || properties.contains(&element.id)
        || element.members.iter().any(|m| element_limited(m, properties))
}

fn collect_ids(node: &ElementNode, out: &mut Vec<String>) {
    out.push(node.id().to_string());
    for child in &node.children {
        collect_ids(child, out);
    }
}

fn transfer_from_properties(node: &mut ElementNode, properties: &Tree, transferred: &mut BTreeSet<String>) {
    if let Some(config) = properties.find(node.id()).and_then(|id| properties.config(id)) {
        transferred.insert(node.id().to_string());
        node.config = node.config.with_rates(config.rates.clone());
    }
    for child in &mut node.children {
        transfer_from_properties(child, properties, transferred);
    }
}
