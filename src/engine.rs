//! Compiled trees and request evaluation.
//!
//! Compiling attaches a matcher, a limiter and a listener to every node of a
//! source tree. Evaluation walks each leaf chain upward, charging the limiter
//! of every node whose matcher accepts the request:
//!
//! - a node without limits, a non-matching matcher or a disabled matcher
//!   ends the chain;
//! - a denied permit is recorded and ends the chain;
//! - a node delegating to its parent charges its key to the nearest ancestor
//!   with limits, and the walk resumes above that ancestor.
//!
//! With `first_match_only` a tree stops after the first chain that took a
//! permit. A request is admitted only if neither tree recorded a denial.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::{RateGateError, Result};
use crate::matcher::{EndpointMatcherProvider, MatchResult, MatcherComposer, NodeMatchers};
use crate::ratelimit::{LimiterProvider, Operator, RateLimiter, Rates};
use crate::registry::{RateLimitEvent, RateLimitListener, Registries};
use crate::request::RequestFacts;
use crate::tree::{NodeId, Tree};

/// Which source tree a node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeKind {
    Properties,
    Elements,
}

impl fmt::Display for TreeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeKind::Properties => f.write_str("properties"),
            TreeKind::Elements => f.write_str("elements"),
        }
    }
}

/// A limit that denied a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceededLimit {
    pub tree: TreeKind,
    pub node: String,
    pub key: String,
}

impl fmt::Display for ExceededLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (key '{}', {} tree)", self.node, self.key, self.tree)
    }
}

/// Result of one limiter step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing to do at this node
    Noop,
    NoMatch,
    Success,
    Failure,
}

/// The limiter side of a compiled node.
#[derive(Clone)]
pub enum LimiterSlot {
    /// The node has no limits
    Noop,
    Single(Arc<dyn RateLimiter>),
    /// One limiter per limit, each gated by its own condition
    PerLimit(Vec<Arc<dyn RateLimiter>>),
}

impl LimiterSlot {
    pub fn is_noop(&self) -> bool {
        matches!(self, LimiterSlot::Noop)
    }
}

impl fmt::Debug for LimiterSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimiterSlot::Noop => f.write_str("Noop"),
            LimiterSlot::Single(_) => f.write_str("Single"),
            LimiterSlot::PerLimit(limiters) => write!(f, "PerLimit({})", limiters.len()),
        }
    }
}

/// Everything evaluation needs at one node.
#[derive(Clone)]
pub struct CompiledNode {
    pub matchers: NodeMatchers,
    pub limiter: LimiterSlot,
    pub operator: Operator,
    pub delegate_to_parent: bool,
    listener: Arc<dyn RateLimitListener>,
}

impl fmt::Debug for CompiledNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledNode")
            .field("matchers", &self.matchers)
            .field("limiter", &self.limiter)
            .field("operator", &self.operator)
            .field("delegate_to_parent", &self.delegate_to_parent)
            .finish()
    }
}

/// What compiling a node draws on.
#[derive(Clone, Copy)]
pub struct CompileContext<'a> {
    pub registries: &'a Registries,
    pub endpoints: &'a dyn EndpointMatcherProvider,
    pub limiters: &'a dyn LimiterProvider,
}

impl CompileContext<'_> {
    /// Compile one node; `None` for nodes without a config.
    pub fn compile_node(&self, tree: &Tree, id: NodeId) -> Result<Option<CompiledNode>> {
        let Some(config) = tree.config(id) else {
            return Ok(None);
        };
        let name = tree.name(id);
        let matchers = MatcherComposer::new(self.endpoints, self.registries).compose(tree, id)?;

        let limiter = if !config.rates.has_limits() {
            LimiterSlot::Noop
        } else {
            let registered = self.registries.limiter_provider(name);
            let provider: &dyn LimiterProvider = match &registered {
                Some(provider) => provider.as_ref(),
                None => self.limiters,
            };
            if config.rates.has_limit_conditions() {
                LimiterSlot::PerLimit(
                    config
                        .rates
                        .limits
                        .iter()
                        .map(|limit| {
                            let single = Rates::of(limit.clone()).operator(config.rates.operator);
                            provider.create(&config.with_rates(single))
                        })
                        .collect(),
                )
            } else {
                LimiterSlot::Single(provider.create(config))
            }
        };

        trace!(node = %name, limiter = ?limiter, "Compiled node");
        Ok(Some(CompiledNode {
            matchers,
            limiter,
            operator: config.rates.operator,
            delegate_to_parent: config.source.delegates_to_parent(),
            listener: self.registries.listener(name),
        }))
    }
}

/// A source tree with a compiled node for every config-bearing node.
#[derive(Clone)]
pub struct CompiledTree {
    kind: TreeKind,
    tree: Tree,
    nodes: Vec<Option<CompiledNode>>,
    first_match_only: bool,
}

impl fmt::Debug for CompiledTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledTree")
            .field("kind", &self.kind)
            .field("nodes", &self.tree.len())
            .field("first_match_only", &self.first_match_only)
            .finish()
    }
}

impl CompiledTree {
    pub fn compile(kind: TreeKind, tree: Tree, first_match_only: bool, ctx: &CompileContext<'_>) -> Result<Self> {
        let nodes = tree
            .ids()
            .map(|id| ctx.compile_node(&tree, id))
            .collect::<Result<Vec<_>>>()?;
        debug!(tree = %kind, nodes = nodes.len(), first_match_only, "Compiled rate limit tree");
        Ok(Self {
            kind,
            tree,
            nodes,
            first_match_only,
        })
    }

    /// Adopt a tree grown from this one, compiling only the new nodes.
    pub fn extend(&self, tree: Tree, ctx: &CompileContext<'_>) -> Result<Self> {
        let mut nodes = self.nodes.clone();
        for id in tree.ids().skip(nodes.len()) {
            nodes.push(ctx.compile_node(&tree, id)?);
        }
        Ok(Self {
            kind: self.kind,
            tree,
            nodes,
            first_match_only: self.first_match_only,
        })
    }

    /// Store the generated matchers of nodes from position `from` onwards
    /// under their names. Called once the tree is live.
    pub fn publish_matchers(&self, registries: &Registries, from: usize) {
        for id in self.tree.ids().skip(from) {
            if let Some(generated) = self.node(id).and_then(|n| n.matchers.unpublished.as_ref()) {
                registries.register_matcher(self.tree.name(id), generated.clone());
            }
        }
    }

    /// Adopt a pruned copy of this tree, reusing compiled nodes by name.
    pub fn reindex(&self, tree: Tree) -> Self {
        let nodes = tree
            .ids()
            .map(|id| {
                self.tree
                    .find(tree.name(id))
                    .and_then(|old| self.nodes[old.index()].clone())
            })
            .collect();
        Self {
            kind: self.kind,
            tree,
            nodes,
            first_match_only: self.first_match_only,
        }
    }

    pub fn kind(&self) -> TreeKind {
        self.kind
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn node(&self, id: NodeId) -> Option<&CompiledNode> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    pub fn first_match_only(&self) -> bool {
        self.first_match_only
    }

    /// Evaluate the request against every leaf chain under `start`.
    pub fn evaluate(&self, request: &dyn RequestFacts, start: NodeId) -> Result<TreeOutcome> {
        let mut outcome = TreeOutcome::default();
        for leaf in self.tree.leaves_from(start) {
            let consumed = self.walk_chain(request, leaf, &mut outcome)?;
            if consumed && self.first_match_only {
                trace!(tree = %self.kind, leaf = %self.tree.name(leaf), "First match taken");
                break;
            }
        }
        Ok(outcome)
    }

    /// Walk from `leaf` toward the root. Returns whether any permit was taken.
    fn walk_chain(&self, request: &dyn RequestFacts, leaf: NodeId, outcome: &mut TreeOutcome) -> Result<bool> {
        let mut consumed = false;
        let mut current = Some(leaf);

        while let Some(id) = current.filter(|id| !self.tree.is_root(*id)) {
            let Some(node) = self.node(id) else {
                break;
            };

            let (charged, result) = if node.delegate_to_parent {
                let key = match node.matchers.main.matches(request) {
                    MatchResult::Matched(key) => key,
                    _ => break,
                };
                let Some(target) = self.nearest_limited_ancestor(id) else {
                    break;
                };
                let Some(target_node) = self.node(target) else {
                    break;
                };
                trace!(node = %self.tree.name(id), target = %self.tree.name(target), "Delegating to ancestor");
                (target, self.attempt(request, target, target_node, &key, outcome)?)
            } else {
                if node.limiter.is_noop() {
                    break;
                }
                let key = match node.matchers.main.matches(request) {
                    MatchResult::Matched(key) => key,
                    _ => break,
                };
                (id, self.attempt(request, id, node, &key, outcome)?)
            };

            match result {
                Outcome::Success => consumed = true,
                _ => break,
            }
            current = self.tree.parent(charged);
        }

        outcome.chains += 1;
        Ok(consumed)
    }

    fn nearest_limited_ancestor(&self, id: NodeId) -> Option<NodeId> {
        self.tree
            .ancestors(id)
            .take_while(|a| !self.tree.is_root(*a))
            .find(|a| self.node(*a).is_some_and(|n| !n.limiter.is_noop()))
    }

    /// Take a permit at `id` for `key`.
    fn attempt(
        &self,
        request: &dyn RequestFacts,
        id: NodeId,
        node: &CompiledNode,
        key: &str,
        outcome: &mut TreeOutcome,
    ) -> Result<Outcome> {
        let name = self.tree.name(id);
        node.listener.on_event(&RateLimitEvent::Matched { node: name, key });

        let result = match &node.limiter {
            LimiterSlot::Noop => Outcome::Noop,
            LimiterSlot::Single(limiter) => acquired(limiter.try_acquire(key)?),
            LimiterSlot::PerLimit(limiters) => {
                let mut results = Vec::with_capacity(limiters.len());
                for (index, limiter) in limiters.iter().enumerate() {
                    let applies = match node.matchers.per_limit.get(index) {
                        Some(Some(condition)) => condition.matches(request).is_match(),
                        _ => true,
                    };
                    if applies {
                        results.push(limiter.try_acquire(key)?);
                    }
                }
                if results.is_empty() {
                    Outcome::NoMatch
                } else {
                    acquired(match node.operator {
                        Operator::And => results.iter().all(|r| *r),
                        Operator::Or => results.iter().any(|r| *r),
                    })
                }
            }
        };

        match result {
            Outcome::Success => {
                outcome.consumed += 1;
                node.listener.on_event(&RateLimitEvent::Consumed { node: name, key });
            }
            Outcome::Failure => {
                node.listener.on_event(&RateLimitEvent::Exceeded { node: name, key });
                outcome.exceeded.push(ExceededLimit {
                    tree: self.kind,
                    node: name.to_string(),
                    key: key.to_string(),
                });
            }
            Outcome::Noop | Outcome::NoMatch => {}
        }
        Ok(result)
    }
}

fn acquired(admitted: bool) -> Outcome {
    if admitted {
        Outcome::Success
    } else {
        Outcome::Failure
    }
}

/// What evaluating one tree produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeOutcome {
    /// Leaf chains walked
    pub chains: usize,
    /// Permits taken
    pub consumed: usize,
    pub exceeded: Vec<ExceededLimit>,
}

impl TreeOutcome {
    pub fn admitted(&self) -> bool {
        self.exceeded.is_empty()
    }
}

/// The verdict for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub admitted: bool,
    pub exceeded: Vec<ExceededLimit>,
}

impl Decision {
    pub fn admit() -> Self {
        Self {
            admitted: true,
            exceeded: Vec::new(),
        }
    }

    fn combine(properties: TreeOutcome, elements: TreeOutcome) -> Self {
        let mut exceeded = properties.exceeded;
        exceeded.extend(elements.exceeded);
        Self {
            admitted: exceeded.is_empty(),
            exceeded,
        }
    }

    /// `Ok(())` if admitted, otherwise [`RateGateError::LimitExceeded`].
    pub fn into_result(self) -> Result<()> {
        if self.admitted {
            Ok(())
        } else {
            Err(RateGateError::LimitExceeded(self.exceeded))
        }
    }
}

/// The pair of compiled trees requests are evaluated against.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub properties: CompiledTree,
    pub elements: CompiledTree,
    /// Property names whose rates live on an element node
    pub transferred: BTreeSet<String>,
}

/// Evaluate both trees, properties first.
///
/// Both trees always run. If either fails the first error is returned after
/// the other has been evaluated.
pub fn evaluate(snapshot: &Snapshot, request: &dyn RequestFacts, element: Option<NodeId>) -> Result<Decision> {
    let properties = match element {
        None => snapshot
            .properties
            .evaluate(request, snapshot.properties.tree().root()),
        Some(_) => Ok(TreeOutcome::default()),
    };
    let elements = snapshot
        .elements
        .evaluate(request, element.unwrap_or_else(|| snapshot.elements.tree().root()));

    let decision = Decision::combine(properties?, elements?);
    if !decision.admitted {
        debug!(exceeded = decision.exceeded.len(), "Request denied");
    }
    Ok(decision)
}

/// Evaluates requests against a fixed snapshot.
///
/// Created by the gate. A factory bound to one element evaluates only that
/// element's subtree.
#[derive(Debug, Clone)]
pub struct LimiterFactory {
    snapshot: Arc<Snapshot>,
    element: Option<NodeId>,
    enabled: bool,
}

impl LimiterFactory {
    pub(crate) fn new(snapshot: Arc<Snapshot>, element: Option<NodeId>, enabled: bool) -> Self {
        Self {
            snapshot,
            element,
            enabled,
        }
    }

    /// Decide whether `request` may proceed, taking permits as it goes.
    pub fn try_acquire(&self, request: &dyn RequestFacts) -> Result<Decision> {
        if !self.enabled {
            return Ok(Decision::admit());
        }
        evaluate(&self.snapshot, request, self.element)
    }

    /// The element this factory is bound to, if any.
    pub fn element(&self) -> Option<&str> {
        self.element.map(|id| self.snapshot.elements.tree().name(id))
    }
}
