//! Building and merging the two source trees.
//!
//! The property tree is flat: every name-keyed entry hangs directly off the
//! property root. The element tree mirrors element nesting. Merging overrides
//! element rates with same-named property rates ("transfer"), then prunes both
//! trees. Every step returns a new [`Tree`].

use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, info};

use super::node::{NodeId, Tree};
use crate::element::ElementNode;
use crate::error::{RateGateError, Result};
use crate::ratelimit::{RateConfig, RateSource, Rates};

/// Root name of the tree built from name-keyed configuration.
pub const PROPERTIES_ROOT: &str = "rategate.properties-root";
/// Root name of the tree built from code elements.
pub const ELEMENTS_ROOT: &str = "rategate.elements-root";

fn check_reserved(name: &str) -> Result<()> {
    if name == PROPERTIES_ROOT || name == ELEMENTS_ROOT {
        return Err(RateGateError::ReservedName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Build the flat property tree, returning it with its configs keyed by name.
pub fn build_property_tree(
    rate_limits: &BTreeMap<String, Rates>,
) -> Result<(Tree, BTreeMap<String, RateConfig>)> {
    let mut tree = Tree::new(PROPERTIES_ROOT);
    let mut configs = BTreeMap::new();

    for (name, rates) in rate_limits {
        check_reserved(name)?;
        let config = RateConfig::new(RateSource::property(name.clone(), rates), rates.clone());
        tree.add_child(tree.root(), name.clone(), Some(config.clone()))?;
        configs.insert(name.clone(), config);
    }

    Ok((tree, configs))
}

/// Build the element tree from discovered elements.
pub fn build_element_tree(nodes: &[ElementNode]) -> Result<Tree> {
    let mut tree = Tree::new(ELEMENTS_ROOT);
    let root = tree.root();
    for node in nodes {
        add_element_node(&mut tree, root, node)?;
    }
    Ok(tree)
}

/// Link a discovered element and its members under `parent`.
pub fn add_element_node(tree: &mut Tree, parent: NodeId, node: &ElementNode) -> Result<NodeId> {
    check_reserved(node.id())?;
    let id = tree.add_child(parent, node.id().to_string(), Some(node.config.clone()))?;
    for child in &node.children {
        add_element_node(tree, id, child)?;
    }
    Ok(id)
}

/// Override element rates with same-named property rates.
///
/// The element's source is kept so path and method matching still target the
/// element. Returns the rewritten tree and the transferred names.
pub fn transfer(
    elements: &Tree,
    property_configs: &BTreeMap<String, RateConfig>,
) -> (Tree, BTreeSet<String>) {
    let mut transferred = BTreeSet::new();
    let tree = elements.map_configs(|name, config| match (config, property_configs.get(name)) {
        (Some(config), Some(property)) => {
            debug!(name = %name, "Transferring property rates onto element");
            transferred.insert(name.to_string());
            Some(config.with_rates(property.rates.clone()))
        }
        (config, _) => config.cloned(),
    });
    (tree, transferred)
}

/// A node is rate limited if it is the root, was transferred, or its source
/// declares limits.
pub fn is_rate_limited(tree: &Tree, id: NodeId, transferred: &BTreeSet<String>) -> bool {
    tree.is_root(id)
        || transferred.contains(tree.name(id))
        || tree
            .config(id)
            .is_some_and(|c| c.source.is_rate_limited())
}

/// True if the node or any node beneath it is rate limited.
pub fn has_rate_limited_descendant(tree: &Tree, id: NodeId, transferred: &BTreeSet<String>) -> bool {
    is_rate_limited(tree, id, transferred)
        || tree
            .children(id)
            .iter()
            .any(|c| has_rate_limited_descendant(tree, *c, transferred))
}

/// Keep only subtrees containing a rate-limited node.
///
/// Ancestors without limits of their own survive when something below them
/// is rate limited.
pub fn prune_elements(tree: &Tree, transferred: &BTreeSet<String>) -> Tree {
    // Post-order pass so each node is decided once.
    let mut keep: HashSet<NodeId> = HashSet::new();
    for id in tree.preorder().into_iter().rev() {
        if tree.is_root(id) {
            continue;
        }
        let limited = is_rate_limited(tree, id, transferred)
            || tree.children(id).iter().any(|c| keep.contains(c));
        if limited {
            keep.insert(id);
        }
    }
    tree.retain(|_, id| keep.contains(&id))
}

/// Drop property nodes now served from the element tree.
pub fn prune_properties(tree: &Tree, transferred: &BTreeSet<String>) -> Tree {
    tree.retain(|t, id| !transferred.contains(t.name(id)))
}

/// The two merged and pruned source trees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedTrees {
    pub properties: Tree,
    pub elements: Tree,
    /// Names whose property rates now live on an element node
    pub transferred: BTreeSet<String>,
}

impl MergedTrees {
    /// Build, transfer and prune both source trees.
    pub fn build(rate_limits: &BTreeMap<String, Rates>, elements: &[ElementNode]) -> Result<Self> {
        let (property_tree, property_configs) = build_property_tree(rate_limits)?;
        let element_tree = build_element_tree(elements)?;

        let (element_tree, transferred) = transfer(&element_tree, &property_configs);
        let elements = prune_elements(&element_tree, &transferred);
        let properties = prune_properties(&property_tree, &transferred);

        info!(
            property_nodes = properties.len() - 1,
            element_nodes = elements.len() - 1,
            transferred = transferred.len(),
            pruned = element_tree.len() - elements.len(),
            "Rate limit trees merged"
        );

        Ok(Self {
            properties,
            elements,
            transferred,
        })
    }

    pub fn is_transferred(&self, name: &str) -> bool {
        self.transferred.contains(name)
    }
}
