//! Arena-backed rate limit tree.
//!
//! Nodes live in a `Vec` and refer to each other by [`NodeId`]. The parent
//! link is an index, so upward walks never hold ownership. Transforms such as
//! [`Tree::retain`] and [`Tree::map_configs`] return a new tree.

use std::collections::HashMap;

use crate::error::{RateGateError, Result};
use crate::ratelimit::RateConfig;

/// Index of a node within one [`Tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct NodeData {
    name: String,
    config: Option<RateConfig>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// A tree of named nodes, unique by name, rooted at a reserved name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    nodes: Vec<NodeData>,
    index: HashMap<String, NodeId>,
}

impl Tree {
    /// Create a tree holding only a root without config.
    pub fn new(root_name: impl Into<String>) -> Self {
        let name = root_name.into();
        let mut index = HashMap::new();
        index.insert(name.clone(), NodeId(0));
        Self {
            nodes: vec![NodeData {
                name,
                config: None,
                parent: None,
                children: Vec::new(),
            }],
            index,
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn root_name(&self) -> &str {
        &self.nodes[0].name
    }

    pub fn is_root(&self, id: NodeId) -> bool {
        id.0 == 0
    }

    /// Add a child under `parent`.
    ///
    /// Fails if the name equals the parent's name or already exists in this tree.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        config: Option<RateConfig>,
    ) -> Result<NodeId> {
        let name = name.into();
        if self.nodes[parent.0].name == name {
            return Err(RateGateError::SelfReference { name });
        }
        if self.index.contains_key(&name) {
            return Err(RateGateError::DuplicateNode {
                name,
                tree: self.root_name().to_string(),
            });
        }

        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeData {
            name: name.clone(),
            config,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        self.index.insert(name, id);
        Ok(id)
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn name(&self, id: NodeId) -> &str {
        &self.nodes[id.0].name
    }

    pub fn config(&self, id: NodeId) -> Option<&RateConfig> {
        self.nodes[id.0].config.as_ref()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Every node id in insertion order, root first.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    /// True if the tree holds nothing but its root.
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Strict ancestors of a node, nearest first, root last.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |n| self.parent(*n))
    }

    /// All nodes in depth-first pre-order, root first.
    pub fn preorder(&self) -> Vec<NodeId> {
        self.preorder_from(self.root())
    }

    /// `start` and its descendants in depth-first pre-order.
    pub fn preorder_from(&self, start: NodeId) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        order
    }

    /// Leaves under `start` (inclusive) in pre-order.
    pub fn leaves_from(&self, start: NodeId) -> Vec<NodeId> {
        self.preorder_from(start)
            .into_iter()
            .filter(|id| self.children(*id).is_empty())
            .collect()
    }

    pub fn leaves(&self) -> Vec<NodeId> {
        self.leaves_from(self.root())
    }

    /// Build a new tree keeping the nodes for which `keep` holds.
    ///
    /// The root is always kept. A dropped node drops its whole subtree.
    pub fn retain<F>(&self, mut keep: F) -> Tree
    where
        F: FnMut(&Tree, NodeId) -> bool,
    {
        let mut out = Tree::new(self.root_name());
        out.nodes[0].config = self.nodes[0].config.clone();

        let mut stack: Vec<(NodeId, NodeId)> = self
            .children(self.root())
            .iter()
            .rev()
            .map(|c| (*c, out.root()))
            .collect();
        while let Some((id, new_parent)) = stack.pop() {
            if !keep(self, id) {
                continue;
            }
            let data = &self.nodes[id.0];
            let new_id = out.push_unchecked(new_parent, data.name.clone(), data.config.clone());
            stack.extend(self.children(id).iter().rev().map(|c| (*c, new_id)));
        }
        out
    }

    /// Build a new tree of the same shape with configs rewritten by `f`.
    pub fn map_configs<F>(&self, mut f: F) -> Tree
    where
        F: FnMut(&str, Option<&RateConfig>) -> Option<RateConfig>,
    {
        let mut out = self.clone();
        for node in &mut out.nodes {
            node.config = f(&node.name, node.config.as_ref());
        }
        out
    }

    // Source tree already enforced name uniqueness.
    fn push_unchecked(&mut self, parent: NodeId, name: String, config: Option<RateConfig>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.index.insert(name.clone(), id);
        self.nodes.push(NodeData {
            name,
            config,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Tree {
        let mut tree = Tree::new("root");
        let a = tree.add_child(tree.root(), "a", None).unwrap();
        tree.add_child(a, "a1", None).unwrap();
        tree.add_child(a, "a2", None).unwrap();
        tree.add_child(tree.root(), "b", None).unwrap();
        tree
    }

    fn names(tree: &Tree, ids: &[NodeId]) -> Vec<String> {
        ids.iter().map(|id| tree.name(*id).to_string()).collect()
    }

    #[test]
    fn test_preorder_and_leaves() {
        let tree = sample();
        assert_eq!(names(&tree, &tree.preorder()), vec!["root", "a", "a1", "a2", "b"]);
        assert_eq!(names(&tree, &tree.leaves()), vec!["a1", "a2", "b"]);
        assert_eq!(tree.len(), 5);
        assert!(!tree.is_empty());
    }

    #[test]
    fn test_parent_links() {
        let tree = sample();
        let a1 = tree.find("a1").unwrap();
        let ancestors: Vec<_> = tree.ancestors(a1).collect();
        assert_eq!(names(&tree, &ancestors), vec!["a", "root"]);
        assert!(tree.parent(tree.root()).is_none());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut tree = sample();
        let b = tree.find("b").unwrap();
        let err = tree.add_child(b, "a1", None).unwrap_err();
        assert!(matches!(err, RateGateError::DuplicateNode { .. }));
    }

    #[test]
    fn test_self_reference_rejected() {
        let mut tree = sample();
        let b = tree.find("b").unwrap();
        let err = tree.add_child(b, "b", None).unwrap_err();
        assert!(matches!(err, RateGateError::SelfReference { .. }));
    }

    #[test]
    fn test_retain_drops_subtrees() {
        let tree = sample();
        let pruned = tree.retain(|t, id| t.name(id) != "a");
        assert_eq!(names(&pruned, &pruned.preorder()), vec!["root", "b"]);
        assert!(!pruned.contains("a1"));
        // the source tree is untouched
        assert!(tree.contains("a1"));
    }

    #[test]
    fn test_retain_everything_out() {
        let tree = sample();
        let pruned = tree.retain(|_, _| false);
        assert!(pruned.is_empty());
        assert_eq!(pruned.root_name(), "root");
    }

    #[test]
    fn test_leaves_from_subtree() {
        let tree = sample();
        let a = tree.find("a").unwrap();
        assert_eq!(names(&tree, &tree.leaves_from(a)), vec!["a1", "a2"]);
    }
}
