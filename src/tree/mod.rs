//! Rate limit trees: the arena structure and the dual-source builder.

mod builder;
mod node;

pub use builder::{
    add_element_node, build_element_tree, build_property_tree, has_rate_limited_descendant,
    is_rate_limited, prune_elements, prune_properties, transfer, MergedTrees, ELEMENTS_ROOT,
    PROPERTIES_ROOT,
};
pub use node::{NodeId, Tree};
