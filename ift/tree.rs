//! Validated per-item split trees.
//!
//! The upstream fitting procedure hands over a flat split table and a set of leaf
//! coefficients. Before anything is evaluated, each DIF item's rows are checked
//! to form a finite binary tree rooted at node 1 whose terminal nodes are exactly
//! the leaves with coefficients. Every node is then tagged as internal or leaf, so
//! later stages never have to infer it.

use crate::equation::{self, Node};
use crate::expr::Expr;
use crate::model::SplitRecord;
use ahash::AHashSet;
use itertools::Itertools;
use std::collections::BTreeMap;
use thiserror::Error;

/// The root node id of every item tree.
pub const ROOT_NODE: u32 = 1;

/// Structural problems found in a split tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error(
        "Node {node} is referenced by the tree but has no split row and is not a known leaf."
    )]
    SplitNotFound { node: u32 },
    #[error("Leaf node {node} is reachable in the tree but has no coefficient.")]
    MissingCoefficient { node: u32 },
    #[error("Node {node} is reached more than once; the split table does not form a tree.")]
    CycleDetected { node: u32 },
    #[error("Split row {node} appears more than once in the split table.")]
    DuplicateNode { node: u32 },
    #[error("Split row {node} must name both a left and a right child.")]
    IncompleteSplit { node: u32 },
    #[error("Node {node} is listed both as a split row and as a leaf with a coefficient.")]
    AmbiguousNode { node: u32 },
    #[error("Leaf {node} has a coefficient but cannot be reached from the root node.")]
    UnreachableLeaf { node: u32 },
    #[error("Split row {node} cannot be reached from the root node.")]
    UnreachableNode { node: u32 },
}

/// Role of a node after validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeKind {
    Internal { left: u32, right: u32 },
    Leaf { coefficient: f64 },
}

/// A split tree for one DIF item, checked to be well formed.
#[derive(Debug, Clone)]
pub struct ItemTree {
    splits: Vec<SplitRecord>,
    nodes: BTreeMap<u32, NodeKind>,
}

impl ItemTree {
    /// Validates `splits` (the rows belonging to one item, in any order) against the
    /// item's leaf coefficients.
    pub fn new(
        mut splits: Vec<SplitRecord>,
        coefficients: BTreeMap<u32, f64>,
    ) -> Result<Self, TreeError> {
        splits.sort_by_key(|row| row.number);

        if let Some(dup) = splits.iter().map(|row| row.number).duplicates().next() {
            return Err(TreeError::DuplicateNode { node: dup });
        }

        let mut internal = BTreeMap::new();
        for row in &splits {
            match (row.left, row.right) {
                (Some(left), Some(right)) => {
                    internal.insert(row.number, (left, right));
                }
                _ => return Err(TreeError::IncompleteSplit { node: row.number }),
            }
            if coefficients.contains_key(&row.number) {
                return Err(TreeError::AmbiguousNode { node: row.number });
            }
        }

        let mut nodes = BTreeMap::new();
        let mut visited = AHashSet::new();
        let mut stack = vec![ROOT_NODE];
        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                return Err(TreeError::CycleDetected { node });
            }
            if let Some(&(left, right)) = internal.get(&node) {
                nodes.insert(node, NodeKind::Internal { left, right });
                stack.push(right);
                stack.push(left);
            } else if let Some(&coefficient) = coefficients.get(&node) {
                nodes.insert(node, NodeKind::Leaf { coefficient });
            } else {
                return Err(TreeError::SplitNotFound { node });
            }
        }

        if let Some(&node) = coefficients.keys().find(|node| !visited.contains(*node)) {
            return Err(TreeError::UnreachableLeaf { node });
        }
        if let Some(&node) = internal.keys().find(|node| !visited.contains(*node)) {
            return Err(TreeError::UnreachableNode { node });
        }

        Ok(Self { splits, nodes })
    }

    /// Split rows of this item, sorted by node id.
    pub fn splits(&self) -> &[SplitRecord] {
        &self.splits
    }

    pub fn node(&self, id: u32) -> Option<NodeKind> {
        self.nodes.get(&id).copied()
    }

    /// Number of leaves, i.e. subgroups with their own intercept.
    pub fn num_leaves(&self) -> usize {
        self.nodes
            .values()
            .filter(|kind| matches!(kind, NodeKind::Leaf { .. }))
            .count()
    }

    /// Maximum number of splits on any root-to-leaf path.
    pub fn depth(&self) -> usize {
        fn walk(tree: &ItemTree, node: u32) -> usize {
            match tree.node(node) {
                Some(NodeKind::Internal { left, right }) => {
                    1 + walk(tree, left).max(walk(tree, right))
                }
                _ => 0,
            }
        }
        walk(self, ROOT_NODE)
    }

    /// Dataset columns this tree splits on, in node order without repeats.
    pub fn variables(&self) -> Vec<&str> {
        self.splits
            .iter()
            .map(|row| row.variable.as_str())
            .unique()
            .collect()
    }

    /// The branch expression for this item, starting at the root.
    pub fn equation(&self) -> Result<Expr, TreeError> {
        equation::build_with(ROOT_NODE, &[], |node| match self.node(node) {
            Some(NodeKind::Leaf { coefficient }) => Ok(Node::Leaf(coefficient)),
            Some(NodeKind::Internal { .. }) => self
                .split(node)
                .map(Node::Split)
                .ok_or(TreeError::SplitNotFound { node }),
            None => Err(TreeError::SplitNotFound { node }),
        })
    }

    fn split(&self, number: u32) -> Option<&SplitRecord> {
        self.splits
            .binary_search_by_key(&number, |row| row.number)
            .ok()
            .map(|i| &self.splits[i])
    }
}
