//! Compiles one item's split tree into a closed-form branch expression.
//!
//! Each leaf contributes `coefficient * (cond_1) * ... * (cond_k)` where the
//! conditions are the split tests on the path from the root to that leaf. All
//! leaf terms are summed, so for any row exactly one term is nonzero.

use crate::expr::{Comparison, Expr};
use crate::model::SplitRecord;
use crate::tree::TreeError;
use std::collections::{BTreeMap, BTreeSet};

/// What a node id resolves to while a tree is being walked.
#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    Split(&'a SplitRecord),
    Leaf(f64),
}

/// Builds the branch expression for the subtree rooted at `node_id`.
///
/// `conditions` are the indicator terms already accumulated above `node_id`;
/// pass an empty slice when starting from the root. A node id is a leaf when it
/// is a member of `leaf_ids`; otherwise it must have exactly one row in
/// `split_table`.
pub fn build(
    node_id: u32,
    split_table: &[SplitRecord],
    leaf_ids: &BTreeSet<u32>,
    leaf_coefficients: &BTreeMap<u32, f64>,
    conditions: &[Expr],
) -> Result<Expr, TreeError> {
    build_with(node_id, conditions, |node| {
        if leaf_ids.contains(&node) {
            return leaf_coefficients
                .get(&node)
                .map(|&coefficient| Node::Leaf(coefficient))
                .ok_or(TreeError::MissingCoefficient { node });
        }
        split_table
            .iter()
            .find(|row| row.number == node)
            .map(Node::Split)
            .ok_or(TreeError::SplitNotFound { node })
    })
}

/// Same as [`build`], but resolves node ids through `lookup`.
pub fn build_with<'a, F>(node_id: u32, conditions: &[Expr], lookup: F) -> Result<Expr, TreeError>
where
    F: Fn(u32) -> Result<Node<'a>, TreeError>,
{
    let mut walk = Walk {
        lookup,
        conditions: conditions.to_vec(),
        ancestors: Vec::new(),
        terms: Vec::new(),
    };
    walk.visit(node_id)?;

    let mut terms = walk.terms;
    Ok(match terms.len() {
        1 => terms.pop().unwrap_or(Expr::Sum(Vec::new())),
        _ => Expr::Sum(terms),
    })
}

struct Walk<F> {
    lookup: F,
    conditions: Vec<Expr>,
    ancestors: Vec<u32>,
    terms: Vec<Expr>,
}

impl<'a, F> Walk<F>
where
    F: Fn(u32) -> Result<Node<'a>, TreeError>,
{
    fn visit(&mut self, node_id: u32) -> Result<(), TreeError> {
        if self.ancestors.contains(&node_id) {
            return Err(TreeError::CycleDetected { node: node_id });
        }

        let split = match (self.lookup)(node_id)? {
            Node::Leaf(coefficient) => {
                self.terms.push(leaf_term(coefficient, &self.conditions));
                return Ok(());
            }
            Node::Split(split) => split,
        };
        let (left, right) = match (split.left, split.right) {
            (Some(left), Some(right)) => (left, right),
            _ => return Err(TreeError::IncompleteSplit { node: node_id }),
        };

        self.ancestors.push(node_id);
        for (child, op) in [(left, Comparison::LessOrEqual), (right, Comparison::Greater)] {
            self.conditions
                .push(Expr::indicator(split.variable.clone(), op, split.threshold));
            let result = self.visit(child);
            self.conditions.pop();
            result?;
        }
        self.ancestors.pop();
        Ok(())
    }
}

fn leaf_term(coefficient: f64, conditions: &[Expr]) -> Expr {
    if conditions.is_empty() {
        return Expr::Coefficient(coefficient);
    }
    let mut factors = Vec::with_capacity(conditions.len() + 1);
    factors.push(Expr::Coefficient(coefficient));
    factors.extend_from_slice(conditions);
    Expr::Product(factors)
}
