//! # Typed Scoring Expressions
//!
//! Every item equation is held as a small expression tree rather than as text.
//! The tree is evaluated by a recursive interpreter against one row at a time and
//! can be rendered back to a readable string for auditing. Rendering is a view of
//! the tree; nothing downstream ever parses it.

use ahash::AHashSet;
#[cfg(test)]
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Comparison used by an indicator term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// `value <= threshold`, the left branch of a split.
    LessOrEqual,
    /// `value > threshold`, the right branch of a split.
    Greater,
}

impl Comparison {
    #[inline]
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::LessOrEqual => value <= threshold,
            Comparison::Greater => value > threshold,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Comparison::LessOrEqual => "<=",
            Comparison::Greater => ">",
        }
    }
}

/// A node of a scoring expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A literal coefficient.
    Coefficient(f64),
    /// The value of a named column in the current row.
    Variable(String),
    /// `1.0` when the comparison holds for the row, `0.0` otherwise.
    Indicator {
        variable: String,
        op: Comparison,
        threshold: f64,
    },
    /// Product of all terms. Empty product is `1.0`.
    Product(Vec<Expr>),
    /// Sum of all terms. Empty sum is `0.0`.
    Sum(Vec<Expr>),
}

/// A failure while evaluating an expression against a row.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("Column '{column}' referenced by the model is not present in row {row}.")]
    UnresolvedVariable { column: String, row: usize },
}

/// Read access to one record of a dataset, keyed by column name.
pub trait Row {
    /// Zero-based position of the row, used in error messages.
    fn index(&self) -> usize;

    fn value(&self, column: &str) -> Option<f64>;
}

#[cfg(test)]
impl Row for HashMap<String, f64> {
    fn index(&self) -> usize {
        0
    }

    fn value(&self, column: &str) -> Option<f64> {
        self.get(column).copied()
    }
}

impl Expr {
    pub fn indicator(variable: impl Into<String>, op: Comparison, threshold: f64) -> Self {
        Expr::Indicator {
            variable: variable.into(),
            op,
            threshold,
        }
    }

    /// Evaluates the expression for a single row.
    pub fn evaluate<R: Row + ?Sized>(&self, row: &R) -> Result<f64, EvalError> {
        match self {
            Expr::Coefficient(value) => Ok(*value),
            Expr::Variable(name) => lookup(row, name),
            Expr::Indicator {
                variable,
                op,
                threshold,
            } => {
                let value = lookup(row, variable)?;
                Ok(if op.holds(value, *threshold) { 1.0 } else { 0.0 })
            }
            Expr::Product(terms) => {
                let mut acc = 1.0;
                for term in terms {
                    acc *= term.evaluate(row)?;
                }
                Ok(acc)
            }
            Expr::Sum(terms) => {
                let mut acc = 0.0;
                for term in terms {
                    acc += term.evaluate(row)?;
                }
                Ok(acc)
            }
        }
    }

    /// Column names referenced anywhere in the expression, in first-occurrence order.
    pub fn variables(&self) -> Vec<&str> {
        let mut seen = AHashSet::new();
        let mut out = Vec::new();
        self.collect_variables(&mut seen, &mut out);
        out
    }

    fn collect_variables<'a>(&'a self, seen: &mut AHashSet<&'a str>, out: &mut Vec<&'a str>) {
        match self {
            Expr::Coefficient(_) => {}
            Expr::Variable(name) | Expr::Indicator { variable: name, .. } => {
                if seen.insert(name.as_str()) {
                    out.push(name.as_str());
                }
            }
            Expr::Product(terms) | Expr::Sum(terms) => {
                for term in terms {
                    term.collect_variables(seen, out);
                }
            }
        }
    }
}

fn lookup<R: Row + ?Sized>(row: &R, column: &str) -> Result<f64, EvalError> {
    row.value(column).ok_or_else(|| EvalError::UnresolvedVariable {
        column: column.to_string(),
        row: row.index(),
    })
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Coefficient(value) => write!(f, "{value}"),
            Expr::Variable(name) => f.write_str(name),
            Expr::Indicator {
                variable,
                op,
                threshold,
            } => write!(f, "({variable} {} {threshold})", op.symbol()),
            Expr::Product(terms) => {
                if terms.is_empty() {
                    return f.write_str("1");
                }
                write_joined(f, terms, " * ")
            }
            Expr::Sum(terms) => {
                if terms.is_empty() {
                    return f.write_str("0");
                }
                write_joined(f, terms, " + ")
            }
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, terms: &[Expr], separator: &str) -> fmt::Result {
    for (i, term) in terms.iter().enumerate() {
        if i > 0 {
            f.write_str(separator)?;
        }
        // Nested sums and products are parenthesised so the rendering keeps its grouping.
        match term {
            Expr::Product(inner) | Expr::Sum(inner) if inner.len() > 1 => write!(f, "({term})")?,
            _ => write!(f, "{term}")?,
        }
    }
    Ok(())
}
