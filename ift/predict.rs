//! # Prediction Engine
//!
//! Turns a validated [`IftModel`] into per-item scoring equations and evaluates
//! them over a dataset. For item `i` the linear predictor is
//!
//! ```text
//! n_i = slope_i * total_score + intercept_i(row)
//! ```
//!
//! where the intercept is either the item's flat no-DIF offset or the branch
//! expression compiled from its split tree. The probability is the logistic
//! transform of `n_i`, and the binary prediction is `p_i >= 0.5`.
//!
//! Items are independent of each other, so they are evaluated in parallel; each
//! item writes only its own derived columns.

use crate::dataset::{Dataset, DatasetError};
use crate::expr::{EvalError, Expr};
use crate::model::{IftModel, ItemKind, ItemSpec};
use crate::tree::TreeError;
use itertools::Itertools;
use ndarray::Array1;
use rayon::prelude::*;
use thiserror::Error;

/// Probability at or above which a record is classified as positive.
pub const CLASSIFICATION_THRESHOLD: f64 = 0.5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredictError {
    #[error(
        "The required column '{0}' was not found in the dataset. Please check spelling and case."
    )]
    MissingColumn(String),
    #[error("Output column '{0}' already exists in the dataset and would be overwritten.")]
    OutputColumnExists(String),
    #[error("Item {item}: {source}")]
    Tree {
        item: usize,
        #[source]
        source: TreeError,
    },
    #[error("Item {item}: column '{column}' could not be resolved{}.", describe_row(.row))]
    UnresolvedVariable {
        item: usize,
        column: String,
        /// `None` when the column is absent from the whole dataset.
        row: Option<usize>,
    },
    #[error(
        "Non-finite value (NaN or Infinity) in column '{column}' at row {row}. All inputs to the equations must be finite."
    )]
    NonFiniteValue { column: String, row: usize },
    #[error("Failed to attach prediction columns: {0}")]
    Dataset(#[from] DatasetError),
}

fn describe_row(row: &Option<usize>) -> String {
    match row {
        Some(row) => format!(" in row {row}"),
        None => " in the dataset".to_string(),
    }
}

/// Prefixes of the three derived columns; the item number is appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnNaming {
    pub linear_predictor: String,
    pub probability: String,
    pub prediction: String,
}

impl Default for ColumnNaming {
    fn default() -> Self {
        Self {
            linear_predictor: "n".to_string(),
            probability: "p".to_string(),
            prediction: "I".to_string(),
        }
    }
}

impl ColumnNaming {
    pub fn for_item(&self, item: usize) -> DerivedColumns {
        DerivedColumns {
            linear_predictor: format!("{}{item}", self.linear_predictor),
            probability: format!("{}{item}", self.probability),
            prediction: format!("{}{item}", self.prediction),
        }
    }
}

/// Concrete names of one item's derived columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedColumns {
    pub linear_predictor: String,
    pub probability: String,
    pub prediction: String,
}

impl DerivedColumns {
    fn names(&self) -> [&str; 3] {
        [
            self.linear_predictor.as_str(),
            self.probability.as_str(),
            self.prediction.as_str(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictOptions {
    /// Column holding each record's total score.
    pub total_score_column: String,
    pub naming: ColumnNaming,
}

impl PredictOptions {
    pub fn new(total_score_column: impl Into<String>) -> Self {
        Self {
            total_score_column: total_score_column.into(),
            naming: ColumnNaming::default(),
        }
    }
}

/// The full scoring expression of one item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemEquation {
    pub item: usize,
    pub label: String,
    pub expression: Expr,
}

/// Evaluated outputs of one item, one value per dataset row.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemPrediction {
    pub item: usize,
    pub columns: DerivedColumns,
    pub linear_predictor: Array1<f64>,
    pub probability: Array1<f64>,
    pub prediction: Array1<u8>,
}

impl ItemPrediction {
    /// Share of records classified as positive.
    pub fn positive_rate(&self) -> f64 {
        if self.prediction.is_empty() {
            return 0.0;
        }
        self.prediction.iter().map(|&c| c as f64).sum::<f64>() / self.prediction.len() as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predictions {
    /// One equation per item, in item order.
    pub equations: Vec<ItemEquation>,
    /// One set of derived columns per item, in item order.
    pub items: Vec<ItemPrediction>,
    /// The input dataset with every item's derived columns appended.
    pub dataset: Dataset,
}

impl Predictions {
    /// `(label, rendered equation)` pairs in item order.
    pub fn equation_strings(&self) -> Vec<(String, String)> {
        self.equations
            .iter()
            .map(|eq| (eq.label.clone(), eq.expression.to_string()))
            .collect()
    }
}

/// Numerically stable logistic function.
#[inline]
pub fn logistic(eta: f64) -> f64 {
    if eta >= 0.0 {
        1.0 / (1.0 + (-eta).exp())
    } else {
        let e = eta.exp();
        e / (1.0 + e)
    }
}

#[inline]
pub fn classify(probability: f64) -> u8 {
    u8::from(probability >= CLASSIFICATION_THRESHOLD)
}

/// Builds the full scoring expression of every item, in item order.
pub fn build_equations(
    model: &IftModel,
    total_score_column: &str,
) -> Result<Vec<ItemEquation>, PredictError> {
    model
        .items()
        .iter()
        .map(|item| item_equation(item, total_score_column))
        .collect()
}

fn item_equation(item: &ItemSpec, total_score_column: &str) -> Result<ItemEquation, PredictError> {
    let score_term = Expr::Product(vec![
        Expr::Coefficient(item.slope),
        Expr::Variable(total_score_column.to_string()),
    ]);

    let mut terms = vec![score_term];
    match &item.kind {
        ItemKind::Dif(tree) => match tree.equation().map_err(|source| PredictError::Tree {
            item: item.number,
            source,
        })? {
            Expr::Sum(branches) => terms.extend(branches),
            branch => terms.push(branch),
        },
        ItemKind::NoDif { offset } => terms.push(Expr::Coefficient(*offset)),
    }

    Ok(ItemEquation {
        item: item.number,
        label: item.label.clone(),
        expression: Expr::Sum(terms),
    })
}

/// Predicts every item of `model` over `dataset` with the default column naming.
pub fn predict(
    model: &IftModel,
    dataset: &Dataset,
    total_score_column: &str,
) -> Result<Predictions, PredictError> {
    predict_with(model, dataset, &PredictOptions::new(total_score_column))
}

pub fn predict_with(
    model: &IftModel,
    dataset: &Dataset,
    options: &PredictOptions,
) -> Result<Predictions, PredictError> {
    // --- 1. Validate Inputs ---
    if !dataset.has_column(&options.total_score_column) {
        return Err(PredictError::MissingColumn(
            options.total_score_column.clone(),
        ));
    }

    for item in model.items() {
        if let ItemKind::Dif(tree) = &item.kind {
            if let Some(column) = tree.variables().into_iter().find(|v| !dataset.has_column(v)) {
                return Err(PredictError::UnresolvedVariable {
                    item: item.number,
                    column: column.to_string(),
                    row: None,
                });
            }
        }
        for name in options.naming.for_item(item.number).names() {
            if dataset.has_column(name) {
                return Err(PredictError::OutputColumnExists(name.to_string()));
            }
        }
    }

    // A NaN split variable fails both indicator tests, so no leaf would be selected.
    let mut inputs = vec![options.total_score_column.as_str()];
    inputs.extend(model.split_variables());
    for column in inputs.into_iter().unique() {
        if let Some(values) = dataset.column(column) {
            if let Some(row) = values.iter().position(|v| !v.is_finite()) {
                return Err(PredictError::NonFiniteValue {
                    column: column.to_string(),
                    row,
                });
            }
        }
    }

    let num_dif = model.items().iter().filter(|item| item.is_dif()).count();
    log::info!(
        "Predicting {} items ({} with DIF, {} without) over {} records",
        model.num_items(),
        num_dif,
        model.num_items() - num_dif,
        dataset.n_rows()
    );

    // --- 2. Assemble Equations ---
    let equations = build_equations(model, &options.total_score_column)?;

    // --- 3. Evaluate Items ---
    let items = equations
        .par_iter()
        .map(|equation| evaluate_item(equation, dataset, &options.naming))
        .collect::<Result<Vec<_>, _>>()?;

    // --- 4. Attach Derived Columns ---
    let mut augmented = dataset.clone();
    for item in &items {
        log::debug!(
            "Item {}: {:.1}% of records classified positive",
            item.item,
            100.0 * item.positive_rate()
        );
        augmented.push_column(
            item.columns.linear_predictor.clone(),
            item.linear_predictor.clone(),
        )?;
        augmented.push_column(item.columns.probability.clone(), item.probability.clone())?;
        augmented.push_column(
            item.columns.prediction.clone(),
            item.prediction.mapv(f64::from),
        )?;
    }

    Ok(Predictions {
        equations,
        items,
        dataset: augmented,
    })
}

fn evaluate_item(
    equation: &ItemEquation,
    dataset: &Dataset,
    naming: &ColumnNaming,
) -> Result<ItemPrediction, PredictError> {
    let linear_predictor = dataset
        .rows()
        .map(|row| equation.expression.evaluate(&row))
        .collect::<Result<Vec<f64>, EvalError>>()
        .map_err(|err| match err {
            EvalError::UnresolvedVariable { column, row } => PredictError::UnresolvedVariable {
                item: equation.item,
                column,
                row: Some(row),
            },
        })?;

    let linear_predictor = Array1::from_vec(linear_predictor);
    let probability = linear_predictor.mapv(logistic);
    let prediction = probability.mapv(classify);

    Ok(ItemPrediction {
        item: equation.item,
        columns: naming.for_item(equation.item),
        linear_predictor,
        probability,
        prediction,
    })
}
