#![deny(dead_code)]
#![deny(unused_imports)]

//! Compiles fitted item-focused tree (IFT) models into per-item scoring equations
//! and evaluates them into logistic predictions over a dataset.

pub mod data;
pub mod dataset;
pub mod equation;
pub mod expr;
pub mod model;
pub mod predict;
pub mod tree;

pub use dataset::Dataset;
pub use model::IftModel;
pub use predict::{PredictError, PredictOptions, Predictions, predict, predict_with};
