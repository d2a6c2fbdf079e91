//! # Data Loading and Output Module
//!
//! Reads tab-separated response data, validates the columns the model needs, and
//! writes the augmented table back out once predictions are attached.
//!
//! - Only the total-score column and the split variables are required; they must
//!   be numeric, complete, and finite. Every other column is carried through to
//!   the output untouched.
//! - Failures are assumed to be user-input errors, so `DataError` names the
//!   offending column.

use crate::dataset::{Dataset, DatasetError};
use crate::predict::Predictions;
use ahash::AHashSet;
use ndarray::Array1;
use polars::prelude::*;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// A comprehensive error type for all data loading and writing failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "The required column '{column_name}' could not be converted to the expected type '{expected_type}'. It contains non-numeric data. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Missing or null values were found in the required column '{0}'. This tool requires complete data with no missing values."
    )]
    MissingValuesFound(String),
    #[error(
        "Non-finite values (NaN or Infinity) were found in the required column '{0}'. This tool requires all data to be finite."
    )]
    NonFiniteValuesFound(String),
    #[error("Output column '{0}' already exists in the input file and would be overwritten.")]
    OutputColumnExists(String),
    #[error("Failed to assemble the dataset: {0}")]
    DatasetError(#[from] DatasetError),
}

/// A loaded input table: the full frame for output, and the validated numeric
/// columns for prediction.
#[derive(Debug)]
pub struct LoadedData {
    pub frame: DataFrame,
    pub dataset: Dataset,
}

/// Loads a TSV file and extracts `required_columns` as validated `f64` columns.
pub fn load_dataset(path: &str, required_columns: &[&str]) -> Result<LoadedData, DataError> {
    log::info!("Loading data from '{path}'");

    let frame = CsvReader::new(File::open(Path::new(path))?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_parse_options(CsvParseOptions::default().with_separator(b'\t')),
        )
        .finish()?;

    let available: AHashSet<String> = frame
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();

    let mut dataset = Dataset::new();
    let mut seen = AHashSet::new();
    for &name in required_columns {
        if !seen.insert(name) {
            continue;
        }
        if !available.contains(name) {
            return Err(DataError::ColumnNotFound(name.to_string()));
        }
        let values = extract_numeric_column(&frame, name)?;
        dataset.push_column(name, Array1::from_vec(values))?;
    }

    log::info!(
        "Loaded {} records; validated columns: {:?}",
        frame.height(),
        dataset.column_names()
    );
    Ok(LoadedData { frame, dataset })
}

fn extract_numeric_column(df: &DataFrame, column_name: &str) -> Result<Vec<f64>, DataError> {
    let series = df.column(column_name)?;
    if series.null_count() > 0 {
        return Err(DataError::MissingValuesFound(column_name.to_string()));
    }

    let wrong_type = || DataError::ColumnWrongType {
        column_name: column_name.to_string(),
        expected_type: "f64 (numeric)",
        found_type: format!("{:?}", series.dtype()),
    };

    let casted = series.cast(&DataType::Float64).map_err(|_| wrong_type())?;
    if casted.null_count() > 0 {
        return Err(wrong_type());
    }

    let values: Vec<f64> = casted.f64()?.rechunk().into_no_null_iter().collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(DataError::NonFiniteValuesFound(column_name.to_string()));
    }
    Ok(values)
}

/// Appends every item's derived columns to `frame` and writes the result as TSV.
/// Binary predictions are written as integers.
pub fn write_predictions(
    path: &str,
    frame: &DataFrame,
    predictions: &Predictions,
) -> Result<(), DataError> {
    let existing: AHashSet<String> = frame
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();

    let mut out = frame.clone();
    for item in &predictions.items {
        let columns = &item.columns;
        for name in [
            &columns.linear_predictor,
            &columns.probability,
            &columns.prediction,
        ] {
            if existing.contains(name) {
                return Err(DataError::OutputColumnExists(name.clone()));
            }
        }
        out.with_column(Column::new(
            columns.linear_predictor.as_str().into(),
            item.linear_predictor.to_vec(),
        ))?;
        out.with_column(Column::new(
            columns.probability.as_str().into(),
            item.probability.to_vec(),
        ))?;
        out.with_column(Column::new(
            columns.prediction.as_str().into(),
            item.prediction.iter().map(|&c| i32::from(c)).collect::<Vec<i32>>(),
        ))?;
    }

    let mut file = BufWriter::new(File::create(path)?);
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(b'\t')
        .finish(&mut out)?;
    file.flush()?;
    Ok(())
}

/// Writes one `label<TAB>equation` line per item.
pub fn write_equations(path: &str, predictions: &Predictions) -> Result<(), DataError> {
    let mut file = BufWriter::new(File::create(path)?);
    writeln!(file, "item\tequation")?;
    for (label, equation) in predictions.equation_strings() {
        writeln!(file, "{label}\t{equation}")?;
    }
    file.flush()?;
    Ok(())
}
