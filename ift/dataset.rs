//! Columnar in-memory dataset consumed and extended by the prediction engine.

use crate::expr::Row;
use ahash::AHashMap;
use ndarray::{Array1, ArrayView1};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DatasetError {
    #[error("Column '{0}' already exists in the dataset.")]
    DuplicateColumn(String),
    #[error("Column '{column}' has {found} values, but the dataset has {expected} rows.")]
    LengthMismatch {
        column: String,
        found: usize,
        expected: usize,
    },
}

/// An ordered set of equally long, named `f64` columns.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    names: Vec<String>,
    columns: Vec<Array1<f64>>,
    index: AHashMap<String, usize>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a dataset from `(name, values)` pairs, keeping their order.
    pub fn from_columns<I, S>(columns: I) -> Result<Self, DatasetError>
    where
        I: IntoIterator<Item = (S, Array1<f64>)>,
        S: Into<String>,
    {
        let mut dataset = Self::new();
        for (name, values) in columns {
            dataset.push_column(name, values)?;
        }
        Ok(dataset)
    }

    /// Appends a column. Existing columns are never replaced.
    pub fn push_column(
        &mut self,
        name: impl Into<String>,
        values: Array1<f64>,
    ) -> Result<(), DatasetError> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(DatasetError::DuplicateColumn(name));
        }
        if !self.columns.is_empty() && values.len() != self.n_rows() {
            return Err(DatasetError::LengthMismatch {
                column: name,
                found: values.len(),
                expected: self.n_rows(),
            });
        }
        self.index.insert(name.clone(), self.columns.len());
        self.names.push(name);
        self.columns.push(values);
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        self.columns.first().map_or(0, |c| c.len())
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.index.get(name).map(|&i| self.columns[i].view())
    }

    /// A view of row `index`. The caller must keep `index < n_rows()`.
    pub fn row(&self, index: usize) -> DatasetRow<'_> {
        DatasetRow {
            dataset: self,
            index,
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = DatasetRow<'_>> + '_ {
        (0..self.n_rows()).map(move |i| self.row(i))
    }
}

impl PartialEq for Dataset {
    fn eq(&self, other: &Self) -> bool {
        self.names == other.names && self.columns == other.columns
    }
}

/// One record of a [`Dataset`], resolved by column name.
#[derive(Debug, Clone, Copy)]
pub struct DatasetRow<'a> {
    dataset: &'a Dataset,
    index: usize,
}

impl Row for DatasetRow<'_> {
    fn index(&self) -> usize {
        self.index
    }

    fn value(&self, column: &str) -> Option<f64> {
        let &col = self.dataset.index.get(column)?;
        self.dataset.columns[col].get(self.index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn keeps_column_order_and_values() {
        let data = Dataset::from_columns([
            ("score", array![1.0, 2.0, 3.0]),
            ("age", array![20.0, 35.0, 50.0]),
        ])
        .unwrap();

        assert_eq!(data.n_rows(), 3);
        assert_eq!(data.column_names(), &["score".to_string(), "age".to_string()]);
        assert_eq!(data.row(1).value("age"), Some(35.0));
        assert_eq!(data.row(1).value("missing"), None);
        assert_eq!(data.rows().count(), 3);
    }

    #[test]
    fn rejects_duplicate_and_ragged_columns() {
        let mut data = Dataset::from_columns([("score", array![1.0, 2.0])]).unwrap();
        assert_eq!(
            data.push_column("score", array![0.0, 0.0]).unwrap_err(),
            DatasetError::DuplicateColumn("score".to_string())
        );
        assert_eq!(
            data.push_column("age", array![1.0]).unwrap_err(),
            DatasetError::LengthMismatch {
                column: "age".to_string(),
                found: 1,
                expected: 2
            }
        );
    }
}
