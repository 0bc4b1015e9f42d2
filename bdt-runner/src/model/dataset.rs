//! Dense feature matrices built from labeled tables.

use super::ModelError;
use bdt_core::prep::schema::{feature_columns, TARGET};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Row-major `f64` matrix with named columns. Missing values are `NaN`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    names: Vec<String>,
    data: Vec<f64>,
    n_rows: usize,
}

impl FeatureMatrix {
    /// Build from row-major data; `data.len()` must equal rows × names.
    pub fn from_row_major(names: Vec<String>, data: Vec<f64>) -> Result<Self, ModelError> {
        let n_cols = names.len();
        if n_cols == 0 {
            if !data.is_empty() {
                return Err(ModelError::ShapeMismatch(
                    "values given for a matrix without columns".into(),
                ));
            }
            return Ok(Self {
                names,
                data,
                n_rows: 0,
            });
        }
        if data.len() % n_cols != 0 {
            return Err(ModelError::ShapeMismatch(format!(
                "{} values do not fill rows of {n_cols} columns",
                data.len()
            )));
        }
        let n_rows = data.len() / n_cols;
        Ok(Self {
            names,
            data,
            n_rows,
        })
    }

    /// Build from a slice of rows, each of length `names.len()`.
    pub fn from_rows(names: Vec<String>, rows: &[Vec<f64>]) -> Result<Self, ModelError> {
        let n_cols = names.len();
        if let Some(bad) = rows.iter().position(|r| r.len() != n_cols) {
            return Err(ModelError::ShapeMismatch(format!(
                "row {bad} has {} values, expected {n_cols}",
                rows[bad].len()
            )));
        }
        let data = rows.iter().flatten().copied().collect();
        Self::from_row_major(names, data)
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    pub fn row(&self, i: usize) -> &[f64] {
        let n = self.n_cols();
        &self.data[i * n..(i + 1) * n]
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.n_cols() + col]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        (0..self.n_rows).map(move |i| self.row(i))
    }

    /// A new matrix holding the given rows, in the given order.
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let data = indices
            .iter()
            .flat_map(|&i| self.row(i).iter().copied())
            .collect();
        Self {
            names: self.names.clone(),
            data,
            n_rows: indices.len(),
        }
    }

    /// The first `n` rows (or all of them).
    pub fn head(&self, n: usize) -> Self {
        let indices: Vec<usize> = (0..n.min(self.n_rows)).collect();
        self.select_rows(&indices)
    }

    /// Apply `f` to every cell, producing a matrix of the same shape.
    pub fn map_values(&self, mut f: impl FnMut(f64) -> f64) -> Self {
        Self {
            names: self.names.clone(),
            data: self.data.iter().map(|&v| f(v)).collect(),
            n_rows: self.n_rows,
        }
    }
}

/// The ordered list of model input columns.
///
/// Chosen once from the training table and then applied to every other
/// partition, so train/val/test matrices always line up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSet {
    names: Vec<String>,
}

impl FeatureSet {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Numeric columns that are not identifiers or labels.
    pub fn from_frame(df: &DataFrame) -> Self {
        Self::new(feature_columns(df))
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Extract these columns from `df` as a dense matrix (nulls → NaN).
    pub fn matrix(&self, df: &DataFrame) -> Result<FeatureMatrix, ModelError> {
        let n_rows = df.height();
        let n_cols = self.names.len();
        let mut data = vec![f64::NAN; n_rows * n_cols];

        for (j, name) in self.names.iter().enumerate() {
            let column = df
                .column(name)
                .map_err(|_| ModelError::InvalidData(format!("missing feature column '{name}'")))?
                .cast(&DataType::Float64)
                .map_err(|e| ModelError::InvalidData(format!("feature '{name}': {e}")))?;
            let values = column
                .f64()
                .map_err(|e| ModelError::InvalidData(format!("feature '{name}': {e}")))?;
            for (i, v) in values.into_iter().enumerate() {
                if let Some(v) = v {
                    data[i * n_cols + j] = v;
                }
            }
        }

        Ok(FeatureMatrix {
            names: self.names.clone(),
            data,
            n_rows,
        })
    }
}

/// Read the binary `target` column. Nulls and values other than 0/1 are
/// rejected.
pub fn labels_from_frame(df: &DataFrame) -> Result<Vec<i32>, ModelError> {
    let column = df
        .column(TARGET)
        .map_err(|_| ModelError::InvalidData(format!("missing '{TARGET}' column")))?
        .cast(&DataType::Int32)
        .map_err(|e| ModelError::InvalidData(format!("'{TARGET}': {e}")))?;
    let values = column
        .i32()
        .map_err(|e| ModelError::InvalidData(format!("'{TARGET}': {e}")))?;

    values
        .into_iter()
        .enumerate()
        .map(|(i, v)| match v {
            Some(label @ (0 | 1)) => Ok(label),
            Some(other) => Err(ModelError::InvalidData(format!(
                "label {other} at row {i} is not 0 or 1"
            ))),
            None => Err(ModelError::InvalidData(format!("null label at row {i}"))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labeled() -> DataFrame {
        df!(
            "ticker" => &["A", "A", "B"],
            "close" => &[Some(10.0), None, Some(12.0)],
            "rsi_14" => &[30i64, 50, 70],
            "fwd_return" => &[0.1, -0.1, 0.2],
            "target" => &[1i32, 0, 1],
        )
        .unwrap()
    }

    #[test]
    fn feature_set_excludes_labels_and_ids() {
        let set = FeatureSet::from_frame(&labeled());
        assert_eq!(set.names(), &["close".to_string(), "rsi_14".to_string()]);
    }

    #[test]
    fn matrix_is_row_major_with_nan_for_nulls() {
        let df = labeled();
        let m = FeatureSet::from_frame(&df).matrix(&df).unwrap();
        assert_eq!((m.n_rows(), m.n_cols()), (3, 2));
        assert_eq!(m.row(0), &[10.0, 30.0]);
        assert!(m.get(1, 0).is_nan());
        assert_eq!(m.get(2, 1), 70.0);
    }

    #[test]
    fn matrix_requires_every_feature() {
        let set = FeatureSet::new(vec!["volume".into()]);
        assert!(matches!(
            set.matrix(&labeled()),
            Err(ModelError::InvalidData(_))
        ));
    }

    #[test]
    fn labels_are_read_and_checked() {
        assert_eq!(labels_from_frame(&labeled()).unwrap(), vec![1, 0, 1]);

        let bad = df!("target" => &[0i32, 2]).unwrap();
        assert!(labels_from_frame(&bad).is_err());
        let null = df!("target" => &[Some(1i32), None]).unwrap();
        assert!(labels_from_frame(&null).is_err());
    }

    #[test]
    fn select_rows_and_map_values() {
        let m = FeatureMatrix::from_rows(
            vec!["a".into(), "b".into()],
            &[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]],
        )
        .unwrap();
        let picked = m.select_rows(&[2, 0]);
        assert_eq!(picked.row(0), &[5.0, 6.0]);
        assert_eq!(picked.row(1), &[1.0, 2.0]);

        let doubled = m.map_values(|v| v * 2.0);
        assert_eq!(doubled.row(1), &[6.0, 8.0]);
        assert_eq!(m.head(10).n_rows(), 3);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = FeatureMatrix::from_rows(vec!["a".into()], &[vec![1.0], vec![1.0, 2.0]]);
        assert!(matches!(err, Err(ModelError::ShapeMismatch(_))));
    }
}
