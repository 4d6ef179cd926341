use crate::errors::{Result, SimError};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Outcome of one sampled row
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    /// The simulator converged and all outputs were read
    Ok,
    /// The simulator failed, outputs of the row are NaN
    Error,
}

/// A non-fatal issue attached to a single cell of the sampled table
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CellWarning {
    /// 1-based case number of the affected row
    pub case: usize,
    /// Column alias of the affected cell
    pub alias: String,
    /// Human-readable reason the cell was set to NaN
    pub message: String,
}

/// Column-oriented result table of a sampling sweep.
///
/// Columns are inputs, then simulator outputs, then expression values, in
/// declaration order. The `case` column is strictly increasing from 1.
/// Rows with [RowStatus::Error] are kept for auditability but excluded
/// from training views.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SampledTable {
    aliases: Vec<String>,
    case: Vec<usize>,
    status: Vec<RowStatus>,
    columns: HashMap<String, Vec<f64>>,
    warnings: Vec<CellWarning>,
}

impl SampledTable {
    /// Creates an empty table with the given column aliases.
    pub fn new(aliases: &[String]) -> SampledTable {
        SampledTable {
            aliases: aliases.to_vec(),
            case: Vec::new(),
            status: Vec::new(),
            columns: aliases
                .iter()
                .map(|a| (a.clone(), Vec::new()))
                .collect(),
            warnings: Vec::new(),
        }
    }

    /// Number of sampled rows.
    pub fn n_rows(&self) -> usize {
        self.case.len()
    }

    /// Column aliases in declaration order.
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// The 1-based case numbers.
    pub fn case(&self) -> &[usize] {
        &self.case
    }

    /// Row statuses.
    pub fn status(&self) -> &[RowStatus] {
        &self.status
    }

    /// Cell warnings collected during the sweep.
    pub fn warnings(&self) -> &[CellWarning] {
        &self.warnings
    }

    /// Values of one column; `None` for an unknown alias.
    pub fn column(&self, alias: &str) -> Option<&[f64]> {
        self.columns.get(alias).map(|v| v.as_slice())
    }

    /// Appends a row; aliases absent from the map get NaN cells.
    pub fn push_row(&mut self, status: RowStatus, row: &HashMap<String, f64>) {
        self.case.push(self.case.len() + 1);
        self.status.push(status);
        for alias in &self.aliases {
            let v = row.get(alias).copied().unwrap_or(f64::NAN);
            if let Some(col) = self.columns.get_mut(alias) {
                col.push(v);
            }
        }
    }

    /// Records a non-fatal cell warning.
    pub fn push_warning(&mut self, case: usize, alias: &str, message: String) {
        self.warnings.push(CellWarning {
            case,
            alias: alias.to_string(),
            message,
        });
    }

    /// Extracts training data for one output: rows with `status=ok` and
    /// finite values in every involved column.
    pub fn training_data(
        &self,
        x_aliases: &[String],
        y_alias: &str,
    ) -> Result<(Array2<f64>, Array1<f64>)> {
        let mut involved = x_aliases.to_vec();
        involved.push(y_alias.to_string());
        for alias in &involved {
            if !self.columns.contains_key(alias) {
                return Err(SimError::InvalidValue(format!(
                    "unknown column alias '{alias}'"
                )));
            }
        }

        let rows: Vec<usize> = (0..self.n_rows())
            .filter(|&i| {
                self.status[i] == RowStatus::Ok
                    && involved.iter().all(|a| self.columns[a][i].is_finite())
            })
            .collect();

        let mut x = Array2::zeros((rows.len(), x_aliases.len()));
        let mut y = Array1::zeros(rows.len());
        for (r, &i) in rows.iter().enumerate() {
            for (c, alias) in x_aliases.iter().enumerate() {
                x[[r, c]] = self.columns[alias][i];
            }
            y[r] = self.columns[y_alias][i];
        }
        Ok((x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn row(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn aliases(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_push_and_case_ordering() {
        let mut table = SampledTable::new(&aliases(&["x", "y"]));
        table.push_row(RowStatus::Ok, &row(&[("x", 1.), ("y", 2.)]));
        table.push_row(RowStatus::Error, &row(&[("x", 3.)]));
        assert_eq!(table.case(), &[1, 2]);
        assert_eq!(table.status(), &[RowStatus::Ok, RowStatus::Error]);
        assert!(table.column("y").unwrap()[1].is_nan());
    }

    #[test]
    fn test_training_data_skips_bad_rows() {
        let mut table = SampledTable::new(&aliases(&["x", "y"]));
        table.push_row(RowStatus::Ok, &row(&[("x", 1.), ("y", 10.)]));
        table.push_row(RowStatus::Error, &row(&[("x", 2.)]));
        table.push_row(RowStatus::Ok, &row(&[("x", 3.), ("y", 30.)]));
        table.push_row(RowStatus::Ok, &row(&[("x", 4.), ("y", f64::NAN)]));

        let (x, y) = table
            .training_data(&aliases(&["x"]), "y")
            .expect("training view");
        assert_eq!(x.dim(), (2, 1));
        assert_abs_diff_eq!(x[[0, 0]], 1.);
        assert_abs_diff_eq!(x[[1, 0]], 3.);
        assert_abs_diff_eq!(y[1], 30.);
    }

    #[test]
    fn test_unknown_alias_rejected() {
        let table = SampledTable::new(&aliases(&["x"]));
        assert!(table.training_data(&aliases(&["x"]), "nope").is_err());
    }
}
