use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FlowError, Result};

/// An ordered collection of named columns with row-major data.
///
/// This is the only payload type that flows through a graph. The engine
/// treats it as an opaque value except where a routing vertex's contract
/// requires column access (merge schema check, dispatch column read,
/// join key). Cells are JSON values; missing data is `Value::Null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Dataset {
    /// Create an empty dataset with the given column names.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a dataset from column names and row data.
    ///
    /// Every row must have exactly one cell per column.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut dataset = Self::new(columns);
        for row in rows {
            dataset.push_row(row)?;
        }
        Ok(dataset)
    }

    /// Append a row. The row must have one cell per column.
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(FlowError::MalformedDataset(format!(
                "row has {} cells but dataset has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column by name, if present.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell at `(row, column-name)`, if both exist.
    pub fn cell(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Whether another dataset has the identical column list (names and
    /// order). Merge requires this before concatenating.
    pub fn same_columns(&self, other: &Dataset) -> bool {
        self.columns == other.columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Dataset {
        Dataset::from_rows(
            vec!["id".into(), "name".into()],
            vec![
                vec![json!(1), json!("ada")],
                vec![json!(2), json!("grace")],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_from_rows() {
        let ds = sample();
        assert_eq!(ds.num_rows(), 2);
        assert_eq!(ds.num_columns(), 2);
        assert_eq!(ds.columns(), &["id".to_string(), "name".to_string()]);
    }

    #[test]
    fn test_push_row_width_mismatch() {
        let mut ds = Dataset::new(vec!["a".into(), "b".into()]);
        let err = ds.push_row(vec![json!(1)]).unwrap_err();
        assert!(matches!(err, FlowError::MalformedDataset(_)));
    }

    #[test]
    fn test_cell_access() {
        let ds = sample();
        assert_eq!(ds.cell(0, "name"), Some(&json!("ada")));
        assert_eq!(ds.cell(1, "id"), Some(&json!(2)));
        assert_eq!(ds.cell(0, "missing"), None);
        assert_eq!(ds.cell(5, "id"), None);
    }

    #[test]
    fn test_same_columns_requires_order() {
        let a = Dataset::new(vec!["x".into(), "y".into()]);
        let b = Dataset::new(vec!["x".into(), "y".into()]);
        let c = Dataset::new(vec!["y".into(), "x".into()]);
        assert!(a.same_columns(&b));
        assert!(!a.same_columns(&c));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let ds = sample();
        let text = serde_json::to_string(&ds).unwrap();
        let parsed: Dataset = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, ds);
    }
}
