use std::path::PathBuf;

use serde_json::{json, Value};
use tracing::debug;

use sluice_core::{BoxError, Dataset};

use crate::OpError;

/// Integer sequence source: a single `number` column with `0..length`.
pub fn sequence(length: usize) -> impl FnMut() -> Result<Dataset, BoxError> {
    move || {
        let rows = (0..length).map(|i| vec![json!(i)]).collect();
        let dataset = Dataset::from_rows(vec!["number".to_string()], rows)?;
        Ok(dataset)
    }
}

/// In-memory source: produces a clone of the given dataset on every pump.
pub fn fixed(dataset: Dataset) -> impl FnMut() -> Result<Dataset, BoxError> {
    move || Ok(dataset.clone())
}

/// CSV file source. The first record is the header row; numeric-looking
/// cells are parsed as numbers, empty cells become null.
pub fn csv_file(path: impl Into<PathBuf>) -> impl FnMut() -> Result<Dataset, BoxError> {
    let path = path.into();
    move || {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&path)
            .map_err(|e| OpError::new(format!("cannot open '{}': {e}", path.display())))?;
        let columns: Vec<String> = reader
            .headers()
            .map_err(|e| OpError::new(format!("cannot read header of '{}': {e}", path.display())))?
            .iter()
            .map(|h| h.to_string())
            .collect();

        let mut dataset = Dataset::new(columns);
        for record in reader.records() {
            let record =
                record.map_err(|e| OpError::new(format!("bad record in '{}': {e}", path.display())))?;
            dataset.push_row(record.iter().map(parse_cell).collect())?;
        }
        debug!(path = %path.display(), rows = dataset.num_rows(), "read csv");
        Ok(dataset)
    }
}

fn parse_cell(text: &str) -> Value {
    if text.is_empty() {
        return Value::Null;
    }
    if let Ok(n) = text.parse::<i64>() {
        return json!(n);
    }
    if let Ok(f) = text.parse::<f64>() {
        return json!(f);
    }
    Value::String(text.to_string())
}
