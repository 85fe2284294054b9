use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use serde_json::Value;
use tracing::debug;

use sluice_core::{BoxError, Dataset};

use crate::OpError;

/// Shared buffer the [`collect`] sink appends to.
pub type Collected = Rc<RefCell<Vec<Dataset>>>;

/// Sink that renders each dataset as an aligned text table on stdout.
pub fn print() -> impl FnMut(Dataset) -> Result<(), BoxError> {
    move |dataset| {
        println!("{}", render_text_table(&dataset));
        Ok(())
    }
}

/// Sink that appends every received dataset to a shared buffer. The
/// engine is single-threaded, so an `Rc` handle is all the sharing
/// needed; the caller keeps a clone to inspect after pumping.
pub fn collect(buf: Collected) -> impl FnMut(Dataset) -> Result<(), BoxError> {
    move |dataset| {
        buf.borrow_mut().push(dataset);
        Ok(())
    }
}

/// CSV file sink: header row then one record per row.
pub fn csv_file(path: impl Into<PathBuf>) -> impl FnMut(Dataset) -> Result<(), BoxError> {
    let path = path.into();
    move |dataset| {
        let mut writer = csv::Writer::from_path(&path)
            .map_err(|e| OpError::new(format!("cannot create '{}': {e}", path.display())))?;
        writer
            .write_record(dataset.columns())
            .map_err(|e| OpError::new(format!("cannot write '{}': {e}", path.display())))?;
        for row in dataset.rows() {
            let record: Vec<String> = row.iter().map(cell_text).collect();
            writer
                .write_record(&record)
                .map_err(|e| OpError::new(format!("cannot write '{}': {e}", path.display())))?;
        }
        writer
            .flush()
            .map_err(|e| OpError::new(format!("cannot flush '{}': {e}", path.display())))?;
        debug!(path = %path.display(), rows = dataset.num_rows(), "wrote csv");
        Ok(())
    }
}

/// Render a dataset as a left-aligned text table.
pub fn render_text_table(dataset: &Dataset) -> String {
    let mut widths: Vec<usize> = dataset.columns().iter().map(|c| c.len()).collect();
    let rendered: Vec<Vec<String>> = dataset
        .rows()
        .iter()
        .map(|row| row.iter().map(cell_text).collect())
        .collect();
    for row in &rendered {
        for (i, cell) in row.iter().enumerate() {
            if cell.len() > widths[i] {
                widths[i] = cell.len();
            }
        }
    }

    let mut out = String::new();
    let header: Vec<String> = dataset
        .columns()
        .iter()
        .zip(&widths)
        .map(|(c, &w)| format!("{c:<w$}"))
        .collect();
    out.push_str(header.join("  ").trim_end());
    for row in &rendered {
        out.push('\n');
        let line: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(c, &w)| format!("{c:<w$}"))
            .collect();
        out.push_str(line.join("  ").trim_end());
    }
    out
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
