use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use sluice_core::{BoxError, Dataset, FlowError};

use crate::OpError;

/// Comparison operator for the row filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not-in")]
    NotIn,
    #[serde(rename = "between")]
    Between,
}

/// Compiled filter condition; validated once at construction so the
/// running closure has nothing left to second-guess.
enum Condition {
    Compare(FilterOp, Value),
    Membership { values: Vec<Value>, negate: bool },
    Between { lower: Value, upper: Value },
}

/// Row filter over one column.
///
/// `in`/`not-in` require a non-empty array value, `between` an array of
/// exactly two values; both are rejected here, not mid-run.
pub fn filter(
    column: impl Into<String>,
    op: FilterOp,
    value: Value,
) -> Result<impl FnMut(Dataset) -> Result<Dataset, BoxError>, FlowError> {
    let column = column.into();
    let condition = match op {
        FilterOp::In | FilterOp::NotIn => {
            let Some(values) = value.as_array() else {
                return Err(FlowError::Config(format!(
                    "filter on '{column}': '{op:?}' requires an array of values"
                )));
            };
            if values.is_empty() {
                return Err(FlowError::Config(format!(
                    "filter on '{column}': value list cannot be empty"
                )));
            }
            Condition::Membership {
                values: values.clone(),
                negate: op == FilterOp::NotIn,
            }
        }
        FilterOp::Between => {
            let bounds = value.as_array().filter(|a| a.len() == 2);
            let Some(bounds) = bounds else {
                return Err(FlowError::Config(format!(
                    "filter on '{column}': 'between' requires exactly [lower, upper]"
                )));
            };
            Condition::Between {
                lower: bounds[0].clone(),
                upper: bounds[1].clone(),
            }
        }
        other => Condition::Compare(other, value),
    };

    Ok(move |dataset: Dataset| {
        let Some(idx) = dataset.column_index(&column) else {
            return Err(missing_column(&column, &dataset).into());
        };
        let total = dataset.num_rows();
        let rows = dataset
            .rows()
            .iter()
            .filter(|row| row_passes(&row[idx], &condition))
            .cloned()
            .collect();
        let filtered = Dataset::from_rows(dataset.columns().to_vec(), rows)?;
        debug!(column = %column, kept = filtered.num_rows(), total, "filtered rows");
        Ok(filtered)
    })
}

fn row_passes(cell: &Value, condition: &Condition) -> bool {
    match condition {
        Condition::Compare(FilterOp::Eq, value) => cell == value,
        Condition::Compare(FilterOp::Ne, value) => cell != value,
        Condition::Compare(op, value) => match cmp_values(cell, value) {
            Some(ordering) => match op {
                FilterOp::Lt => ordering == Ordering::Less,
                FilterOp::Gt => ordering == Ordering::Greater,
                FilterOp::Le => ordering != Ordering::Greater,
                FilterOp::Ge => ordering != Ordering::Less,
                _ => false,
            },
            // Incomparable cells (nulls, mixed types) never pass an
            // ordering comparison.
            None => false,
        },
        Condition::Membership { values, negate } => values.contains(cell) != *negate,
        Condition::Between { lower, upper } => {
            cmp_values(cell, lower).is_some_and(|o| o != Ordering::Less)
                && cmp_values(cell, upper).is_some_and(|o| o != Ordering::Greater)
        }
    }
}

/// Keep only the named columns, in the given order.
pub fn select_columns(
    columns: Vec<String>,
) -> Result<impl FnMut(Dataset) -> Result<Dataset, BoxError>, FlowError> {
    if columns.is_empty() {
        return Err(FlowError::Config(
            "select-columns: column list cannot be empty".to_string(),
        ));
    }
    Ok(move |dataset: Dataset| {
        let mut indices = Vec::with_capacity(columns.len());
        for column in &columns {
            let Some(idx) = dataset.column_index(column) else {
                return Err(missing_column(column, &dataset).into());
            };
            indices.push(idx);
        }
        let rows = dataset
            .rows()
            .iter()
            .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
            .collect();
        Ok(Dataset::from_rows(columns.clone(), rows)?)
    })
}

/// Remove the named columns; everything else passes through unchanged.
pub fn drop_columns(
    columns: Vec<String>,
) -> Result<impl FnMut(Dataset) -> Result<Dataset, BoxError>, FlowError> {
    if columns.is_empty() {
        return Err(FlowError::Config(
            "drop-columns: column list cannot be empty".to_string(),
        ));
    }
    Ok(move |dataset: Dataset| {
        for column in &columns {
            if dataset.column_index(column).is_none() {
                return Err(missing_column(column, &dataset).into());
            }
        }
        let keep: Vec<usize> = (0..dataset.num_columns())
            .filter(|&i| !columns.contains(&dataset.columns()[i]))
            .collect();
        let remaining = keep
            .iter()
            .map(|&i| dataset.columns()[i].clone())
            .collect();
        let rows = dataset
            .rows()
            .iter()
            .map(|row| keep.iter().map(|&i| row[i].clone()).collect())
            .collect();
        Ok(Dataset::from_rows(remaining, rows)?)
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Keep {
    #[default]
    First,
    Last,
}

/// Drop duplicate rows by `key`, after a stable sort on `sort_by`.
///
/// Which duplicate survives is decided by the sorted position: `Keep::First`
/// retains the first occurrence after sorting, `Keep::Last` the last.
pub fn dedup(
    key: impl Into<String>,
    sort_by: impl Into<String>,
    order: SortOrder,
    keep: Keep,
) -> impl FnMut(Dataset) -> Result<Dataset, BoxError> {
    let key = key.into();
    let sort_by = sort_by.into();
    move |dataset: Dataset| {
        let Some(key_idx) = dataset.column_index(&key) else {
            return Err(missing_column(&key, &dataset).into());
        };
        let Some(sort_idx) = dataset.column_index(&sort_by) else {
            return Err(missing_column(&sort_by, &dataset).into());
        };

        let mut sorted: Vec<&Vec<Value>> = dataset.rows().iter().collect();
        sorted.sort_by(|a, b| {
            let ordering = cmp_values(&a[sort_idx], &b[sort_idx]).unwrap_or(Ordering::Equal);
            match order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        // Position of the surviving row per key, in sorted order.
        let mut survivor: HashMap<String, usize> = HashMap::new();
        for (pos, row) in sorted.iter().enumerate() {
            let repr = row[key_idx].to_string();
            match keep {
                Keep::First => {
                    survivor.entry(repr).or_insert(pos);
                }
                Keep::Last => {
                    survivor.insert(repr, pos);
                }
            }
        }

        let mut rows = Vec::with_capacity(survivor.len());
        for (pos, row) in sorted.iter().enumerate() {
            let repr = row[key_idx].to_string();
            if survivor.get(&repr) == Some(&pos) {
                rows.push((*row).clone());
            }
        }
        Ok(Dataset::from_rows(dataset.columns().to_vec(), rows)?)
    }
}

/// Aggregation function for [`aggregate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggKind {
    Count,
    Sum,
    Mean,
    Min,
    Max,
}

/// Group rows by `group_by` and reduce each group to one row with the
/// group value and the aggregate, named `out_column`. Groups appear in
/// first-appearance order. Every kind except `count` needs an
/// `input_column` to aggregate over.
pub fn aggregate(
    group_by: impl Into<String>,
    out_column: impl Into<String>,
    kind: AggKind,
    input_column: Option<String>,
) -> Result<impl FnMut(Dataset) -> Result<Dataset, BoxError>, FlowError> {
    let group_by = group_by.into();
    let out_column = out_column.into();
    if kind != AggKind::Count && input_column.is_none() {
        return Err(FlowError::Config(format!(
            "aggregate '{out_column}': {kind:?} requires an input column"
        )));
    }

    Ok(move |dataset: Dataset| {
        let Some(group_idx) = dataset.column_index(&group_by) else {
            return Err(missing_column(&group_by, &dataset).into());
        };
        let input_idx = match &input_column {
            Some(column) => match dataset.column_index(column) {
                Some(idx) => Some(idx),
                None => return Err(missing_column(column, &dataset).into()),
            },
            None => None,
        };

        // Group row indices, preserving first-appearance order.
        let mut order: Vec<(Value, Vec<usize>)> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for (i, row) in dataset.rows().iter().enumerate() {
            let key = &row[group_idx];
            let repr = key.to_string();
            match positions.get(&repr) {
                Some(&pos) => order[pos].1.push(i),
                None => {
                    positions.insert(repr, order.len());
                    order.push((key.clone(), vec![i]));
                }
            }
        }
        debug!(group_by = %group_by, groups = order.len(), "aggregated");

        let mut out = Dataset::new(vec![group_by.clone(), out_column.clone()]);
        for (key, members) in order {
            let value = match kind {
                AggKind::Count => json!(members.len()),
                _ => {
                    let idx = input_idx.ok_or_else(|| {
                        OpError::new("aggregate input column missing".to_string())
                    })?;
                    let cells: Vec<&Value> =
                        members.iter().map(|&i| &dataset.rows()[i][idx]).collect();
                    reduce(kind, &cells)?
                }
            };
            out.push_row(vec![key, value])?;
        }
        Ok(out)
    })
}

fn reduce(kind: AggKind, cells: &[&Value]) -> Result<Value, BoxError> {
    match kind {
        AggKind::Sum | AggKind::Mean => {
            let mut sum = 0.0f64;
            let mut all_integers = true;
            for &cell in cells {
                let Some(n) = cell.as_f64() else {
                    return Err(OpError::new(format!("cannot aggregate non-number {cell}")).into());
                };
                all_integers &= cell.as_i64().is_some();
                sum += n;
            }
            if kind == AggKind::Mean {
                return Ok(json!(sum / cells.len() as f64));
            }
            if all_integers {
                Ok(json!(sum as i64))
            } else {
                Ok(json!(sum))
            }
        }
        AggKind::Min | AggKind::Max => {
            let mut best: Option<&Value> = None;
            for &cell in cells {
                let Some(current) = best else {
                    best = Some(cell);
                    continue;
                };
                let Some(ordering) = cmp_values(cell, current) else {
                    return Err(OpError::new(format!(
                        "cannot compare {cell} with {current}"
                    ))
                    .into());
                };
                let replace = match kind {
                    AggKind::Min => ordering == Ordering::Less,
                    _ => ordering == Ordering::Greater,
                };
                if replace {
                    best = Some(cell);
                }
            }
            Ok(best.cloned().unwrap_or(Value::Null))
        }
        AggKind::Count => Ok(json!(cells.len())),
    }
}

/// Order two cells: numbers numerically, strings lexicographically.
/// Mixed or non-scalar types do not compare.
pub(crate) fn cmp_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64().partial_cmp(&y.as_f64()),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn missing_column(column: &str, dataset: &Dataset) -> OpError {
    OpError::new(format!(
        "column '{column}' not found; available: {:?}",
        dataset.columns()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> Dataset {
        Dataset::from_rows(
            vec!["id".into(), "name".into(), "score".into()],
            vec![
                vec![json!(1), json!("ada"), json!(9)],
                vec![json!(2), json!("grace"), json!(7)],
                vec![json!(3), json!("alan"), json!(9)],
                vec![json!(1), json!("ada2"), json!(5)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_filter_greater_than() {
        let mut apply = filter("score", FilterOp::Gt, json!(6)).unwrap();
        let out = apply(people()).unwrap();
        assert_eq!(out.num_rows(), 3);
    }

    #[test]
    fn test_filter_equality() {
        let mut apply = filter("name", FilterOp::Eq, json!("grace")).unwrap();
        let out = apply(people()).unwrap();
        assert_eq!(out.num_rows(), 1);
        assert_eq!(out.cell(0, "id"), Some(&json!(2)));
    }

    #[test]
    fn test_filter_membership() {
        let mut apply = filter("name", FilterOp::In, json!(["ada", "alan"])).unwrap();
        assert_eq!(apply(people()).unwrap().num_rows(), 2);

        let mut apply = filter("name", FilterOp::NotIn, json!(["ada", "alan"])).unwrap();
        assert_eq!(apply(people()).unwrap().num_rows(), 2);
    }

    #[test]
    fn test_filter_between() {
        let mut apply = filter("score", FilterOp::Between, json!([5, 7])).unwrap();
        assert_eq!(apply(people()).unwrap().num_rows(), 2);
    }

    #[test]
    fn test_filter_construction_validation() {
        assert!(filter("x", FilterOp::In, json!([])).is_err());
        assert!(filter("x", FilterOp::In, json!("scalar")).is_err());
        assert!(filter("x", FilterOp::Between, json!([1])).is_err());
    }

    #[test]
    fn test_filter_missing_column_errors() {
        let mut apply = filter("nope", FilterOp::Eq, json!(1)).unwrap();
        assert!(apply(people()).is_err());
    }

    #[test]
    fn test_select_columns() {
        let mut apply = select_columns(vec!["name".into()]).unwrap();
        let out = apply(people()).unwrap();
        assert_eq!(out.columns(), &["name".to_string()]);
        assert_eq!(out.num_rows(), 4);
    }

    #[test]
    fn test_drop_columns() {
        let mut apply = drop_columns(vec!["score".into()]).unwrap();
        let out = apply(people()).unwrap();
        assert_eq!(out.columns(), &["id".to_string(), "name".to_string()]);
    }

    #[test]
    fn test_drop_columns_missing_errors() {
        let mut apply = drop_columns(vec!["ghost".into()]).unwrap();
        assert!(apply(people()).is_err());
    }

    #[test]
    fn test_dedup_keep_first_ascending() {
        let mut apply = dedup("id", "score", SortOrder::Asc, Keep::First);
        let out = apply(people()).unwrap();
        // Two rows share id 1; ascending by score keeps the score-5 row.
        assert_eq!(out.num_rows(), 3);
        let ada = out
            .rows()
            .iter()
            .find(|r| r[0] == json!(1))
            .unwrap();
        assert_eq!(ada[2], json!(5));
    }

    #[test]
    fn test_dedup_keep_last() {
        let mut apply = dedup("id", "score", SortOrder::Asc, Keep::Last);
        let out = apply(people()).unwrap();
        assert_eq!(out.num_rows(), 3);
        let ada = out
            .rows()
            .iter()
            .find(|r| r[0] == json!(1))
            .unwrap();
        assert_eq!(ada[2], json!(9));
    }

    #[test]
    fn test_aggregate_count() {
        let mut apply = aggregate("score", "n", AggKind::Count, None).unwrap();
        let out = apply(people()).unwrap();
        assert_eq!(out.columns(), &["score".to_string(), "n".to_string()]);
        // First-appearance order: 9, 7, 5.
        assert_eq!(out.rows()[0], vec![json!(9), json!(2)]);
        assert_eq!(out.rows()[1], vec![json!(7), json!(1)]);
        assert_eq!(out.rows()[2], vec![json!(5), json!(1)]);
    }

    #[test]
    fn test_aggregate_sum_and_mean() {
        let mut apply =
            aggregate("id", "total", AggKind::Sum, Some("score".into())).unwrap();
        let out = apply(people()).unwrap();
        assert_eq!(out.rows()[0], vec![json!(1), json!(14)]);

        let mut apply =
            aggregate("id", "avg", AggKind::Mean, Some("score".into())).unwrap();
        let out = apply(people()).unwrap();
        assert_eq!(out.rows()[0], vec![json!(1), json!(7.0)]);
    }

    #[test]
    fn test_aggregate_min_max() {
        let mut apply =
            aggregate("id", "best", AggKind::Max, Some("score".into())).unwrap();
        let out = apply(people()).unwrap();
        assert_eq!(out.rows()[0], vec![json!(1), json!(9)]);
    }

    #[test]
    fn test_aggregate_requires_input_column() {
        assert!(aggregate("id", "x", AggKind::Sum, None).is_err());
    }

    #[test]
    fn test_cmp_values() {
        assert_eq!(cmp_values(&json!(1), &json!(2)), Some(Ordering::Less));
        assert_eq!(cmp_values(&json!(1.5), &json!(1)), Some(Ordering::Greater));
        assert_eq!(
            cmp_values(&json!("a"), &json!("b")),
            Some(Ordering::Less)
        );
        assert_eq!(cmp_values(&json!(1), &json!("a")), None);
        assert_eq!(cmp_values(&Value::Null, &json!(1)), None);
    }
}
