use rayon::prelude::*;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::models::{Cell, Column, ColumnData, ColumnKind, Table, DATETIME_FORMAT};
use crate::services::cleaner::MISSING_PLACEHOLDER;
use crate::services::sanitizer::{finite, sanitize};
use crate::services::statistics::{frequencies, mean, pearson, present, quantile, sorted, std_dev};

const VALUE_COUNTS_LIMIT: usize = 10;

const CATEGORICAL_STATS: [&str; 4] = ["count", "unique", "top", "freq"];
const NUMERIC_STATS: [&str; 8] = ["count", "mean", "std", "min", "25%", "50%", "75%", "max"];
const DESCRIBE_ORDER: [&str; 11] = [
    "count", "unique", "top", "freq", "mean", "std", "min", "25%", "50%", "75%", "max",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub describe: Map<String, Value>,
    pub nulls: Map<String, Value>,
    pub value_counts: Map<String, Value>,
    pub correlation: Map<String, Value>,
}

impl Summary {
    pub fn to_value(&self) -> Value {
        // Map fields serialize infallibly
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

pub fn summarize(table: &Table) -> Summary {
    let start = std::time::Instant::now();
    let summary = Summary {
        describe: describe(table),
        nulls: null_counts(table),
        value_counts: value_counts(table),
        correlation: correlation(table),
    };
    tracing::debug!(
        "Summarized {} columns x {} rows in {:?}",
        table.width(),
        table.height(),
        start.elapsed()
    );
    summary
}

fn describe(table: &Table) -> Map<String, Value> {
    let has_numeric_like = table
        .columns()
        .iter()
        .any(|c| matches!(c.kind(), ColumnKind::Numeric | ColumnKind::Datetime));
    let has_categorical = table
        .columns()
        .iter()
        .any(|c| matches!(c.kind(), ColumnKind::Text | ColumnKind::Boolean));

    // A table that is entirely numeric (or entirely categorical) only reports
    // the rows that apply to it.
    let rows: Vec<&str> = DESCRIBE_ORDER
        .iter()
        .copied()
        .filter(|stat| {
            (has_numeric_like && NUMERIC_STATS.contains(stat)) || (has_categorical && CATEGORICAL_STATS.contains(stat))
        })
        .collect();

    let described: Vec<(String, Map<String, Value>)> = table
        .columns()
        .par_iter()
        .map(|column| {
            let stats = column_stats(column);
            let row_map = rows
                .iter()
                .map(|stat| {
                    let value = stats
                        .iter()
                        .find(|(name, _)| name == stat)
                        .map(|(_, v)| v.clone())
                        .unwrap_or_else(inapplicable);
                    (stat.to_string(), value)
                })
                .collect();
            (column.name.clone(), row_map)
        })
        .collect();

    described
        .into_iter()
        .map(|(name, stats)| (name, Value::Object(stats)))
        .collect()
}

fn inapplicable() -> Value {
    Value::String(String::new())
}

fn stat_number(value: Option<f64>) -> Value {
    match value {
        Some(v) if v.is_nan() => inapplicable(),
        Some(v) => sanitize(&v),
        None => inapplicable(),
    }
}

fn column_stats(column: &Column) -> Vec<(&'static str, Value)> {
    match &column.data {
        ColumnData::Numeric(values) => {
            // NaN never reaches a column, infinities do and are kept as values
            let observed = present(values);
            let ordered = sorted(&observed);
            vec![
                ("count", sanitize(&observed.len())),
                ("mean", stat_number(mean(&observed))),
                ("std", stat_number(std_dev(&observed))),
                ("min", stat_number(ordered.first().copied())),
                ("25%", stat_number(quantile(&ordered, 0.25))),
                ("50%", stat_number(quantile(&ordered, 0.5))),
                ("75%", stat_number(quantile(&ordered, 0.75))),
                ("max", stat_number(ordered.last().copied())),
            ]
        }
        ColumnData::Datetime(values) => {
            let observed: Vec<f64> = present(values)
                .into_iter()
                .map(|d| d.and_utc().timestamp_millis() as f64)
                .collect();
            let ordered = sorted(&observed);
            vec![
                ("count", sanitize(&observed.len())),
                ("mean", timestamp_stat(mean(&observed))),
                ("min", timestamp_stat(ordered.first().copied())),
                ("25%", timestamp_stat(quantile(&ordered, 0.25))),
                ("50%", timestamp_stat(quantile(&ordered, 0.5))),
                ("75%", timestamp_stat(quantile(&ordered, 0.75))),
                ("max", timestamp_stat(ordered.last().copied())),
            ]
        }
        ColumnData::Text(_) | ColumnData::Boolean(_) => {
            let cells: Vec<Cell> = (0..column.len())
                .map(|i| column.data.cell(i))
                .filter(|c| !c.is_null())
                .collect();
            let counts = frequencies(cells.iter().map(Cell::key));
            let top = counts.first().and_then(|(key, freq)| {
                cells.iter().find(|c| c.key() == *key).map(|c| (c.to_json(), *freq))
            });
            let (top, freq) = match top {
                Some((value, freq)) => (value, sanitize(&freq)),
                None => (inapplicable(), inapplicable()),
            };
            vec![
                ("count", sanitize(&cells.len())),
                ("unique", sanitize(&counts.len())),
                ("top", top),
                ("freq", freq),
            ]
        }
    }
}

fn timestamp_stat(millis: Option<f64>) -> Value {
    millis
        .and_then(finite)
        .and_then(|ms| chrono::DateTime::from_timestamp_millis(ms.round() as i64))
        .map(|d| Value::String(d.naive_utc().format(DATETIME_FORMAT).to_string()))
        .unwrap_or_else(inapplicable)
}

fn null_counts(table: &Table) -> Map<String, Value> {
    table
        .columns()
        .iter()
        .map(|c| (c.name.clone(), sanitize(&c.data.null_count())))
        .collect()
}

fn value_counts(table: &Table) -> Map<String, Value> {
    table
        .columns()
        .iter()
        .filter_map(|column| match &column.data {
            ColumnData::Text(values) => {
                let missing = missing_label(values);
                let labels = values.iter().map(|v| v.clone().unwrap_or_else(|| missing.clone()));
                let counts: Map<String, Value> = frequencies(labels)
                    .into_iter()
                    .take(VALUE_COUNTS_LIMIT)
                    .map(|(label, count)| (label, sanitize(&count)))
                    .collect();
                Some((column.name.clone(), Value::Object(counts)))
            }
            ColumnData::Numeric(_) | ColumnData::Boolean(_) | ColumnData::Datetime(_) => None,
        })
        .collect()
}

// Wraps the placeholder in more brackets until no real value uses it
fn missing_label(values: &[Option<String>]) -> String {
    let mut label = MISSING_PLACEHOLDER.to_string();
    while values.iter().flatten().any(|v| *v == label) {
        label = format!("<{}>", label);
    }
    label
}

fn correlation(table: &Table) -> Map<String, Value> {
    let numeric: Vec<(&str, &Vec<Option<f64>>)> = table
        .columns()
        .iter()
        .filter_map(|c| match &c.data {
            ColumnData::Numeric(values) => Some((c.name.as_str(), values)),
            _ => None,
        })
        .collect();

    if numeric.len() < 2 {
        return Map::new();
    }

    numeric
        .iter()
        .map(|(name, a)| {
            let row: Map<String, Value> = numeric
                .iter()
                .map(|(other, b)| {
                    let r = pearson(a, b);
                    // self-pairs are exactly 1 whenever the coefficient exists
                    let r = if std::ptr::eq(*a, *b) { r.map(|_| 1.0) } else { r };
                    (other.to_string(), sanitize(&r))
                })
                .collect();
            (name.to_string(), Value::Object(row))
        })
        .collect()
}

pub fn describe_text(summary: &Summary) -> String {
    summary
        .describe
        .iter()
        .map(|(column, stats)| {
            let parts: Vec<String> = stats
                .as_object()
                .map(|m| {
                    m.iter()
                        .filter(|(_, v)| *v != &inapplicable())
                        .map(|(k, v)| format!("{}={}", k, v))
                        .collect()
                })
                .unwrap_or_default();
            format!("{}: {}", column, parts.join(", "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}
