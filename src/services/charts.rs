use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::AppError;
use crate::models::{Cell, CellKey, Column, ColumnData, Table};
use crate::services::sanitizer::{sanitize, JsonSafe};
use crate::services::statistics::frequencies;

pub const DEFAULT_TOP_N: usize = 10;
pub const DEFAULT_BINS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartType {
    Bar,
    Line,
    Pie,
    Scatter,
    Histogram,
}

impl FromStr for ChartType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bar" => Ok(ChartType::Bar),
            "line" => Ok(ChartType::Line),
            "pie" => Ok(ChartType::Pie),
            "scatter" => Ok(ChartType::Scatter),
            "histogram" => Ok(ChartType::Histogram),
            _ => Err(AppError::UnsupportedChartType(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Sum,
    Mean,
    Count,
    Min,
    Max,
    None,
}

impl Aggregation {
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "sum" => Aggregation::Sum,
            "mean" => Aggregation::Mean,
            "count" => Aggregation::Count,
            "min" => Aggregation::Min,
            "max" => Aggregation::Max,
            "none" => Aggregation::None,
            other => {
                tracing::warn!("Unknown aggregation '{}', using sum", other);
                Aggregation::Sum
            }
        }
    }
}

fn default_chart_type() -> String {
    "bar".to_string()
}

fn default_agg() -> String {
    "sum".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChartSpec {
    #[serde(rename = "type", default = "default_chart_type")]
    pub chart_type: String,
    #[serde(default)]
    pub x: Option<String>,
    #[serde(default)]
    pub y: Option<String>,
    #[serde(default = "default_agg")]
    pub agg: String,
    #[serde(default)]
    pub top_n: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub bins: Option<usize>,
}

impl ChartSpec {
    pub fn new(chart_type: &str) -> Self {
        Self {
            chart_type: chart_type.to_string(),
            x: None,
            y: None,
            agg: default_agg(),
            top_n: None,
            limit: None,
            bins: None,
        }
    }

    fn top_n(&self) -> usize {
        self.top_n
            .filter(|n| *n > 0)
            .or(self.limit.filter(|n| *n > 0))
            .unwrap_or(DEFAULT_TOP_N)
    }

    fn x_name(&self) -> Option<&str> {
        self.x.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    fn y_name(&self) -> Option<&str> {
        self.y.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartDataset {
    pub label: String,
    pub data: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartMeta {
    pub x: Option<String>,
    pub y: Option<String>,
    pub agg: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartResult {
    #[serde(rename = "type")]
    pub chart_type: String,
    pub labels: Vec<String>,
    pub datasets: Vec<ChartDataset>,
    pub meta: ChartMeta,
}

pub fn aggregate(table: &Table, spec: &ChartSpec) -> Result<ChartResult, AppError> {
    let chart_type = ChartType::from_str(&spec.chart_type)?;
    let agg = Aggregation::parse_lenient(&spec.agg);
    let top_n = spec.top_n();
    let x = spec.x_name();
    let y = spec.y_name();

    let (labels, datasets) = match chart_type {
        ChartType::Bar | ChartType::Line | ChartType::Histogram => match (x, y) {
            (Some(x), Some(y)) if agg != Aggregation::None => {
                let (labels, data) = grouped(table, x, y, agg, top_n)?;
                (labels, vec![ChartDataset { label: y.to_string(), data }])
            }
            (Some(x), _) if chart_type == ChartType::Histogram => {
                let (labels, data) = histogram(table, x, spec.bins.unwrap_or(DEFAULT_BINS))?;
                (labels, vec![ChartDataset { label: x.to_string(), data }])
            }
            (Some(x), Some(y)) => {
                let (labels, data) = raw_series(table, x, y)?;
                (labels, vec![ChartDataset { label: y.to_string(), data }])
            }
            (Some(col), None) | (None, Some(col)) => {
                let (labels, data) = counts(table, col, top_n)?;
                (labels, vec![ChartDataset { label: col.to_string(), data }])
            }
            (None, None) => {
                return Err(AppError::InvalidInput(format!(
                    "A {} chart needs at least an x or a y column",
                    spec.chart_type
                )))
            }
        },
        ChartType::Pie => {
            let x = x.ok_or_else(|| AppError::InvalidInput("A pie chart needs an x column".to_string()))?;
            let (labels, data) = counts(table, x, top_n)?;
            (labels, vec![ChartDataset { label: x.to_string(), data }])
        }
        ChartType::Scatter => {
            let (x, y) = x.zip(y).ok_or_else(|| {
                AppError::InvalidInput("A scatter chart needs both x and y columns".to_string())
            })?;
            let data = scatter_points(table, x, y)?;
            (Vec::new(), vec![ChartDataset { label: format!("{} vs {}", x, y), data }])
        }
    };

    Ok(ChartResult {
        chart_type: spec.chart_type.clone(),
        labels,
        datasets,
        meta: ChartMeta {
            x: spec.x.clone(),
            y: spec.y.clone(),
            agg: spec.agg.clone(),
        },
    })
}

fn lookup<'a>(table: &'a Table, name: &str) -> Result<&'a Column, AppError> {
    table
        .column(name)
        .ok_or_else(|| AppError::InvalidInput(format!("Column '{}' not found in dataset", name)))
}

fn numeric_values<'a>(column: &'a Column) -> Option<&'a [Option<f64>]> {
    match &column.data {
        ColumnData::Numeric(values) => Some(values),
        ColumnData::Text(_) | ColumnData::Boolean(_) | ColumnData::Datetime(_) => None,
    }
}

struct Group {
    label: String,
    values: Vec<f64>,
    present: usize,
}

fn grouped(table: &Table, x: &str, y: &str, agg: Aggregation, top_n: usize) -> Result<(Vec<String>, Vec<Value>), AppError> {
    let x_col = lookup(table, x)?;
    let y_col = lookup(table, y)?;
    let y_numeric = numeric_values(y_col);

    let empty = || AppError::EmptyResult { x: x.to_string(), y: y.to_string() };
    if y_numeric.is_none() && agg != Aggregation::Count {
        tracing::warn!("Column '{}' is not numeric, cannot apply {:?}", y, agg);
        return Err(empty());
    }

    let mut index: HashMap<CellKey, usize> = HashMap::new();
    let mut groups: Vec<Group> = Vec::new();
    for row in 0..table.height() {
        let key_cell = x_col.data.cell(row);
        if key_cell.is_null() {
            continue;
        }
        let slot = *index.entry(key_cell.key()).or_insert_with(|| {
            groups.push(Group { label: key_cell.label(), values: Vec::new(), present: 0 });
            groups.len() - 1
        });
        let group = &mut groups[slot];
        match y_numeric {
            Some(values) => {
                if let Some(v) = values[row] {
                    group.values.push(v);
                    group.present += 1;
                }
            }
            None => {
                if !y_col.data.cell(row).is_null() {
                    group.present += 1;
                }
            }
        }
    }

    let mut results: Vec<(String, f64)> = groups
        .into_iter()
        .map(|g| {
            let value = match agg {
                Aggregation::Sum | Aggregation::None => g.values.iter().sum::<f64>(),
                Aggregation::Mean if g.values.is_empty() => f64::NAN,
                Aggregation::Mean => g.values.iter().sum::<f64>() / g.values.len() as f64,
                Aggregation::Count => g.present as f64,
                Aggregation::Min => g.values.iter().copied().reduce(f64::min).unwrap_or(f64::NAN),
                Aggregation::Max => g.values.iter().copied().reduce(f64::max).unwrap_or(f64::NAN),
            };
            (g.label, value)
        })
        .collect();

    // descending, undefined last; stable so ties keep first-seen order
    results.sort_by(|a, b| match (a.1.is_nan(), b.1.is_nan()) {
        (true, true) => std::cmp::Ordering::Equal,
        (true, false) => std::cmp::Ordering::Greater,
        (false, true) => std::cmp::Ordering::Less,
        (false, false) => b.1.total_cmp(&a.1),
    });
    results.truncate(top_n);

    if results.is_empty() {
        tracing::warn!("Aggregation of '{}' by '{}' produced no groups", y, x);
        return Err(empty());
    }

    let (labels, values): (Vec<String>, Vec<f64>) = results.into_iter().unzip();
    Ok((labels, values.iter().map(|v| sanitize(v)).collect()))
}

fn counts(table: &Table, name: &str, top_n: usize) -> Result<(Vec<String>, Vec<Value>), AppError> {
    let column = lookup(table, name)?;
    let cells: Vec<Cell> = (0..column.len())
        .map(|i| column.data.cell(i))
        .filter(|c| !c.is_null())
        .collect();
    let labels: HashMap<CellKey, String> = cells.iter().map(|c| (c.key(), c.label())).collect();
    let counted = frequencies(cells.iter().map(Cell::key));

    Ok(counted
        .into_iter()
        .take(top_n)
        .map(|(key, count)| (labels.get(&key).cloned().unwrap_or_default(), count.to_json_safe()))
        .unzip())
}

fn histogram(table: &Table, name: &str, bins: usize) -> Result<(Vec<String>, Vec<Value>), AppError> {
    if bins == 0 {
        return Err(AppError::InvalidInput("Histogram bins must be a positive integer".to_string()));
    }
    let column = lookup(table, name)?;
    let values: Vec<f64> = numeric_values(column)
        .ok_or_else(|| AppError::InvalidInput(format!("Histogram column '{}' must be numeric", name)))?
        .iter()
        .flatten()
        .copied()
        .filter(|v| v.is_finite())
        .collect();

    let (mut low, mut high) = values
        .iter()
        .fold(None, |acc: Option<(f64, f64)>, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
        .unwrap_or((0.0, 1.0));
    if low == high {
        low -= 0.5;
        high += 0.5;
    }

    let width = (high - low) / bins as f64;
    let edges: Vec<f64> = (0..=bins)
        .map(|i| if i == bins { high } else { low + width * i as f64 })
        .collect();

    let mut counts = vec![0usize; bins];
    for v in &values {
        let mut i = (((v - low) / (high - low)) * bins as f64) as usize;
        i = i.min(bins - 1);
        // floating point can land one bin off near an edge
        if i > 0 && *v < edges[i] {
            i -= 1;
        } else if i + 1 < bins && *v >= edges[i + 1] {
            i += 1;
        }
        counts[i] += 1;
    }

    let labels = edges
        .windows(2)
        .map(|w| format!("{}-{}", format_edge(w[0]), format_edge(w[1])))
        .collect();
    Ok((labels, counts.iter().map(|c| sanitize(c)).collect()))
}

fn format_edge(edge: f64) -> String {
    let rounded = (edge * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{:.1}", rounded)
    } else {
        format!("{}", rounded)
    }
}

fn raw_series(table: &Table, x: &str, y: &str) -> Result<(Vec<String>, Vec<Value>), AppError> {
    let x_col = lookup(table, x)?;
    let y_values = numeric_values(lookup(table, y)?)
        .ok_or_else(|| AppError::EmptyResult { x: x.to_string(), y: y.to_string() })?;
    let (labels, data): (Vec<String>, Vec<Value>) = (0..table.height())
        .filter_map(|row| {
            let label = x_col.data.cell(row);
            let value = y_values[row]?;
            (!label.is_null()).then(|| (label.label(), sanitize(&value)))
        })
        .unzip();
    if labels.is_empty() {
        return Err(AppError::EmptyResult { x: x.to_string(), y: y.to_string() });
    }
    Ok((labels, data))
}

fn scatter_points(table: &Table, x: &str, y: &str) -> Result<Vec<Value>, AppError> {
    let not_numeric = |name: &str| AppError::InvalidInput(format!("Scatter column '{}' must be numeric", name));
    let xs = numeric_values(lookup(table, x)?).ok_or_else(|| not_numeric(x))?;
    let ys = numeric_values(lookup(table, y)?).ok_or_else(|| not_numeric(y))?;
    Ok(xs
        .iter()
        .zip(ys)
        .filter_map(|(a, b)| Some([(*a)?, (*b)?]))
        .map(|pair| sanitize(&pair))
        .collect())
}
