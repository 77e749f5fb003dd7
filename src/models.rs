use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::AppError;
use crate::services::sanitizer::JsonSafe;

pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Numeric,
    Text,
    Boolean,
    Datetime,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Numeric(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
    Boolean(Vec<Option<bool>>),
    Datetime(Vec<Option<NaiveDateTime>>),
}

impl ColumnData {
    pub fn kind(&self) -> ColumnKind {
        match self {
            ColumnData::Numeric(_) => ColumnKind::Numeric,
            ColumnData::Text(_) => ColumnKind::Text,
            ColumnData::Boolean(_) => ColumnKind::Boolean,
            ColumnData::Datetime(_) => ColumnKind::Datetime,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Numeric(v) => v.len(),
            ColumnData::Text(v) => v.len(),
            ColumnData::Boolean(v) => v.len(),
            ColumnData::Datetime(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn null_count(&self) -> usize {
        match self {
            ColumnData::Numeric(v) => v.iter().filter(|x| x.is_none()).count(),
            ColumnData::Text(v) => v.iter().filter(|x| x.is_none()).count(),
            ColumnData::Boolean(v) => v.iter().filter(|x| x.is_none()).count(),
            ColumnData::Datetime(v) => v.iter().filter(|x| x.is_none()).count(),
        }
    }

    pub fn cell(&self, row: usize) -> Cell {
        match self {
            ColumnData::Numeric(v) => v[row].map_or(Cell::Null, Cell::Number),
            ColumnData::Text(v) => v[row].clone().map_or(Cell::Null, Cell::Text),
            ColumnData::Boolean(v) => v[row].map_or(Cell::Null, Cell::Bool),
            ColumnData::Datetime(v) => v[row].map_or(Cell::Null, Cell::Datetime),
        }
    }

    pub fn take(&self, rows: &[usize]) -> ColumnData {
        match self {
            ColumnData::Numeric(v) => ColumnData::Numeric(rows.iter().map(|&i| v[i]).collect()),
            ColumnData::Text(v) => ColumnData::Text(rows.iter().map(|&i| v[i].clone()).collect()),
            ColumnData::Boolean(v) => ColumnData::Boolean(rows.iter().map(|&i| v[i]).collect()),
            ColumnData::Datetime(v) => ColumnData::Datetime(rows.iter().map(|&i| v[i]).collect()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self { name: name.into(), data }
    }

    pub fn numeric(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self::new(name, ColumnData::Numeric(values))
    }

    pub fn text<S: Into<String>>(name: impl Into<String>, values: Vec<Option<S>>) -> Self {
        let values = values.into_iter().map(|v| v.map(Into::into)).collect();
        Self::new(name, ColumnData::Text(values))
    }

    pub fn boolean(name: impl Into<String>, values: Vec<Option<bool>>) -> Self {
        Self::new(name, ColumnData::Boolean(values))
    }

    pub fn datetime(name: impl Into<String>, values: Vec<Option<NaiveDateTime>>) -> Self {
        Self::new(name, ColumnData::Datetime(values))
    }

    pub fn kind(&self) -> ColumnKind {
        self.data.kind()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Number(f64),
    Text(String),
    Bool(bool),
    Datetime(NaiveDateTime),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CellKey {
    Null,
    Number(u64),
    Text(String),
    Bool(bool),
    Datetime(NaiveDateTime),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn key(&self) -> CellKey {
        match self {
            Cell::Null => CellKey::Null,
            // -0.0 and 0.0 compare equal, so they must share a key
            Cell::Number(n) if *n == 0.0 => CellKey::Number(0.0f64.to_bits()),
            Cell::Number(n) if n.is_nan() => CellKey::Number(f64::NAN.to_bits()),
            Cell::Number(n) => CellKey::Number(n.to_bits()),
            Cell::Text(s) => CellKey::Text(s.clone()),
            Cell::Bool(b) => CellKey::Bool(*b),
            Cell::Datetime(d) => CellKey::Datetime(*d),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Cell::Null => String::new(),
            Cell::Number(n) => format_number(*n),
            Cell::Text(s) => s.clone(),
            Cell::Bool(b) => if *b { "True".to_string() } else { "False".to_string() },
            Cell::Datetime(d) => d.format(DATETIME_FORMAT).to_string(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Cell::Null => Value::Null,
            Cell::Number(n) => n.to_json_safe(),
            Cell::Text(s) => Value::String(s.clone()),
            Cell::Bool(b) => Value::Bool(*b),
            Cell::Datetime(d) => Value::String(d.format(DATETIME_FORMAT).to_string()),
        }
    }
}

pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Result<Self, AppError> {
        if let Some(first) = columns.first() {
            let height = first.len();
            if let Some(bad) = columns.iter().find(|c| c.len() != height) {
                return Err(AppError::InvalidInput(format!(
                    "Column '{}' has {} values, expected {}",
                    bad.name,
                    bad.len(),
                    height
                )));
            }
        }
        Ok(Self { columns })
    }

    // Columns must already share one length
    pub(crate) fn from_columns(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn height(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn row(&self, index: usize) -> Vec<Cell> {
        self.columns.iter().map(|c| c.data.cell(index)).collect()
    }

    pub fn take_rows(&self, rows: &[usize]) -> Table {
        Table {
            columns: self
                .columns
                .iter()
                .map(|c| Column::new(c.name.clone(), c.data.take(rows)))
                .collect(),
        }
    }

    // With duplicate names the later column wins
    pub fn to_records(&self, limit: usize) -> Vec<Value> {
        (0..self.height().min(limit))
            .map(|i| {
                let mut record = Map::new();
                for column in &self.columns {
                    record.insert(column.name.clone(), column.data.cell(i).to_json());
                }
                Value::Object(record)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Table {
        Table::new(vec![
            Column::numeric("age", vec![Some(30.0), None, Some(41.5)]),
            Column::text("city", vec![Some("NY"), Some("LA"), None]),
            Column::numeric("age", vec![Some(1.0), Some(2.0), Some(3.0)]),
        ])
        .unwrap()
    }

    #[test]
    fn rejects_ragged_columns() {
        let result = Table::new(vec![
            Column::numeric("a", vec![Some(1.0)]),
            Column::numeric("b", vec![Some(1.0), Some(2.0)]),
        ]);
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn lookup_returns_first_duplicate() {
        let table = sample();
        let age = table.column("age").unwrap();
        assert_eq!(age.data, ColumnData::Numeric(vec![Some(30.0), None, Some(41.5)]));
    }

    #[test]
    fn take_rows_keeps_requested_order() {
        let table = sample().take_rows(&[2, 0]);
        assert_eq!(table.height(), 2);
        assert_eq!(table.row(0)[0], Cell::Number(41.5));
        assert_eq!(table.row(1)[1], Cell::Text("NY".to_string()));
    }

    #[test]
    fn records_render_nulls_and_numbers() {
        let table = Table::new(vec![
            Column::numeric("x", vec![Some(1.0), Some(f64::INFINITY)]),
            Column::text("y", vec![None::<String>, Some("b".to_string())]),
        ])
        .unwrap();
        assert_eq!(
            table.to_records(10),
            vec![json!({"x": 1.0, "y": null}), json!({"x": null, "y": "b"})]
        );
    }

    #[test]
    fn negative_zero_shares_key_with_zero() {
        assert_eq!(Cell::Number(-0.0).key(), Cell::Number(0.0).key());
    }

    #[test]
    fn labels_drop_trailing_zero_fraction() {
        assert_eq!(Cell::Number(40.0).label(), "40");
        assert_eq!(Cell::Number(2.5).label(), "2.5");
        assert_eq!(Cell::Bool(true).label(), "True");
    }
}
