use polars::prelude::*;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::AppError;
use crate::models::{ColumnData, Table, DATETIME_FORMAT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
    Xlsx,
}

impl ExportFormat {
    pub const WRITABLE: [ExportFormat; 2] = [ExportFormat::Csv, ExportFormat::Json];

    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value.trim().trim_start_matches('.').to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            "xlsx" => Ok(ExportFormat::Xlsx),
            other => Err(AppError::InvalidInput(format!("Invalid format '{}'", other))),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Xlsx => "xlsx",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportFailure {
    pub format: ExportFormat,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExportReport {
    pub written: Vec<PathBuf>,
    pub failed: Vec<ExportFailure>,
}

impl ExportReport {
    pub fn degraded(&self) -> bool {
        !self.failed.is_empty()
    }

    pub async fn write(&mut self, format: ExportFormat, path: &Path, bytes: Result<Vec<u8>, AppError>) {
        let result = match bytes {
            Ok(bytes) => tokio::fs::write(path, bytes).await.map_err(AppError::from),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => self.written.push(path.to_path_buf()),
            Err(e) => {
                tracing::warn!("Failed to export {} to {}: {}", format, path.display(), e);
                self.failed.push(ExportFailure { format, error: e.to_string() });
            }
        }
    }
}

pub fn flatten(value: &Value) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    flatten_into(value, String::new(), &mut out);
    out
}

fn flatten_into(value: &Value, prefix: String, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let name = if prefix.is_empty() { key.clone() } else { format!("{}.{}", prefix, key) };
                flatten_into(child, name, out);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                flatten_into(child, format!("{}[{}]", prefix, i), out);
            }
        }
        leaf => out.push((prefix, leaf.clone())),
    }
}

fn leaf_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn write_csv(df: &mut DataFrame) -> Result<Vec<u8>, AppError> {
    let mut buf = Vec::new();
    CsvWriter::new(&mut buf).finish(df)?;
    Ok(buf)
}

pub fn stats_to_csv(stats: &Value) -> Result<Vec<u8>, AppError> {
    let flat = flatten(stats);
    let stat: Vec<String> = flat.iter().map(|(k, _)| k.clone()).collect();
    let value: Vec<Option<String>> = flat.iter().map(|(_, v)| leaf_to_string(v)).collect();
    let mut df = DataFrame::new(vec![Series::new("stat", stat), Series::new("value", value)])?;
    write_csv(&mut df)
}

pub fn stats_to_json(stats: &Value) -> Result<Vec<u8>, AppError> {
    Ok(serde_json::to_vec_pretty(stats)?)
}

pub fn table_to_dataframe(table: &Table) -> Result<DataFrame, AppError> {
    let series = table
        .columns()
        .iter()
        .map(|column| {
            let name = column.name.as_str();
            match &column.data {
                ColumnData::Numeric(values) => Series::new(name, values.clone()),
                ColumnData::Text(values) => Series::new(name, values.clone()),
                ColumnData::Boolean(values) => Series::new(name, values.clone()),
                ColumnData::Datetime(values) => {
                    let formatted: Vec<Option<String>> = values
                        .iter()
                        .map(|v| v.map(|d| d.format(DATETIME_FORMAT).to_string()))
                        .collect();
                    Series::new(name, formatted)
                }
            }
        })
        .collect::<Vec<_>>();
    Ok(DataFrame::new(series)?)
}

pub fn table_to_csv(table: &Table) -> Result<Vec<u8>, AppError> {
    let mut df = table_to_dataframe(table)?;
    write_csv(&mut df)
}

pub fn table_to_json(table: &Table) -> Result<Vec<u8>, AppError> {
    Ok(serde_json::to_vec(&table.to_records(table.height()))?)
}

pub fn encode_table(table: &Table, format: ExportFormat) -> Result<Vec<u8>, AppError> {
    match format {
        ExportFormat::Csv => table_to_csv(table),
        ExportFormat::Json => table_to_json(table),
        ExportFormat::Xlsx => Err(AppError::InvalidInput("XLSX export is not available".to_string())),
    }
}

pub fn encode_stats(stats: &Value, format: ExportFormat) -> Result<Vec<u8>, AppError> {
    match format {
        ExportFormat::Csv => stats_to_csv(stats),
        ExportFormat::Json => stats_to_json(stats),
        ExportFormat::Xlsx => Err(AppError::InvalidInput("XLSX export is not available".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Column;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn flatten_uses_dotted_and_indexed_keys() {
        let stats = json!({
            "describe": {"age": {"mean": 30.5}},
            "value_counts": {"city": ["NY", "LA"]},
            "nulls": {"age": 0}
        });
        let flat = flatten(&stats);
        assert_eq!(
            flat,
            vec![
                ("describe.age.mean".to_string(), json!(30.5)),
                ("value_counts.city[0]".to_string(), json!("NY")),
                ("value_counts.city[1]".to_string(), json!("LA")),
                ("nulls.age".to_string(), json!(0)),
            ]
        );
    }

    #[test]
    fn stats_csv_has_stat_value_columns() {
        let csv = stats_to_csv(&json!({"nulls": {"age": 2}, "describe": {"city": {"top": "NY"}}})).unwrap();
        let text = String::from_utf8(csv).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("stat,value"));
        assert_eq!(lines.next(), Some("nulls.age,2"));
        assert_eq!(lines.next(), Some("describe.city.top,NY"));
    }

    #[test]
    fn table_csv_round_trips_through_loader() {
        let table = Table::new(vec![
            Column::numeric("age", vec![Some(30.0), Some(41.5)]),
            Column::text("city", vec![Some("NY"), Some("LA")]),
        ])
        .unwrap();
        let csv = table_to_csv(&table).unwrap();
        let loaded = crate::services::file_loader::load(&csv, "csv").unwrap();
        assert_eq!(loaded, table);
    }

    #[test]
    fn table_json_is_records() {
        let table = Table::new(vec![Column::text("c", vec![Some("x"), None])]).unwrap();
        let json: Value = serde_json::from_slice(&table_to_json(&table).unwrap()).unwrap();
        assert_eq!(json, json!([{"c": "x"}, {"c": null}]));
    }

    #[test]
    fn xlsx_is_not_writable() {
        let table = Table::default();
        assert!(encode_table(&table, ExportFormat::Xlsx).is_err());
        assert!(!ExportFormat::WRITABLE.contains(&ExportFormat::Xlsx));
    }

    #[test]
    fn format_parsing() {
        assert_eq!(ExportFormat::parse(".CSV").unwrap(), ExportFormat::Csv);
        assert!(ExportFormat::parse("pdf").is_err());
    }
}
