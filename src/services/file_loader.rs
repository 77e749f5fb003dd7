use calamine::{open_workbook_from_rs, Data, Reader, Xlsx};
use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;
use std::io::Cursor;

use crate::error::AppError;
use crate::models::{Column, ColumnData, Table};

pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["csv", "xlsx", "json"];


const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y"];
const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
];

pub fn normalize_extension(extension: &str) -> String {
    extension.trim().trim_start_matches('.').to_lowercase()
}

pub fn normalize_column_name(name: &str) -> String {
    name.trim().to_lowercase()
}

pub fn load(raw: &[u8], extension: &str) -> Result<Table, AppError> {
    let start = std::time::Instant::now();
    let extension = normalize_extension(extension);
    let table = match extension.as_str() {
        "csv" => dataframe_to_table(&read_csv(raw)?)?,
        "json" => dataframe_to_table(&read_json(raw)?)?,
        "xlsx" => read_xlsx(raw)?,
        other => {
            return Err(AppError::InvalidInput(format!(
                "Unsupported file type '.{}'. Only .csv, .xlsx, .json allowed.",
                other
            )))
        }
    };
    tracing::info!(
        "Loaded {} file: {} rows x {} columns in {:?}",
        extension,
        table.height(),
        table.width(),
        start.elapsed()
    );
    Ok(table)
}

fn read_csv(raw: &[u8]) -> Result<DataFrame, AppError> {
    let strict = CsvReader::new(Cursor::new(raw.to_vec()))
        .has_header(true)
        .infer_schema(None)
        .finish();
    match strict {
        Ok(df) => Ok(df),
        Err(e) => {
            tracing::warn!("Strict UTF-8 CSV parse failed ({}), retrying with lossy decoding", e);
            CsvReader::new(Cursor::new(raw.to_vec()))
                .has_header(true)
                .infer_schema(None)
                .with_encoding(CsvEncoding::LossyUtf8)
                .finish()
                .map_err(|e| AppError::FileProcessingError(format!("Failed to load file: {}", e)))
        }
    }
}

fn read_json(raw: &[u8]) -> Result<DataFrame, AppError> {
    JsonReader::new(Cursor::new(raw.to_vec()))
        .finish()
        .map_err(|e| AppError::FileProcessingError(format!("Failed to load file: {}", e)))
}

fn dataframe_to_table(df: &DataFrame) -> Result<Table, AppError> {
    let columns = df
        .get_columns()
        .iter()
        .map(series_to_column)
        .collect::<Result<Vec<_>, _>>()?;
    Table::new(columns)
}

fn series_to_column(series: &Series) -> Result<Column, AppError> {
    let name = normalize_column_name(series.name());
    let data = match series.dtype() {
        DataType::Boolean => ColumnData::Boolean(series.bool()?.into_iter().collect()),
        DataType::Date | DataType::Datetime(_, _) => {
            let millis = series
                .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?
                .cast(&DataType::Int64)?;
            ColumnData::Datetime(
                millis
                    .i64()?
                    .into_iter()
                    .map(|ms| ms.and_then(|ms| chrono::DateTime::from_timestamp_millis(ms)).map(|d| d.naive_utc()))
                    .collect(),
            )
        }
        DataType::String => {
            let values: Vec<Option<String>> = series.str()?.into_iter().map(|v| v.map(str::to_string)).collect();
            text_or_datetime(values)
        }
        dtype if dtype.is_numeric() => {
            let floats = series.cast(&DataType::Float64)?;
            ColumnData::Numeric(
                floats
                    .f64()?
                    .into_iter()
                    .map(|v| v.filter(|f| !f.is_nan()))
                    .collect(),
            )
        }
        DataType::Null => ColumnData::Text(vec![None; series.len()]),
        other => {
            tracing::debug!("Column '{}' has dtype {:?}, reading it as text", name, other);
            let strings = series.cast(&DataType::String)?;
            ColumnData::Text(strings.str()?.into_iter().map(|v| v.map(str::to_string)).collect())
        }
    };
    Ok(Column::new(name, data))
}

// A single value that is not a date keeps the whole column as text
fn text_or_datetime(values: Vec<Option<String>>) -> ColumnData {
    let parsed: Option<Vec<Option<NaiveDateTime>>> = values
        .iter()
        .map(|v| match v {
            None => Some(None),
            Some(s) => parse_datetime(s).map(Some),
        })
        .collect();
    match parsed {
        Some(dates) if dates.iter().any(Option::is_some) => ColumnData::Datetime(dates),
        _ => ColumnData::Text(values),
    }
}

pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn read_xlsx(raw: &[u8]) -> Result<Table, AppError> {
    let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(raw.to_vec()))
        .map_err(|e| AppError::FileProcessingError(format!("Failed to open Excel file: {}", e)))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| AppError::FileProcessingError("No sheets found in workbook".to_string()))?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| AppError::FileProcessingError(format!("Failed to read worksheet {}: {}", sheet_name, e)))?;

    let rows: Vec<Vec<Data>> = range.rows().map(|row| row.to_vec()).collect();
    let Some(header) = rows.first() else {
        tracing::warn!("Sheet {} is empty", sheet_name);
        return Ok(Table::default());
    };

    let columns = header
        .iter()
        .enumerate()
        .map(|(idx, cell)| {
            let values: Vec<Data> = rows
                .iter()
                .skip(1)
                .map(|row| row.get(idx).cloned().unwrap_or(Data::Empty))
                .collect();
            Column::new(normalize_column_name(&cell.to_string()), cells_to_column(&values))
        })
        .collect();
    Table::new(columns)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellType {
    Numeric,
    Date,
    Boolean,
    Text,
}

fn cell_type(value: &Data) -> CellType {
    match value {
        Data::Float(f) if !f.is_nan() => CellType::Numeric,
        Data::Int(_) => CellType::Numeric,
        Data::DateTime(_) => CellType::Date,
        Data::DateTimeIso(s) | Data::String(s) if parse_datetime(s).is_some() => CellType::Date,
        Data::Bool(_) => CellType::Boolean,
        _ => CellType::Text,
    }
}

// Every non-empty cell has to agree, otherwise the column is read as text
fn detect_cell_type(values: &[Data]) -> CellType {
    let mut present = values.iter().filter(|v| !is_empty_cell(v)).map(cell_type);
    let Some(first) = present.next() else {
        return CellType::Text;
    };
    if present.all(|t| t == first) {
        first
    } else {
        CellType::Text
    }
}

fn is_empty_cell(value: &Data) -> bool {
    match value {
        Data::Empty => true,
        Data::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

// Days since 1899-12-30
fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (serial * 86_400_000.0).round() as i64;
    epoch.checked_add_signed(chrono::Duration::milliseconds(millis))
}

fn cells_to_column(values: &[Data]) -> ColumnData {
    match detect_cell_type(values) {
        CellType::Numeric => ColumnData::Numeric(
            values
                .iter()
                .map(|v| match v {
                    Data::Float(f) if !f.is_nan() => Some(*f),
                    Data::Int(i) => Some(*i as f64),
                    _ => None,
                })
                .collect(),
        ),
        CellType::Date => ColumnData::Datetime(
            values
                .iter()
                .map(|v| match v {
                    Data::DateTime(d) => excel_serial_to_datetime(d.as_f64()),
                    Data::DateTimeIso(s) | Data::String(s) => parse_datetime(s),
                    _ => None,
                })
                .collect(),
        ),
        CellType::Boolean => ColumnData::Boolean(
            values
                .iter()
                .map(|v| match v {
                    Data::Bool(b) => Some(*b),
                    _ => None,
                })
                .collect(),
        ),
        CellType::Text => ColumnData::Text(
            values
                .iter()
                .map(|v| if is_empty_cell(v) { None } else { Some(v.to_string()) })
                .collect(),
        ),
    }
}
