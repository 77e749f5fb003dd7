use chrono::NaiveDateTime;
use serde::Deserialize;
use std::collections::HashSet;

use crate::models::{Cell, CellKey, Column, ColumnData, Table, DATETIME_FORMAT};
use crate::services::statistics::{mean, median, mode, present};

pub const MISSING_PLACEHOLDER: &str = "<missing>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "Option<String>")]
pub enum NumericFill {
    #[default]
    Median,
    Mean,
}

impl From<Option<String>> for NumericFill {
    fn from(value: Option<String>) -> Self {
        match value.as_deref().map(|v| v.trim().to_lowercase()).as_deref() {
            Some("mean") => NumericFill::Mean,
            _ => NumericFill::Median,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "Option<String>")]
pub enum CategoricalFill {
    #[default]
    Mode,
    Literal,
}

// null means "not set", so it keeps the mode default
impl From<Option<String>> for CategoricalFill {
    fn from(value: Option<String>) -> Self {
        match value.as_deref().map(|v| v.trim().to_lowercase()).as_deref() {
            None | Some("mode") => CategoricalFill::Mode,
            Some(_) => CategoricalFill::Literal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CleaningStrategy {
    pub drop_columns: Vec<String>,
    pub drop_duplicates: bool,
    pub numeric: NumericFill,
    pub categorical: CategoricalFill,
    pub categorical_value: String,
}

impl Default for CleaningStrategy {
    fn default() -> Self {
        Self {
            drop_columns: Vec::new(),
            drop_duplicates: true,
            numeric: NumericFill::Median,
            categorical: CategoricalFill::Mode,
            categorical_value: MISSING_PLACEHOLDER.to_string(),
        }
    }
}

pub fn clean(table: &Table, strategy: Option<&CleaningStrategy>) -> Table {
    let default_strategy = CleaningStrategy::default();
    let strategy = strategy.unwrap_or(&default_strategy);

    let dropped = drop_columns(table, &strategy.drop_columns);
    if dropped.height() == 0 {
        tracing::debug!("Table has no rows, skipping deduplication and imputation");
        return dropped;
    }

    let deduped = if strategy.drop_duplicates {
        drop_duplicate_rows(&dropped)
    } else {
        dropped
    };

    let columns = deduped
        .into_columns()
        .into_iter()
        .map(|column| impute_column(column, strategy))
        .collect();

    Table::from_columns(columns)
}

fn drop_columns(table: &Table, names: &[String]) -> Table {
    if names.is_empty() {
        return table.clone();
    }
    let names: HashSet<&str> = names.iter().map(String::as_str).collect();
    let kept: Vec<Column> = table
        .columns()
        .iter()
        .filter(|c| !names.contains(c.name.as_str()))
        .cloned()
        .collect();
    tracing::debug!("Dropped {} columns", table.width() - kept.len());
    Table::from_columns(kept)
}

fn drop_duplicate_rows(table: &Table) -> Table {
    let mut seen: HashSet<Vec<CellKey>> = HashSet::with_capacity(table.height());
    let keep: Vec<usize> = (0..table.height())
        .filter(|&i| seen.insert(table.row(i).iter().map(Cell::key).collect()))
        .collect();
    let removed = table.height() - keep.len();
    if removed > 0 {
        tracing::debug!("Removed {} duplicate rows", removed);
    }
    table.take_rows(&keep)
}

fn impute_column(column: Column, strategy: &CleaningStrategy) -> Column {
    let Column { name, data } = column;
    if data.null_count() == 0 {
        return Column::new(name, data);
    }

    let data = match data {
        ColumnData::Numeric(values) => {
            let observed = present(&values);
            let fill = match strategy.numeric {
                NumericFill::Median => median(&observed),
                NumericFill::Mean => mean(&observed),
            };
            match fill {
                Some(fill) => ColumnData::Numeric(values.into_iter().map(|v| Some(v.unwrap_or(fill))).collect()),
                None => {
                    tracing::warn!("Column '{}' has no values to impute from, leaving it as is", name);
                    ColumnData::Numeric(values)
                }
            }
        }
        ColumnData::Text(values) => {
            let fill = match strategy.categorical {
                CategoricalFill::Mode => mode(values.iter().flatten().cloned())
                    .unwrap_or_else(|| MISSING_PLACEHOLDER.to_string()),
                CategoricalFill::Literal => strategy.categorical_value.clone(),
            };
            ColumnData::Text(values.into_iter().map(|v| Some(v.unwrap_or_else(|| fill.clone()))).collect())
        }
        ColumnData::Boolean(values) => {
            let fill = match strategy.categorical {
                CategoricalFill::Mode => mode(values.iter().flatten().copied()),
                CategoricalFill::Literal => parse_bool(&strategy.categorical_value),
            };
            match fill {
                Some(fill) => ColumnData::Boolean(values.into_iter().map(|v| Some(v.unwrap_or(fill))).collect()),
                None => fill_as_text(&ColumnData::Boolean(values), &literal_fill(strategy)),
            }
        }
        ColumnData::Datetime(values) => {
            let fill = match strategy.categorical {
                CategoricalFill::Mode => mode(values.iter().flatten().copied()),
                CategoricalFill::Literal => NaiveDateTime::parse_from_str(&strategy.categorical_value, DATETIME_FORMAT).ok(),
            };
            match fill {
                Some(fill) => ColumnData::Datetime(values.into_iter().map(|v| Some(v.unwrap_or(fill))).collect()),
                None => fill_as_text(&ColumnData::Datetime(values), &literal_fill(strategy)),
            }
        }
    };
    Column::new(name, data)
}

fn literal_fill(strategy: &CleaningStrategy) -> String {
    match strategy.categorical {
        CategoricalFill::Mode => MISSING_PLACEHOLDER.to_string(),
        CategoricalFill::Literal => strategy.categorical_value.clone(),
    }
}

fn fill_as_text(data: &ColumnData, fill: &str) -> ColumnData {
    let values = (0..data.len())
        .map(|i| match data.cell(i) {
            Cell::Null => Some(fill.to_string()),
            cell => Some(cell.label()),
        })
        .collect();
    ColumnData::Text(values)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnKind;
    use pretty_assertions::assert_eq;

    fn people() -> Table {
        Table::new(vec![
            Column::numeric("age", vec![Some(30.0), None, Some(30.0)]),
            Column::text("city", vec![Some("NY"), Some("NY"), Some("NY")]),
        ])
        .unwrap()
    }

    fn missing_count(table: &Table) -> usize {
        table.columns().iter().map(|c| c.data.null_count()).sum()
    }

    #[test]
    fn default_strategy_dedupes_then_fills_median() {
        let cleaned = clean(&people(), None);
        let expected = Table::new(vec![
            Column::numeric("age", vec![Some(30.0), Some(30.0)]),
            Column::text("city", vec![Some("NY"), Some("NY")]),
        ])
        .unwrap();
        assert_eq!(cleaned, expected);
    }

    #[test]
    fn input_table_is_not_modified() {
        let table = people();
        let before = table.clone();
        let _ = clean(&table, None);
        assert_eq!(table, before);
    }

    #[test]
    fn keeps_row_count_without_dedupe() {
        let strategy = CleaningStrategy { drop_duplicates: false, ..Default::default() };
        let cleaned = clean(&people(), Some(&strategy));
        assert_eq!(cleaned.height(), 3);
        assert_eq!(missing_count(&cleaned), 0);
    }

    #[test]
    fn drop_columns_ignores_unknown_names() {
        let strategy = CleaningStrategy {
            drop_columns: vec!["city".to_string(), "nope".to_string()],
            drop_duplicates: false,
            ..Default::default()
        };
        let cleaned = clean(&people(), Some(&strategy));
        assert_eq!(cleaned.column_names(), vec!["age".to_string()]);

        let strategy = CleaningStrategy { drop_columns: vec!["nope".to_string()], ..Default::default() };
        assert_eq!(clean(&people(), Some(&strategy)).width(), 2);
    }

    #[test]
    fn dedupe_considers_only_remaining_columns() {
        let table = Table::new(vec![
            Column::numeric("id", vec![Some(1.0), Some(2.0), Some(3.0)]),
            Column::text("city", vec![Some("NY"), Some("LA"), Some("NY")]),
        ])
        .unwrap();
        let strategy = CleaningStrategy { drop_columns: vec!["id".to_string()], ..Default::default() };
        let cleaned = clean(&table, Some(&strategy));
        assert_eq!(cleaned.column("city").unwrap().data, ColumnData::Text(vec![Some("NY".into()), Some("LA".into())]));
    }

    #[test]
    fn mean_strategy_uses_mean() {
        let table = Table::new(vec![Column::numeric("v", vec![Some(1.0), Some(2.0), Some(6.0), None])]).unwrap();
        let strategy = CleaningStrategy { numeric: NumericFill::Mean, ..Default::default() };
        let cleaned = clean(&table, Some(&strategy));
        assert_eq!(cleaned.column("v").unwrap().data, ColumnData::Numeric(vec![Some(1.0), Some(2.0), Some(6.0), Some(3.0)]));
    }

    #[test]
    fn mode_tie_picks_first_encountered() {
        let table = Table::new(vec![Column::text("c", vec![Some("b"), Some("a"), None, Some("a"), Some("b")])]).unwrap();
        let strategy = CleaningStrategy { drop_duplicates: false, ..Default::default() };
        let cleaned = clean(&table, Some(&strategy));
        let ColumnData::Text(values) = &cleaned.column("c").unwrap().data else {
            panic!("expected text column");
        };
        assert_eq!(values[2].as_deref(), Some("b"));
    }

    #[test]
    fn literal_categorical_value_is_used() {
        let table = Table::new(vec![Column::text("c", vec![Some("x"), None])]).unwrap();
        let strategy: CleaningStrategy = serde_json::from_value(serde_json::json!({
            "categorical": "constant",
            "categorical_value": "unknown"
        }))
        .unwrap();
        let cleaned = clean(&table, Some(&strategy));
        assert_eq!(cleaned.column("c").unwrap().data, ColumnData::Text(vec![Some("x".into()), Some("unknown".into())]));
    }

    #[test]
    fn all_missing_text_falls_back_to_placeholder() {
        let table = Table::new(vec![Column::text::<String>("c", vec![None, None])]).unwrap();
        let cleaned = clean(&table, None);
        assert_eq!(cleaned.column("c").unwrap().data, ColumnData::Text(vec![Some(MISSING_PLACEHOLDER.into())]));
    }

    #[test]
    fn all_missing_boolean_becomes_text_placeholder() {
        let table = Table::new(vec![
            Column::numeric("id", vec![Some(1.0), Some(2.0)]),
            Column::boolean("flag", vec![None, None]),
        ])
        .unwrap();
        let cleaned = clean(&table, None);
        let flag = cleaned.column("flag").unwrap();
        assert_eq!(flag.kind(), ColumnKind::Text);
        assert_eq!(missing_count(&cleaned), 0);
    }

    #[test]
    fn all_missing_numeric_does_not_panic() {
        let table = Table::new(vec![Column::numeric("v", vec![None, None])]).unwrap();
        let strategy = CleaningStrategy { drop_duplicates: false, ..Default::default() };
        let cleaned = clean(&table, Some(&strategy));
        assert_eq!(cleaned.height(), 2);
    }

    #[test]
    fn zero_row_table_passes_through() {
        let table = Table::new(vec![Column::numeric("v", vec![]), Column::text::<String>("c", vec![])]).unwrap();
        assert_eq!(clean(&table, None), table);
    }

    #[test]
    fn boolean_mode_fill_keeps_type() {
        let table = Table::new(vec![Column::boolean("f", vec![Some(true), None, Some(true), Some(false)])]).unwrap();
        let strategy = CleaningStrategy { drop_duplicates: false, ..Default::default() };
        let cleaned = clean(&table, Some(&strategy));
        assert_eq!(cleaned.column("f").unwrap().data, ColumnData::Boolean(vec![Some(true), Some(true), Some(true), Some(false)]));
    }

    #[test]
    fn cleaning_twice_is_stable() {
        let table = Table::new(vec![
            Column::numeric("age", vec![Some(20.0), None, Some(40.0), Some(20.0)]),
            Column::text("city", vec![Some("NY"), Some("LA"), None, Some("NY")]),
        ])
        .unwrap();
        let once = clean(&table, None);
        let twice = clean(&once, None);
        assert_eq!(once.height(), 3);
        assert_eq!(once, twice);
    }

    #[test]
    fn strategy_deserializes_with_defaults() {
        let strategy: CleaningStrategy = serde_json::from_str(r#"{"numeric": "mean"}"#).unwrap();
        assert_eq!(strategy.numeric, NumericFill::Mean);
        assert!(strategy.drop_duplicates);
        assert_eq!(strategy.categorical, CategoricalFill::Mode);
        assert_eq!(strategy.categorical_value, MISSING_PLACEHOLDER);

        let strategy: CleaningStrategy = serde_json::from_str(r#"{"numeric": "whatever"}"#).unwrap();
        assert_eq!(strategy.numeric, NumericFill::Median);
    }

    #[test]
    fn null_fill_options_use_defaults() {
        let strategy: CleaningStrategy = serde_json::from_str(r#"{"numeric": null, "categorical": null}"#).unwrap();
        assert_eq!(strategy.numeric, NumericFill::Median);
        assert_eq!(strategy.categorical, CategoricalFill::Mode);
    }

    #[test]
    fn badly_typed_strategy_is_rejected() {
        let parsed = serde_json::from_str::<CleaningStrategy>(r#"{"drop_duplicates": "no"}"#);
        assert!(parsed.is_err());
    }

    fn jan(day: u32) -> Option<NaiveDateTime> {
        chrono::NaiveDate::from_ymd_opt(2024, 1, day).and_then(|d| d.and_hms_opt(0, 0, 0))
    }

    #[test]
    fn unparseable_literal_turns_datetime_column_into_text() {
        let table = Table::new(vec![Column::datetime("joined", vec![jan(1), None, jan(3)])]).unwrap();
        let strategy = CleaningStrategy {
            categorical: CategoricalFill::Literal,
            categorical_value: "custom".to_string(),
            ..Default::default()
        };
        let cleaned = clean(&table, Some(&strategy));
        assert_eq!(
            cleaned.column("joined").unwrap().data,
            ColumnData::Text(vec![
                Some("2024-01-01T00:00:00".into()),
                Some("custom".into()),
                Some("2024-01-03T00:00:00".into()),
            ])
        );
    }

    #[test]
    fn parseable_literal_keeps_datetime_column() {
        let table = Table::new(vec![Column::datetime("joined", vec![jan(1), None])]).unwrap();
        let strategy = CleaningStrategy {
            categorical: CategoricalFill::Literal,
            categorical_value: "2024-01-09T00:00:00".to_string(),
            ..Default::default()
        };
        let cleaned = clean(&table, Some(&strategy));
        assert_eq!(cleaned.column("joined").unwrap().data, ColumnData::Datetime(vec![jan(1), jan(9)]));
    }

    #[test]
    fn all_missing_datetime_becomes_text_placeholder() {
        let table = Table::new(vec![
            Column::numeric("id", vec![Some(1.0), Some(2.0)]),
            Column::datetime("joined", vec![None, None]),
        ])
        .unwrap();
        let cleaned = clean(&table, None);
        assert_eq!(
            cleaned.column("joined").unwrap().data,
            ColumnData::Text(vec![Some(MISSING_PLACEHOLDER.into()), Some(MISSING_PLACEHOLDER.into())])
        );
    }
}
