use axum::{
    body::{Body, Bytes},
    extract::{multipart::MultipartError, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::{
    error::AppError,
    models::Table,
    services::{
        cleaner::{self, CleaningStrategy},
        export::{ExportFormat, ExportReport},
        summary,
    },
    AppState,
};

pub const PREVIEW_ROWS: usize = 20;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/upload", post(upload))
        .route("/preview/:dataset_id", get(preview))
        .route("/clean/:dataset_id", post(clean))
        .route("/stats/:dataset_id", get(stats))
        .route("/download_stats/:dataset_id", get(download_stats))
        .route("/download/:dataset_id", get(download))
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    dataset_id: String,
    preview: Vec<Value>,
    columns: Vec<String>,
}

impl PreviewResponse {
    fn new(dataset_id: String, table: &Table) -> Self {
        Self {
            dataset_id,
            preview: table.to_records(PREVIEW_ROWS),
            columns: table.column_names(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CleanRequest {
    #[serde(default)]
    strategy: Option<CleaningStrategy>,
}

// An absent body means the default strategy; anything else has to parse
fn parse_clean_request(body: &[u8]) -> Result<CleanRequest, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(CleanRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::InvalidInput(format!("Invalid cleaning strategy: {}", e)))
}

#[derive(Debug, Serialize)]
pub struct CleanExports {
    dataset: ExportReport,
    stats: ExportReport,
    degraded: bool,
}

#[derive(Debug, Serialize)]
pub struct CleanResponse {
    preview: Vec<Value>,
    stats: Value,
    cleaned: bool,
    exports: CleanExports,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    dataset_id: String,
    stats: Value,
}

#[derive(Debug, Deserialize)]
pub struct FormatQuery {
    format: Option<String>,
}

impl FormatQuery {
    fn export_format(&self) -> Result<ExportFormat, AppError> {
        ExportFormat::parse(self.format.as_deref().unwrap_or("csv"))
    }
}

fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge("File too large.".to_string())
    } else {
        AppError::InvalidInput(format!("Malformed upload: {}", err.body_text()))
    }
}

async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<PreviewResponse>, AppError> {
    let start = std::time::Instant::now();
    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let data = field.bytes().await.map_err(multipart_error)?;
        upload = Some((filename, data));
        break;
    }

    let (filename, data) = upload
        .filter(|(filename, _)| !filename.is_empty())
        .ok_or_else(|| AppError::InvalidInput("No file uploaded.".to_string()))?;

    let max = state.config.max_upload_size;
    if data.len() > max {
        tracing::warn!("Rejected upload {} of {} bytes", filename, data.len());
        return Err(AppError::PayloadTooLarge(format!(
            "File too large (max {}MB).",
            max / (1024 * 1024)
        )));
    }

    let dataset_id = state.store.save_upload(&filename, data).await?;
    let table = match state.store.load(&dataset_id).await {
        Ok(table) => table,
        Err(e) => {
            tracing::error!("Uploaded file {} could not be parsed: {}", filename, e);
            if let Err(cleanup) = state.store.delete(&dataset_id).await {
                tracing::warn!("Failed to remove unreadable upload {}: {}", dataset_id, cleanup);
            }
            return Err(e);
        }
    };

    tracing::info!(
        "Upload {} loaded as {} ({} rows x {} columns) in {:?}",
        filename,
        dataset_id,
        table.height(),
        table.width(),
        start.elapsed()
    );
    Ok(Json(PreviewResponse::new(dataset_id, &table)))
}

async fn preview(
    State(state): State<Arc<AppState>>,
    Path(dataset_id): Path<String>,
) -> Result<Json<PreviewResponse>, AppError> {
    let table = state.store.load(&dataset_id).await?;
    Ok(Json(PreviewResponse::new(dataset_id, &table)))
}

async fn clean(
    State(state): State<Arc<AppState>>,
    Path(dataset_id): Path<String>,
    body: Bytes,
) -> Result<Json<CleanResponse>, AppError> {
    let start = std::time::Instant::now();
    let request = parse_clean_request(&body)?;
    let table = state.store.load(&dataset_id).await?;

    let cleaned = cleaner::clean(&table, request.strategy.as_ref());
    tracing::info!(
        "Cleaned {}: {} -> {} rows, {} -> {} columns",
        dataset_id,
        table.height(),
        cleaned.height(),
        table.width(),
        cleaned.width()
    );

    let stats = summary::summarize(&cleaned).to_value();
    let dataset_exports = state.store.save_cleaned(&dataset_id, &cleaned).await?;
    let stats_exports = state.store.save_stats(&dataset_id, &stats).await?;
    let degraded = dataset_exports.degraded() || stats_exports.degraded();
    if degraded {
        tracing::warn!("Exports for {} are incomplete", dataset_id);
    }

    tracing::info!("Clean request for {} finished in {:?}", dataset_id, start.elapsed());
    Ok(Json(CleanResponse {
        preview: cleaned.to_records(PREVIEW_ROWS),
        stats,
        cleaned: true,
        exports: CleanExports {
            dataset: dataset_exports,
            stats: stats_exports,
            degraded,
        },
    }))
}

async fn refresh_stats(state: &AppState, dataset_id: &str) -> Result<Value, AppError> {
    let table = state.store.load(dataset_id).await?;
    let stats = summary::summarize(&table).to_value();
    let report = state.store.save_stats(dataset_id, &stats).await?;
    if report.degraded() {
        tracing::warn!("Stats exports for {} are incomplete", dataset_id);
    }
    Ok(stats)
}

async fn stats(
    State(state): State<Arc<AppState>>,
    Path(dataset_id): Path<String>,
) -> Result<Json<StatsResponse>, AppError> {
    let stats = refresh_stats(&state, &dataset_id).await?;
    Ok(Json(StatsResponse { dataset_id, stats }))
}

async fn file_response(path: &std::path::Path) -> Result<Response, AppError> {
    let data = tokio::fs::read(path).await?;
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("download");

    Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", filename))
        .body(Body::from(data))
        .map_err(|e| AppError::Internal(e.to_string()))
}

async fn download_stats(
    State(state): State<Arc<AppState>>,
    Path(dataset_id): Path<String>,
    Query(query): Query<FormatQuery>,
) -> Result<Response, AppError> {
    let format = query.export_format()?;
    if !ExportFormat::WRITABLE.contains(&format) {
        return Err(AppError::InvalidInput(format!("Stats are not exported as {}", format)));
    }

    let path = match state.store.stats_file(&dataset_id, format).await? {
        Some(path) => path,
        None => {
            tracing::info!("Stats file for {} missing, regenerating", dataset_id);
            refresh_stats(&state, &dataset_id).await?;
            state
                .store
                .stats_file(&dataset_id, format)
                .await?
                .ok_or_else(|| AppError::NotFound("Stats file not found.".to_string()))?
        }
    };
    file_response(&path).await
}

async fn download(
    State(state): State<Arc<AppState>>,
    Path(dataset_id): Path<String>,
    Query(query): Query<FormatQuery>,
) -> Result<Response, AppError> {
    let format = query.export_format()?;
    let path = state.store.download_file(&dataset_id, format).await?;
    file_response(&path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::cleaner::NumericFill;

    #[test]
    fn empty_clean_body_uses_default_strategy() {
        assert!(parse_clean_request(b"").unwrap().strategy.is_none());
        assert!(parse_clean_request(b"  \n").unwrap().strategy.is_none());
        assert!(parse_clean_request(br#"{"strategy": null}"#).unwrap().strategy.is_none());
    }

    #[test]
    fn malformed_strategy_is_invalid_input() {
        let body = br#"{"strategy": {"drop_duplicates": "no", "drop_columns": ["b"]}}"#;
        assert!(matches!(parse_clean_request(body), Err(AppError::InvalidInput(_))));
        assert!(matches!(parse_clean_request(b"{not json"), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn strategy_fields_are_read() {
        let body = br#"{"strategy": {"drop_duplicates": false, "drop_columns": ["b"], "numeric": null}}"#;
        let strategy = parse_clean_request(body).unwrap().strategy.unwrap();
        assert!(!strategy.drop_duplicates);
        assert_eq!(strategy.drop_columns, vec!["b".to_string()]);
        assert_eq!(strategy.numeric, NumericFill::Median);
    }
}
