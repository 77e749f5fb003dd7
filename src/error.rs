use axum::{
    response::{IntoResponse, Response},
    http::StatusCode,
};
use serde_json::json;
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),
    #[error("Unsupported chart type: {0}")]
    UnsupportedChartType(String),
    #[error("No data to plot. Check if X is categorical/discrete and Y is numeric. Current X: {x}, Y: {y}.")]
    EmptyResult { x: String, y: String },
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("LLM error: {0}")]
    LlmError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("File processing error: {0}")]
    FileProcessingError(String),
    #[error("DataFrame error: {0}")]
    DataFrameError(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<polars::error::PolarsError> for AppError {
    fn from(err: polars::error::PolarsError) -> Self {
        AppError::DataFrameError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ParseError(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let status = match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::UnsupportedChartType(_) => StatusCode::BAD_REQUEST,
            AppError::EmptyResult { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::LlmError(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ParseError(_) => StatusCode::BAD_REQUEST,
            AppError::FileProcessingError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::DataFrameError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_result_message_names_columns() {
        let err = AppError::EmptyResult { x: "city".to_string(), y: "sales".to_string() };
        let message = err.to_string();
        assert!(message.contains("X: city"));
        assert!(message.contains("Y: sales"));
    }

    #[test]
    fn not_found_maps_to_404() {
        let response = AppError::NotFound("dataset abc".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unsupported_chart_maps_to_400() {
        let response = AppError::UnsupportedChartType("radar".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
