use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    error::AppError,
    services::{
        charts::{self, ChartResult, ChartSpec},
        llm_agent::QueryInsight,
        summary,
    },
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/query", post(query))
        .route("/visualize", post(visualize))
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    dataset_id: String,
    #[serde(default)]
    question: String,
}

#[derive(Debug, Deserialize)]
pub struct VisualizeRequest {
    #[serde(default)]
    dataset_id: String,
    chart_spec: Option<ChartSpec>,
}

#[derive(Debug, Serialize)]
pub struct VisualizeResponse {
    chart: ChartResult,
}

async fn query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryInsight>, AppError> {
    let question = request.question.trim();
    if request.dataset_id.is_empty() || question.is_empty() {
        return Err(AppError::InvalidInput("dataset_id and question required.".to_string()));
    }

    let table = state.store.load(&request.dataset_id).await?;
    let summary = summary::summarize(&table);
    tracing::info!("Answering question on {} ({} rows)", request.dataset_id, table.height());

    let insight = state.agent.ask(&table, &summary, question).await?;
    if insight.is_empty() {
        tracing::error!("Empty insight returned for {}", request.dataset_id);
        return Err(AppError::LlmError(
            "AI model returned an empty or invalid response. Please try again or use a different model."
                .to_string(),
        ));
    }
    Ok(Json(insight))
}

async fn visualize(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VisualizeRequest>,
) -> Result<Json<VisualizeResponse>, AppError> {
    let spec = match request.chart_spec {
        Some(spec) if !request.dataset_id.is_empty() => spec,
        _ => {
            return Err(AppError::InvalidInput(
                "dataset_id and chart_spec required.".to_string(),
            ))
        }
    };

    let table = state.store.load(&request.dataset_id).await?;
    let chart = charts::aggregate(&table, &spec)?;
    tracing::info!(
        "Built {} chart for {} with {} labels",
        chart.chart_type,
        request.dataset_id,
        chart.labels.len()
    );
    Ok(Json(VisualizeResponse { chart }))
}
