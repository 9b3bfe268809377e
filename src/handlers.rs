use crate::config::Config;
use crate::errors::AppError;
use crate::models::{BatchResult, Lead, MoveReport, Pipeline, ScoreSummary, ScoredLead, ScoringStats, Status};
use crate::processor::LeadProcessor;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Header carrying the control API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared application state injected into handlers.
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Scoring pipeline over Kommo and the language model.
    pub processor: LeadProcessor,
}

/// Rejects the request unless it carries the configured control key.
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = state.config.control_api_key.as_deref() else {
        return Ok(());
    };

    let provided = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if provided != expected {
        return Err(AppError::Unauthorized(format!(
            "Missing or invalid {} header",
            API_KEY_HEADER
        )));
    }
    Ok(())
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "kommo-lead-scorer",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// GET /api/v1/pipelines
pub async fn list_pipelines(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Pipeline>>, AppError> {
    authorize(&state, &headers)?;
    let pipelines = state.processor.gateway().list_pipelines().await?;
    Ok(Json(pipelines))
}

/// GET /api/v1/pipelines/:id/statuses
pub async fn list_pipeline_statuses(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(pipeline_id): Path<i64>,
) -> Result<Json<Vec<Status>>, AppError> {
    authorize(&state, &headers)?;
    let statuses = state
        .processor
        .gateway()
        .list_pipeline_statuses(pipeline_id)
        .await?;
    Ok(Json(statuses))
}

/// GET /api/v1/pipelines/:id/leads
pub async fn list_pipeline_leads(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(pipeline_id): Path<i64>,
) -> Result<Json<Vec<Lead>>, AppError> {
    authorize(&state, &headers)?;
    tracing::info!("GET /pipelines/{}/leads", pipeline_id);
    let leads = state
        .processor
        .gateway()
        .list_leads_by_pipeline(pipeline_id)
        .await?;
    Ok(Json(leads))
}

#[derive(Debug, Deserialize)]
pub struct ScoreLeadsRequest {
    pub leads: Vec<Lead>,
}

#[derive(Debug, Serialize)]
pub struct ScoreLeadsResponse {
    pub scored_leads: Vec<ScoredLead>,
    pub summary: ScoringStats,
}

/// POST /api/v1/leads/score
///
/// Scores the posted leads without touching the CRM.
pub async fn score_leads(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ScoreLeadsRequest>,
) -> Result<Json<ScoreLeadsResponse>, AppError> {
    authorize(&state, &headers)?;
    tracing::info!("POST /leads/score - {} leads", request.leads.len());

    let (scored_leads, summary) = state.processor.score_all_with_stats(&request.leads).await;
    Ok(Json(ScoreLeadsResponse {
        scored_leads,
        summary,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ProcessLeadsRequest {
    /// Score only the first `limit` leads.
    #[serde(default)]
    pub limit: Option<usize>,
}

/// POST /api/v1/leads/process
///
/// Fetches, scores and tags all leads. The body is optional.
pub async fn process_leads(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Option<Json<ProcessLeadsRequest>>,
) -> Result<Json<BatchResult>, AppError> {
    authorize(&state, &headers)?;
    let request = request.map(|Json(r)| r).unwrap_or_default();
    if request.limit == Some(0) {
        return Err(AppError::BadRequest("limit must be at least 1".to_string()));
    }

    tracing::info!("=== Processing leads (limit: {:?}) ===", request.limit);
    let result = state.processor.process_all_leads(request.limit).await?;

    tracing::info!(
        "Processed {} leads: {} tagged, {} high-scoring",
        result.total_leads,
        result.tagged_leads,
        result.high_score_count
    );
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct MoveLeadsRequest {
    pub target_pipeline_id: i64,
    #[serde(default)]
    pub target_status_id: Option<i64>,
}

/// POST /api/v1/leads/move-high-score
///
/// Scores and tags all leads, then moves the high scorers into the target pipeline.
pub async fn move_high_score_leads(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<MoveLeadsRequest>,
) -> Result<Json<MoveReport>, AppError> {
    authorize(&state, &headers)?;
    tracing::info!(
        "=== Moving high-scoring leads to pipeline {} (status: {:?}) ===",
        request.target_pipeline_id,
        request.target_status_id
    );

    let report = state
        .processor
        .move_high_score_leads(request.target_pipeline_id, request.target_status_id)
        .await?;
    Ok(Json(report))
}

/// GET /api/v1/leads/scores/summary
pub async fn scores_summary(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ScoreSummary>, AppError> {
    authorize(&state, &headers)?;
    let summary = state.processor.scores_summary().await?;
    Ok(Json(summary))
}
