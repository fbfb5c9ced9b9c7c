//! Hydration resource family: status, run-now, runs, sources, alerts.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use warden_hydration::{enqueue_hydration_job, SourceType, WorkspaceSource};

#[derive(Deserialize)]
pub struct WorkspaceQuery {
    workspace_id: String,
}

pub async fn status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WorkspaceQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let sources = state
        .pipeline
        .sources()
        .enabled_for_workspace(&query.workspace_id)?;
    let mut statuses = Vec::new();
    for source in &sources {
        let source_state = state.pipeline.states().get(source.id)?;
        statuses.push(serde_json::json!({
            "source": source,
            "state": source_state,
        }));
    }
    Ok(Json(serde_json::json!({
        "workspace_id": query.workspace_id,
        "sources": statuses,
    })))
}

#[derive(Deserialize)]
pub struct RunNowBody {
    workspace_id: String,
    source_ids: Option<Vec<u64>>,
    user_id: Option<i64>,
}

/// Queue a hydration run; the queue worker picks it up with `trigger=api`.
pub async fn run_now(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RunNowBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    // Reject before queuing when the workspace has nothing to hydrate.
    let sources = state
        .pipeline
        .sources()
        .enabled_for_workspace(&body.workspace_id)?;
    if sources.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "no enabled sources for workspace {}",
            body.workspace_id
        )));
    }

    let correlation_id = Uuid::new_v4().to_string();
    let seq = enqueue_hydration_job(
        &state.queue,
        &body.workspace_id,
        body.source_ids,
        body.user_id,
        &correlation_id,
    )
    .map_err(|err| ApiError::Unavailable(format!("hydration queue unavailable: {err}")))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "queued": true,
            "job": seq,
            "correlation_id": correlation_id,
        })),
    ))
}

#[derive(Deserialize)]
pub struct RunsQuery {
    workspace_id: Option<String>,
    limit: Option<usize>,
}

pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let runs = state
        .pipeline
        .runs()
        .list(query.workspace_id.as_deref(), query.limit.unwrap_or(50))?;
    Ok(Json(serde_json::json!({ "runs": runs })))
}

pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let run = state
        .pipeline
        .runs()
        .get(id)?
        .ok_or_else(|| ApiError::NotFound(format!("run {id}")))?;
    Ok(Json(serde_json::to_value(run).unwrap_or_default()))
}

pub async fn run_items(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.pipeline.runs().get(id)?.is_none() {
        return Err(ApiError::NotFound(format!("run {id}")));
    }
    let items = state.pipeline.runs().items(id)?;
    Ok(Json(serde_json::json!({ "items": items })))
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct SourcesQuery {
    workspace_id: Option<String>,
}

pub async fn list_sources(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SourcesQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut sources = state.pipeline.sources().list()?;
    if let Some(workspace_id) = &query.workspace_id {
        sources.retain(|s| &s.workspace_id == workspace_id);
    }
    Ok(Json(serde_json::json!({ "sources": sources })))
}

#[derive(Deserialize)]
pub struct SourceBody {
    workspace_id: String,
    source_type: SourceType,
    name: String,
    config: serde_json::Value,
    secrets_ref: Option<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

pub async fn create_source(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SourceBody>,
) -> Result<(StatusCode, Json<WorkspaceSource>), ApiError> {
    let source = state.pipeline.sources().create(
        &body.workspace_id,
        body.source_type,
        &body.name,
        body.config,
        body.secrets_ref,
        body.enabled,
    )?;
    Ok((StatusCode::CREATED, Json(source)))
}

pub async fn update_source(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(body): Json<SourceBody>,
) -> Result<Json<WorkspaceSource>, ApiError> {
    let source = WorkspaceSource {
        id,
        workspace_id: body.workspace_id,
        source_type: body.source_type,
        name: body.name,
        config: body.config,
        secrets_ref: body.secrets_ref,
        enabled: body.enabled,
    };
    state.pipeline.sources().update(&source)?;
    Ok(Json(source))
}

pub async fn delete_source(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    if state.pipeline.sources().delete(id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("source {id}")))
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct AlertsQuery {
    workspace_id: Option<String>,
    #[serde(default)]
    include_acknowledged: bool,
    limit: Option<usize>,
}

pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AlertsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let alerts = state.pipeline.alerts().list(
        query.workspace_id.as_deref(),
        !query.include_acknowledged,
        query.limit.unwrap_or(50),
    )?;
    Ok(Json(serde_json::json!({ "alerts": alerts })))
}

#[derive(Deserialize)]
pub struct AcknowledgeBody {
    user_id: i64,
}

pub async fn acknowledge_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(body): Json<AcknowledgeBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let alert = state.pipeline.alerts().acknowledge(id, body.user_id)?;
    Ok(Json(serde_json::to_value(alert).unwrap_or_default()))
}
