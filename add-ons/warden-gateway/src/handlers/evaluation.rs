//! Evaluation resource family: run suites and inspect run history.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use warden_regression::EvalRun;

#[derive(Deserialize)]
pub struct RunSuiteBody {
    #[serde(default = "default_tag")]
    tag: String,
    workspace_id: Option<String>,
}

fn default_tag() -> String {
    "baseline:v1".to_string()
}

pub async fn run_suite(
    State(state): State<Arc<AppState>>,
    Path(suite): Path<String>,
    Json(body): Json<RunSuiteBody>,
) -> Result<Json<EvalRun>, ApiError> {
    let run = state
        .harness
        .run_suite(&suite, &body.tag, body.workspace_id.as_deref())?;
    Ok(Json(run))
}

#[derive(Deserialize)]
pub struct RunsQuery {
    limit: Option<usize>,
}

pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let runs = state.harness.list_runs(query.limit.unwrap_or(50))?;
    Ok(Json(serde_json::json!({ "runs": runs })))
}

pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<EvalRun>, ApiError> {
    state
        .harness
        .get_run(id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("evaluation run {id}")))
}

pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let alerts = state.harness.list_alerts(50)?;
    Ok(Json(serde_json::json!({ "alerts": alerts })))
}
