//! Regression resource family: promotion lifecycle and thresholds.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use warden_regression::{PromotionRequest, RegressionCheck, RegressionThreshold};

#[derive(Deserialize)]
pub struct CreateRequestBody {
    component: String,
    candidate_tag: String,
    workspace_id: Option<String>,
    requested_by: Option<i64>,
}

pub async fn create_request(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateRequestBody>,
) -> Result<(StatusCode, Json<PromotionRequest>), ApiError> {
    let request = state.guard.create_request(
        &body.component,
        &body.candidate_tag,
        body.workspace_id.as_deref(),
        body.requested_by,
    )?;
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn list_requests(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let requests = state.guard.list_requests()?;
    Ok(Json(serde_json::json!({ "requests": requests })))
}

pub async fn run_check(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<RegressionCheck>, ApiError> {
    Ok(Json(state.guard.run_check(id)?))
}

#[derive(Deserialize)]
pub struct ApproveBody {
    approved_by: i64,
}

pub async fn approve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(body): Json<ApproveBody>,
) -> Result<Json<PromotionRequest>, ApiError> {
    Ok(Json(state.guard.approve(id, body.approved_by)?))
}

#[derive(Deserialize)]
pub struct PromoteBody {
    actor_id: i64,
}

pub async fn promote(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(body): Json<PromoteBody>,
) -> Result<Json<PromotionRequest>, ApiError> {
    Ok(Json(state.guard.promote(id, body.actor_id)?))
}

#[derive(Deserialize)]
pub struct ThresholdsBody {
    updated_by: i64,
    min_threshold: Option<f64>,
    max_drop: Option<f64>,
    enabled: Option<bool>,
}

pub async fn update_thresholds(
    State(state): State<Arc<AppState>>,
    Path(component): Path<String>,
    Json(body): Json<ThresholdsBody>,
) -> Result<Json<RegressionThreshold>, ApiError> {
    Ok(Json(state.guard.update_thresholds(
        &component,
        body.updated_by,
        body.min_threshold,
        body.max_drop,
        body.enabled,
    )?))
}
