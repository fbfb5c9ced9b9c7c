//! PDP resource family: evaluation, ACLs, rate limits, scanning, audit,
//! policy CRUD.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use warden_core::Role;
use warden_pdp::{
    AuditFilter, Decision, Policy, PolicyDecision, PolicyRequest, PolicyType, ScanResult,
};

pub async fn evaluate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PolicyRequest>,
) -> Json<PolicyDecision> {
    Json(state.pdp.evaluate(&request))
}

#[derive(Deserialize)]
pub struct PermissionsQuery {
    project_id: Option<i64>,
}

pub async fn user_permissions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<PermissionsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.principals.get(id)?.is_none() {
        return Err(ApiError::NotFound(format!("principal {id}")));
    }
    let projects = state.pdp.acl_manager.projects_for(id)?;
    let permissions = match query.project_id {
        Some(project_id) => state.pdp.acl_manager.permissions(id, project_id)?,
        None => Vec::new(),
    };
    Ok(Json(serde_json::json!({
        "user_id": id,
        "project_id": query.project_id,
        "permissions": permissions,
        "projects": projects,
    })))
}

#[derive(Deserialize)]
pub struct GrantBody {
    user_id: i64,
    project_id: i64,
    role: Role,
    granted_by: Option<i64>,
    expires_at: Option<DateTime<Utc>>,
}

pub async fn grant_access(
    State(state): State<Arc<AppState>>,
    Json(body): Json<GrantBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let entry = state.pdp.acl_manager.grant(
        body.user_id,
        body.project_id,
        body.role,
        body.granted_by,
        body.expires_at,
    )?;
    Ok((StatusCode::CREATED, Json(serde_json::to_value(entry).unwrap_or_default())))
}

#[derive(Deserialize)]
pub struct RevokeQuery {
    user_id: i64,
    project_id: i64,
}

pub async fn revoke_access(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RevokeQuery>,
) -> Result<StatusCode, ApiError> {
    if state.pdp.acl_manager.revoke(query.user_id, query.project_id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!(
            "no grant for principal {} on project {}",
            query.user_id, query.project_id
        )))
    }
}

pub async fn rate_limit_status(
    State(state): State<Arc<AppState>>,
    Path((user, endpoint)): Path<(i64, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limits = state.pdp.rate_limiter.limits_for(user)?;
    match limits.get(&endpoint) {
        Some(status) => Ok(Json(serde_json::to_value(status).unwrap_or_default())),
        None => {
            let (allowed, remaining) = state.pdp.rate_limiter.check(user, &endpoint)?;
            Ok(Json(serde_json::json!({
                "limit": remaining,
                "current": 0,
                "remaining": remaining,
                "allowed": allowed,
            })))
        }
    }
}

#[derive(Deserialize)]
pub struct ScanBody {
    content: String,
}

pub async fn scan(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ScanBody>,
) -> Json<ScanResult> {
    Json(state.pdp.content_scanner.scan(&body.content))
}

#[derive(Deserialize)]
pub struct AuditQuery {
    user_id: Option<i64>,
    action: Option<String>,
    resource_type: Option<String>,
    decision: Option<Decision>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

pub async fn audit_trail(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let records = state.pdp.audit_logger.query(&AuditFilter {
        principal_id: query.user_id,
        action: query.action,
        resource_type: query.resource_type,
        decision: query.decision,
        since: query.since,
        until: query.until,
        limit: Some(query.limit.unwrap_or(100)),
    })?;
    Ok(Json(serde_json::json!({ "records": records })))
}

pub async fn audit_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = state.pdp.audit_logger.statistics(10)?;
    Ok(Json(serde_json::to_value(stats).unwrap_or_default()))
}

// ---------------------------------------------------------------------------
// Policy CRUD
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct PolicyBody {
    name: String,
    policy_type: PolicyType,
    rules: serde_json::Value,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    priority: i32,
    description: Option<String>,
}

fn default_enabled() -> bool {
    true
}

pub async fn list_policies(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Policy>>, ApiError> {
    Ok(Json(state.pdp.policies().list()?))
}

pub async fn create_policy(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PolicyBody>,
) -> Result<(StatusCode, Json<Policy>), ApiError> {
    let policy = state.pdp.policies().create(
        &body.name,
        body.policy_type,
        body.rules,
        body.enabled,
        body.priority,
        body.description,
    )?;
    state.pdp.refresh_policies()?;
    Ok((StatusCode::CREATED, Json(policy)))
}

pub async fn get_policy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<Policy>, ApiError> {
    state
        .pdp
        .policies()
        .get(id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("policy {id}")))
}

pub async fn update_policy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(body): Json<PolicyBody>,
) -> Result<Json<Policy>, ApiError> {
    let policy = Policy {
        id,
        name: body.name,
        policy_type: body.policy_type,
        rules: body.rules,
        enabled: body.enabled,
        priority: body.priority,
        description: body.description,
    };
    state.pdp.policies().update(&policy)?;
    state.pdp.refresh_policies()?;
    Ok(Json(policy))
}

pub async fn delete_policy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    if state.pdp.policies().delete(id)? {
        state.pdp.refresh_policies()?;
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("policy {id}")))
    }
}
