//! HTTP handlers, one module per resource family.

pub mod evaluation;
pub mod hydration;
pub mod pdp;
pub mod reasoning;
pub mod regression;

use crate::middleware::pdp_middleware;
use crate::state::AppState;
use axum::routing::{delete, get, post, put};
use axum::Router;
use std::sync::Arc;

/// The full gateway router with the PDP middleware on the `/api` tree.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        // PDP
        .route("/pdp/evaluate", post(pdp::evaluate))
        .route("/pdp/users/:id/permissions", get(pdp::user_permissions))
        .route("/pdp/access/grant", post(pdp::grant_access))
        .route("/pdp/access/revoke", delete(pdp::revoke_access))
        .route("/pdp/rate-limit/:user/:endpoint", get(pdp::rate_limit_status))
        .route("/pdp/scan", post(pdp::scan))
        .route("/pdp/audit-trail", get(pdp::audit_trail))
        .route("/pdp/audit-trail/stats", get(pdp::audit_stats))
        .route("/pdp/policies", get(pdp::list_policies).post(pdp::create_policy))
        .route(
            "/pdp/policies/:id",
            get(pdp::get_policy).put(pdp::update_policy).delete(pdp::delete_policy),
        )
        // Hydration
        .route("/hydration/status", get(hydration::status))
        .route("/hydration/run-now", post(hydration::run_now))
        .route("/hydration/runs", get(hydration::list_runs))
        .route("/hydration/runs/:id", get(hydration::get_run))
        .route("/hydration/runs/:id/items", get(hydration::run_items))
        .route(
            "/hydration/sources",
            get(hydration::list_sources).post(hydration::create_source),
        )
        .route(
            "/hydration/sources/:id",
            put(hydration::update_source).delete(hydration::delete_source),
        )
        .route("/hydration/alerts", get(hydration::list_alerts))
        .route("/hydration/alerts/:id/acknowledge", post(hydration::acknowledge_alert))
        // Reasoning (ULE)
        .route("/reasoning/link", post(reasoning::link))
        .route("/reasoning/process", post(reasoning::process))
        .route("/reasoning/links/:document_id", get(reasoning::links_for_document))
        .route("/reasoning/evidence/:link_id", get(reasoning::evidence))
        .route("/reasoning/packs", get(reasoning::packs))
        .route("/reasoning/stats", get(reasoning::stats))
        // Regression
        .route(
            "/regression/requests",
            get(regression::list_requests).post(regression::create_request),
        )
        .route("/regression/requests/:id/run-check", post(regression::run_check))
        .route("/regression/requests/:id/approve", post(regression::approve))
        .route("/regression/requests/:id/promote", post(regression::promote))
        .route("/regression/thresholds/:component", put(regression::update_thresholds))
        // Evaluation
        .route("/evaluation/run/:suite", post(evaluation::run_suite))
        .route("/evaluation/runs", get(evaluation::list_runs))
        .route("/evaluation/runs/:id", get(evaluation::get_run))
        .route("/evaluation/alerts", get(evaluation::list_alerts));

    Router::new()
        .nest("/api", api)
        .route("/health", get(health))
        .layer(axum::middleware::from_fn_with_state(state.clone(), pdp_middleware))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({"status": "ok"}))
}
