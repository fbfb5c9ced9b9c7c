//! Gateway behavior through the full router: public paths, PDP enforcement,
//! status-code mapping, and the queued run-now flow.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::util::ServiceExt;
use warden_core::{CoreConfig, Principal, Role, Store};
use warden_gateway::{build_state, handlers, seed_defaults, AppState};
use warden_pdp::{AuditFilter, Decision};

async fn app() -> (Router, Arc<AppState>) {
    let store = Store::temp().unwrap();
    let state = build_state(CoreConfig::default(), store).unwrap();
    seed_defaults(&state).unwrap();
    // A viewer for denial cases.
    state
        .principals
        .upsert(&Principal {
            id: 3,
            name: "Read Only".into(),
            email: "viewer@example.com".into(),
            role: Role::Viewer,
        })
        .unwrap();
    (handlers::router(state.clone()), state)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
}

fn get(path: &str, user: Option<i64>) -> Request<Body> {
    let mut builder = Request::builder().uri(path).method("GET");
    if let Some(user) = user {
        builder = builder.header("x-user-id", user.to_string());
    }
    builder.body(Body::empty()).unwrap()
}

fn post_json(path: &str, user: Option<i64>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .uri(path)
        .method("POST")
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header("x-user-id", user.to_string());
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let (app, _state) = app().await;
    let response = app.oneshot(get("/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn missing_principal_header_passes_through() {
    let (app, _state) = app().await;
    let response = app.oneshot(get("/api/reasoning/packs", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["packs"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn admin_reads_pass_the_middleware() {
    let (app, _state) = app().await;
    let response = app.oneshot(get("/api/reasoning/stats", Some(1))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn viewer_writes_are_forbidden_with_a_reason() {
    let (app, _state) = app().await;
    let response = app
        .oneshot(post_json(
            "/api/pdp/scan",
            Some(3),
            serde_json::json!({"content": "anything"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["detail"], "Access denied");
    assert!(body["reason"].as_str().unwrap().contains("RBAC denied"));
}

#[tokio::test]
async fn exhausted_budget_returns_429_and_audits_it() {
    let (app, state) = app().await;
    for _ in 0..100 {
        state.pdp.rate_limiter.increment(1, "pdp").unwrap();
    }
    let response = app.oneshot(get("/api/pdp/policies", Some(1))).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(response).await;
    assert_eq!(body["detail"], "Rate limit exceeded");
    assert_eq!(body["endpoint"], "pdp");
    assert_eq!(body["remaining"], 0);

    let records = state
        .pdp
        .audit_logger
        .query(&AuditFilter {
            decision: Some(Decision::RateLimitExceeded),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn pdp_evaluate_round_trips() {
    let (app, _state) = app().await;
    let response = app
        .oneshot(post_json(
            "/api/pdp/evaluate",
            Some(1),
            serde_json::json!({
                "principal_id": 1,
                "action": "read",
                "resource_type": "document",
                "resource_id": "1",
                "context": {"project_id": 101}
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["allowed"], true);
    assert!(body["reason"].as_str().unwrap().contains("Access granted"));
}

#[tokio::test]
async fn scan_reports_violations_for_malicious_content() {
    let (app, _state) = app().await;
    let response = app
        .oneshot(post_json(
            "/api/pdp/scan",
            Some(1),
            serde_json::json!({"content": "'; DROP TABLE users;--"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["safe"], false);
    assert!(body["sanitized_text"].as_str().is_some());
}

#[tokio::test]
async fn run_now_without_sources_is_a_400_naming_the_workspace() {
    let (app, _state) = app().await;
    let response = app
        .oneshot(post_json(
            "/api/hydration/run-now",
            Some(1),
            serde_json::json!({"workspace_id": "ws-missing"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["detail"].as_str().unwrap().contains("ws-missing"));
}

#[tokio::test]
async fn run_now_queues_with_a_correlation_id() {
    let (app, state) = app().await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
    state
        .pipeline
        .sources()
        .create(
            "ws1",
            warden_hydration::SourceType::ServerFs,
            "share",
            serde_json::json!({"root": dir.path().to_string_lossy()}),
            None,
            true,
        )
        .unwrap();

    let response = app
        .oneshot(post_json(
            "/api/hydration/run-now",
            Some(1),
            serde_json::json!({"workspace_id": "ws1", "user_id": 1}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["queued"], true);
    assert!(body["correlation_id"].as_str().is_some());
    assert_eq!(state.queue.len().unwrap(), 1);
}

#[tokio::test]
async fn unknown_ids_map_to_404_and_unknown_suites_to_400() {
    let (app, _state) = app().await;
    let response = app
        .clone()
        .oneshot(get("/api/hydration/runs/999", Some(1)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(post_json(
            "/api/evaluation/run/mystery-suite",
            Some(1),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn regression_requests_flow_through_the_api() {
    let (app, state) = app().await;
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/regression/requests",
            Some(1),
            serde_json::json!({
                "component": "tool_router",
                "candidate_tag": "candidate:v3",
                "requested_by": 1
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let id = created["id"].as_u64().unwrap();
    assert_eq!(created["status"], "requested");
    assert_eq!(created["baseline_tag"], "baseline:v1");

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/regression/requests/{id}/run-check"),
            Some(1),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let check = body_json(response).await;
    assert_eq!(check["passed"], true);

    // Promotion before approval is a conflict.
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/regression/requests/{id}/promote"),
            Some(1),
            serde_json::json!({"actor_id": 1}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Non-admin approval is forbidden.
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/regression/requests/{id}/approve"),
            Some(1),
            serde_json::json!({"approved_by": 3}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Admin approval, then promotion, swaps the active tag.
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/regression/requests/{id}/approve"),
            Some(1),
            serde_json::json!({"approved_by": 1}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(post_json(
            &format!("/api/regression/requests/{id}/promote"),
            Some(1),
            serde_json::json!({"actor_id": 1}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        state.guard.current_version("tool_router").unwrap().unwrap(),
        "candidate:v3"
    );
}

#[tokio::test]
async fn reasoning_process_then_links_subset() {
    let (app, _state) = app().await;
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/reasoning/process",
            Some(1),
            serde_json::json!({
                "document_id": "spec-9",
                "document_name": "spec.pdf",
                "content": "SECTION 03300 - Cast-in-Place Concrete\nconcrete for all columns",
                "document_type": "spec"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let processed = body_json(response).await;
    assert!(processed["total_entities_processed"].as_u64().unwrap() >= 1);

    let response = app
        .oneshot(get("/api/reasoning/links/spec-9", Some(1)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
