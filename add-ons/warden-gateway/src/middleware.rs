//! PDP enforcement at the HTTP boundary.
//!
//! Every `/api/*` request passes through here: principal extraction, rate
//! limiting (429), policy evaluation (403), and decision propagation into
//! request extensions for handlers. Public paths and OPTIONS skip the gate.
//! When the policy store is unreadable the middleware logs one warning and
//! degrades to passthrough so a fresh deployment can bootstrap itself.

use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use warden_pdp::{Decision, PolicyRequest, RequestContext};

const PUBLIC_PATHS: [&str; 3] = ["/health", "/", "/favicon.ico"];
const PUBLIC_PREFIXES: [&str; 5] = ["/docs", "/openapi", "/redoc", "/static", "/assets"];

static POLICY_STORE_WARNED: AtomicBool = AtomicBool::new(false);

/// The verdict stored on the request for downstream handlers.
#[derive(Clone)]
pub struct PdpVerdict {
    pub principal_id: i64,
    pub allowed: bool,
    pub reason: String,
}

pub async fn pdp_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS {
        return next.run(request).await;
    }
    let path = request.uri().path().to_string();
    if PUBLIC_PATHS.contains(&path.as_str())
        || PUBLIC_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
    {
        return next.run(request).await;
    }

    // Bootstrap escape hatch: unreadable policy store means passthrough.
    if state.pdp.policies().list().is_err() {
        if !POLICY_STORE_WARNED.swap(true, Ordering::SeqCst) {
            warn!(
                target: "warden::gateway",
                "policy store unreadable; PDP middleware degraded to passthrough"
            );
        }
        return next.run(request).await;
    }

    let Some(principal_id) = extract_principal(request.headers()) else {
        debug!(target: "warden::gateway", path = %path, "no principal header; passing through");
        return next.run(request).await;
    };

    let resource_type = extract_segment(&path).unwrap_or_else(|| "unknown".to_string());
    let endpoint = extract_segment(&path).unwrap_or_else(|| "api".to_string());
    let client_ip = extract_client_ip(request.headers());
    let method = request.method().clone();

    // Rate limit first; denial is cheap and audited as its own decision.
    match state.pdp.rate_limiter.check(principal_id, &endpoint) {
        Ok((true, _)) => {}
        Ok((false, remaining)) => {
            warn!(
                target: "warden::gateway",
                principal = principal_id,
                endpoint = %endpoint,
                "rate limit exceeded"
            );
            if let Err(err) = state.pdp.audit_logger.log(
                Some(principal_id),
                method.as_str(),
                Some(&resource_type),
                None,
                Decision::RateLimitExceeded,
                serde_json::json!({"endpoint": endpoint, "remaining": remaining}),
                client_ip.as_deref(),
            ) {
                warn!(target: "warden::gateway", error = %err, "rate-limit audit write failed");
            }
            return (
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({
                    "detail": "Rate limit exceeded",
                    "remaining": remaining,
                    "endpoint": endpoint,
                })),
            )
                .into_response();
        }
        Err(err) => {
            warn!(target: "warden::gateway", error = %err, "rate limiter unavailable; passing through");
            return next.run(request).await;
        }
    }

    let decision = state.pdp.evaluate(&PolicyRequest {
        principal_id,
        action: action_for_method(&method).to_string(),
        resource_type: resource_type.clone(),
        resource_id: None,
        context: RequestContext {
            endpoint: Some(endpoint),
            path: Some(path.clone()),
            method: Some(method.as_str().to_string()),
            ip_address: client_ip,
            user_agent: request
                .headers()
                .get("user-agent")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            ..Default::default()
        },
    });

    if !decision.allowed {
        warn!(
            target: "warden::gateway",
            principal = principal_id,
            path = %path,
            reason = %decision.reason,
            "access denied"
        );
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({
                "detail": "Access denied",
                "reason": decision.reason,
            })),
        )
            .into_response();
    }

    let mut request = request;
    request.extensions_mut().insert(PdpVerdict {
        principal_id,
        allowed: true,
        reason: decision.reason,
    });
    next.run(request).await
}

/// Maps HTTP verbs onto the permission atoms the role expansion uses.
fn action_for_method(method: &Method) -> &'static str {
    match *method {
        Method::GET | Method::HEAD => "read",
        Method::DELETE => "delete",
        _ => "write",
    }
}

fn extract_principal(headers: &HeaderMap) -> Option<i64> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Second path segment when the first is `api`.
fn extract_segment(path: &str) -> Option<String> {
    let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
    if parts.len() >= 2 && parts[0] == "api" {
        Some(parts[1].to_string())
    } else {
        None
    }
}

fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return Some(first.to_string());
            }
        }
    }
    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_come_from_api_paths() {
        assert_eq!(extract_segment("/api/hydration/run-now"), Some("hydration".into()));
        assert_eq!(extract_segment("/api/pdp/evaluate"), Some("pdp".into()));
        assert_eq!(extract_segment("/health"), None);
        assert_eq!(extract_segment("/other/path"), None);
    }

    #[test]
    fn forwarded_for_takes_priority_over_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.1, 10.0.0.2".parse().unwrap());
        headers.insert("x-real-ip", "192.168.0.9".parse().unwrap());
        assert_eq!(extract_client_ip(&headers), Some("10.0.0.1".to_string()));
        headers.remove("x-forwarded-for");
        assert_eq!(extract_client_ip(&headers), Some("192.168.0.9".to_string()));
    }

    #[test]
    fn principal_header_must_be_an_integer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", "42".parse().unwrap());
        assert_eq!(extract_principal(&headers), Some(42));
        headers.insert("x-user-id", "not-a-number".parse().unwrap());
        assert_eq!(extract_principal(&headers), None);
    }
}
