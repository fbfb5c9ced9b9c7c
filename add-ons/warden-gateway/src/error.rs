//! Gateway error mapping: one domain error in, one status + JSON body out.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use warden_hydration::HydrationError;
use warden_pdp::PdpError;
use warden_regression::RegressionError;
use warden_ule::UleError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Forbidden(String),
    Conflict(String),
    RateLimited {
        remaining: u32,
        endpoint: String,
    },
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, Json(serde_json::json!({"detail": detail})))
                    .into_response()
            }
            ApiError::NotFound(detail) => {
                (StatusCode::NOT_FOUND, Json(serde_json::json!({"detail": detail})))
                    .into_response()
            }
            ApiError::Forbidden(reason) => (
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({"detail": "Access denied", "reason": reason})),
            )
                .into_response(),
            ApiError::Conflict(detail) => {
                (StatusCode::CONFLICT, Json(serde_json::json!({"detail": detail})))
                    .into_response()
            }
            ApiError::RateLimited { remaining, endpoint } => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({
                    "detail": "Rate limit exceeded",
                    "remaining": remaining,
                    "endpoint": endpoint,
                })),
            )
                .into_response(),
            ApiError::Unavailable(detail) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"detail": detail})),
            )
                .into_response(),
            ApiError::Internal(detail) => {
                tracing::error!(target: "warden::gateway", detail, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({"detail": "internal error"})),
                )
                    .into_response()
            }
        }
    }
}

impl From<PdpError> for ApiError {
    fn from(err: PdpError) -> Self {
        match err {
            PdpError::InvalidInput(msg) => ApiError::BadRequest(msg),
            PdpError::NotFound(msg) => ApiError::NotFound(msg),
            PdpError::Store(err) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<HydrationError> for ApiError {
    fn from(err: HydrationError) -> Self {
        match err {
            HydrationError::NoSources(workspace) => ApiError::BadRequest(format!(
                "no enabled sources for workspace {workspace}"
            )),
            HydrationError::NotFound(msg) => ApiError::NotFound(msg),
            HydrationError::InvalidConfig(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<UleError> for ApiError {
    fn from(err: UleError) -> Self {
        match err {
            UleError::Conflict(msg) => ApiError::Conflict(msg),
            UleError::NotFound(msg) => ApiError::NotFound(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<RegressionError> for ApiError {
    fn from(err: RegressionError) -> Self {
        match err {
            RegressionError::InvalidInput(msg) => ApiError::BadRequest(msg),
            RegressionError::NotFound(msg) => ApiError::NotFound(msg),
            RegressionError::Conflict(msg) => ApiError::Conflict(msg),
            RegressionError::Forbidden(msg) => ApiError::Forbidden(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<warden_core::StoreError> for ApiError {
    fn from(err: warden_core::StoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}
