//! Promotion records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a promotion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Requested,
    Running,
    Pass,
    Fail,
    Approved,
    Promoted,
}

/// A request to promote `candidate_tag` over `baseline_tag` for a component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionRequest {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    pub component: String,
    pub baseline_tag: String,
    pub candidate_tag: String,
    pub status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One baseline-vs-candidate comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionCheck {
    pub id: u64,
    pub request_id: u64,
    pub suite_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_run_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_run_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_score: Option<f64>,
    pub min_threshold: f64,
    pub max_drop: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drop_value: Option<f64>,
    pub passed: bool,
    #[serde(default)]
    pub report: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Per-component gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionThreshold {
    pub component: String,
    pub suite_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_threshold: Option<f64>,
    pub max_drop: f64,
    pub enabled: bool,
}

/// The active tag for a component; swapped atomically on promotion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentComponentVersion {
    pub component: String,
    pub current_tag: String,
}
