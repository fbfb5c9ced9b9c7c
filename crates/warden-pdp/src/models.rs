//! PDP record and wire types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_core::Role;

/// Policy families, evaluated in priority order by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyType {
    Rbac,
    Abac,
    Content,
    RateLimit,
    DataClassification,
    Temporal,
}

/// A stored policy row. `rules` carries the type-specific configuration
/// (e.g. allowed hours for temporal policies).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: u64,
    pub name: String,
    pub policy_type: PolicyType,
    pub rules: serde_json::Value,
    pub enabled: bool,
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Fixed-window rate counter row for one (principal, endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateCounter {
    pub principal_id: i64,
    pub endpoint: String,
    pub limit: u32,
    pub window_seconds: i64,
    pub current_count: u32,
    pub window_start: DateTime<Utc>,
}

/// Categories of prohibited content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Pii,
    SqlInjection,
    Xss,
    CommandInjection,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Pii => "pii",
            PatternType::SqlInjection => "sql_injection",
            PatternType::Xss => "xss",
            PatternType::CommandInjection => "command_injection",
        }
    }
}

/// Severity ladder for content violations. Ordered so `max` works.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// A runtime-managed prohibited pattern. Invalid regexes are skipped with a
/// warning when merged into the scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProhibitedPattern {
    pub id: u64,
    pub pattern_type: PatternType,
    pub pattern_regex: String,
    pub severity: Severity,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Result of a content scan. `sanitized_text` is present only when
/// violations were found.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub safe: bool,
    #[serde(default)]
    pub violations: Vec<String>,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sanitized_text: Option<String>,
    #[serde(default)]
    pub details: std::collections::BTreeMap<String, String>,
}

/// One ACL entry: at most one per (principal, project).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclEntry {
    pub id: u64,
    pub principal_id: i64,
    pub project_id: i64,
    pub role: Role,
    pub permissions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granted_by: Option<i64>,
    pub granted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl AclEntry {
    /// Expired entries are treated as absent for all reads.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at < now).unwrap_or(false)
    }
}

/// Audit decision taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny,
    RateLimitExceeded,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Deny => "deny",
            Decision::RateLimitExceeded => "rate_limit_exceeded",
        }
    }
}

/// Append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<i64>,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    pub decision: Decision,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Recognized context keys, with an `extra` map for forward compatibility.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A policy evaluation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRequest {
    pub principal_id: i64,
    pub action: String,
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub context: RequestContext,
}

/// The engine's verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: String,
    #[serde(default)]
    pub conditions: Vec<String>,
    pub audit_required: bool,
}

impl PolicyDecision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            conditions: Vec::new(),
            audit_required: true,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            conditions: Vec::new(),
            audit_required: true,
        }
    }

    pub fn with_conditions(mut self, conditions: Vec<String>) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn quiet(mut self) -> Self {
        self.audit_required = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_by_escalation() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
        assert_eq!(Severity::Medium.max(Severity::Critical), Severity::Critical);
    }

    #[test]
    fn context_extra_keys_round_trip() {
        let raw = serde_json::json!({
            "project_id": 101,
            "endpoint": "chat",
            "tenant_tier": "gold"
        });
        let ctx: RequestContext = serde_json::from_value(raw).unwrap();
        assert_eq!(ctx.project_id, Some(101));
        assert_eq!(ctx.extra.get("tenant_tier").and_then(|v| v.as_str()), Some("gold"));
    }

    #[test]
    fn expired_entries_read_as_absent() {
        let entry = AclEntry {
            id: 1,
            principal_id: 2,
            project_id: 3,
            role: Role::Viewer,
            permissions: vec!["read".into()],
            granted_by: None,
            granted_at: Utc::now(),
            expires_at: Some(Utc::now() - chrono::Duration::hours(1)),
        };
        assert!(entry.is_expired(Utc::now()));
    }
}
