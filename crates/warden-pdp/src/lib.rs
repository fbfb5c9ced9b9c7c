//! warden-pdp: the policy decision point.
//!
//! Synchronous, fail-fast authorization: rate limiting, content-safety
//! scanning, role/ACL/classification/temporal/geofence rules, and an
//! append-only audit trail. The gateway invokes [`PolicyEngine::evaluate`]
//! once per privileged request.

mod acl_manager;
mod audit_logger;
mod content_scanner;
mod models;
mod policy_engine;
mod rate_limiter;
mod rules;

pub use acl_manager::{role_permissions, AclManager, PERMISSIONS};
pub use audit_logger::{AuditFilter, AuditLogger, AuditStatistics};
pub use content_scanner::{ContentScanner, MlClassifier, PatternRepo};
pub use models::{
    AclEntry, AuditRecord, Decision, PatternType, Policy, PolicyDecision, PolicyRequest,
    PolicyType, ProhibitedPattern, RateCounter, RequestContext, ScanResult, Severity,
};
pub use policy_engine::{PolicyEngine, PolicyRepo};
pub use rate_limiter::{RateLimitConfig, RateLimitStatus, RateLimiter};
pub use rules::{
    ContentProhibitionRule, DataClassificationRule, GeofenceRule, ProjectAccessRule,
    RateLimitRule, RoleBasedRule, Rule, RuleContext, TimeBasedRule,
};

/// PDP errors. Storage failures propagate; invalid inputs map to 400 at the
/// HTTP boundary.
#[derive(Debug, thiserror::Error)]
pub enum PdpError {
    #[error(transparent)]
    Store(#[from] warden_core::StoreError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
}
