//! Composable policy rules.
//!
//! Each rule is a pure check over `(request, context) -> (allowed, reason)`.
//! Rules never cascade into each other; ordering is the engine's job.

use crate::acl_manager::{role_permissions, AclManager};
use crate::content_scanner::ContentScanner;
use crate::models::PolicyRequest;
use crate::rate_limiter::RateLimiter;
use crate::PdpError;
use chrono::{Datelike, Timelike, Utc};
use chrono_tz::Tz;
use warden_core::{PrincipalRepo, Role};

/// Repositories and engines the rules consult.
pub struct RuleContext<'a> {
    pub principals: &'a PrincipalRepo,
    pub acls: &'a AclManager,
    pub rate_limiter: &'a RateLimiter,
    pub scanner: &'a ContentScanner,
}

/// A single policy rule.
pub trait Rule: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(
        &self,
        request: &PolicyRequest,
        ctx: &RuleContext<'_>,
    ) -> Result<(bool, String), PdpError>;
}

// ---------------------------------------------------------------------------
// Role-based access
// ---------------------------------------------------------------------------

/// Allows an action when the principal's global role grants it (admin holds
/// the `*` wildcard).
#[derive(Debug, Default)]
pub struct RoleBasedRule;

impl Rule for RoleBasedRule {
    fn name(&self) -> &'static str {
        "role_based"
    }

    fn evaluate(
        &self,
        request: &PolicyRequest,
        ctx: &RuleContext<'_>,
    ) -> Result<(bool, String), PdpError> {
        let Some(principal) = ctx.principals.get(request.principal_id)? else {
            return Ok((false, "User not found".to_string()));
        };
        let action = request.action.to_lowercase();
        let role = principal.role;

        if role == Role::Admin {
            return Ok((true, format!("Role '{role}' has all permissions")));
        }
        if role_permissions(role).contains(&action.as_str()) {
            return Ok((true, format!("Action '{action}' allowed for role '{role}'")));
        }
        Ok((
            false,
            format!("Role '{role}' not authorized for action '{action}'"),
        ))
    }
}

// ---------------------------------------------------------------------------
// Project access (ACL)
// ---------------------------------------------------------------------------

/// Denies when a project context is present and the principal has neither a
/// live grant nor a global admin/director role.
#[derive(Debug, Default)]
pub struct ProjectAccessRule;

impl Rule for ProjectAccessRule {
    fn name(&self) -> &'static str {
        "project_access"
    }

    fn evaluate(
        &self,
        request: &PolicyRequest,
        ctx: &RuleContext<'_>,
    ) -> Result<(bool, String), PdpError> {
        let Some(project_id) = request.context.project_id else {
            let principal = ctx.principals.get(request.principal_id)?;
            if principal.map(|p| p.role == Role::Admin).unwrap_or(false) {
                return Ok((true, "Admin has global access".to_string()));
            }
            return Ok((false, "No project context provided".to_string()));
        };

        if let Some(entry) = ctx.acls.raw_entry(request.principal_id, project_id)? {
            if entry.is_expired(Utc::now()) {
                return Ok((false, "Access expired".to_string()));
            }
            return Ok((
                true,
                format!("User has '{}' access to project", entry.role),
            ));
        }

        if let Some(principal) = ctx.principals.get(request.principal_id)? {
            if matches!(principal.role, Role::Admin | Role::Director) {
                return Ok((
                    true,
                    format!("User role '{}' has global access", principal.role),
                ));
            }
        }
        Ok((false, "No access to project".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Data classification
// ---------------------------------------------------------------------------

fn classification_level(name: &str) -> i32 {
    match name {
        "public" => 0,
        "internal" => 1,
        "confidential" => 2,
        "restricted" => 3,
        _ => 0,
    }
}

fn role_clearance(role: Role) -> &'static str {
    match role {
        Role::Admin => "restricted",
        Role::Director => "confidential",
        Role::Engineer | Role::Commercial | Role::SafetyOfficer => "internal",
        Role::Viewer => "public",
    }
}

/// Allows iff the principal's clearance level covers the resource's
/// classification (`context.classification`, default internal).
#[derive(Debug, Default)]
pub struct DataClassificationRule;

impl Rule for DataClassificationRule {
    fn name(&self) -> &'static str {
        "data_classification"
    }

    fn evaluate(
        &self,
        request: &PolicyRequest,
        ctx: &RuleContext<'_>,
    ) -> Result<(bool, String), PdpError> {
        let Some(principal) = ctx.principals.get(request.principal_id)? else {
            return Ok((false, "User not found".to_string()));
        };
        let user_clearance = role_clearance(principal.role);
        let resource_classification = request
            .context
            .classification
            .as_deref()
            .unwrap_or("internal");

        let user_level = classification_level(user_clearance);
        // Unknown classification names read as internal.
        let resource_level = match resource_classification {
            "public" | "internal" | "confidential" | "restricted" => {
                classification_level(resource_classification)
            }
            _ => 1,
        };

        if user_level >= resource_level {
            Ok((
                true,
                format!("User clearance '{user_clearance}' sufficient for '{resource_classification}'"),
            ))
        } else {
            Ok((
                false,
                format!(
                    "Insufficient clearance: user has '{user_clearance}', resource requires '{resource_classification}'"
                ),
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Temporal access
// ---------------------------------------------------------------------------

/// Allows only inside the configured hours and weekdays, evaluated in the
/// configured zone (default UTC, all hours, all days).
#[derive(Debug, Clone)]
pub struct TimeBasedRule {
    pub allowed_hours: Vec<u32>,
    pub allowed_days: Vec<u32>,
    pub zone: Tz,
}

impl Default for TimeBasedRule {
    fn default() -> Self {
        Self {
            allowed_hours: (0..24).collect(),
            allowed_days: (0..7).collect(),
            zone: Tz::UTC,
        }
    }
}

impl Rule for TimeBasedRule {
    fn name(&self) -> &'static str {
        "time_based"
    }

    fn evaluate(
        &self,
        _request: &PolicyRequest,
        _ctx: &RuleContext<'_>,
    ) -> Result<(bool, String), PdpError> {
        let now = Utc::now().with_timezone(&self.zone);
        let current_hour = now.hour();
        let current_day = now.weekday().num_days_from_monday();

        if !self.allowed_hours.contains(&current_hour) {
            return Ok((
                false,
                format!("Access denied: outside allowed hours (current hour: {current_hour})"),
            ));
        }
        if !self.allowed_days.contains(&current_day) {
            return Ok((
                false,
                format!("Access denied: outside allowed days (current day: {current_day})"),
            ));
        }
        Ok((true, "Within allowed time window".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Geofence
// ---------------------------------------------------------------------------

/// Prefix-matches `context.ip_address` against a block list and an optional
/// allow list. Absence of an IP allows the request.
#[derive(Debug, Clone, Default)]
pub struct GeofenceRule {
    pub allowed_prefixes: Vec<String>,
    pub blocked_prefixes: Vec<String>,
}

impl Rule for GeofenceRule {
    fn name(&self) -> &'static str {
        "geofence"
    }

    fn evaluate(
        &self,
        request: &PolicyRequest,
        _ctx: &RuleContext<'_>,
    ) -> Result<(bool, String), PdpError> {
        let Some(ip) = request.context.ip_address.as_deref() else {
            return Ok((true, "No IP address to check".to_string()));
        };
        if self.blocked_prefixes.iter().any(|p| ip.starts_with(p)) {
            return Ok((false, format!("IP address {ip} is blocked")));
        }
        if !self.allowed_prefixes.is_empty()
            && !self.allowed_prefixes.iter().any(|p| ip.starts_with(p))
        {
            return Ok((false, format!("IP address {ip} not in allowlist")));
        }
        Ok((true, "IP address allowed".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Rate limit + content wrappers
// ---------------------------------------------------------------------------

/// Wraps the rate limiter as a chain rule: checks, then consumes one unit.
#[derive(Debug, Default)]
pub struct RateLimitRule;

impl Rule for RateLimitRule {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn evaluate(
        &self,
        request: &PolicyRequest,
        ctx: &RuleContext<'_>,
    ) -> Result<(bool, String), PdpError> {
        let endpoint = request
            .context
            .endpoint
            .clone()
            .unwrap_or_else(|| request.resource_type.clone());
        let (allowed, _remaining) = ctx.rate_limiter.check(request.principal_id, &endpoint)?;
        if !allowed {
            return Ok((false, format!("Rate limit exceeded for endpoint '{endpoint}'")));
        }
        let count = ctx.rate_limiter.increment(request.principal_id, &endpoint)?;
        Ok((true, format!("Rate limit OK (count {count})")))
    }
}

/// Wraps the content scanner as a chain rule.
#[derive(Debug, Default)]
pub struct ContentProhibitionRule;

impl Rule for ContentProhibitionRule {
    fn name(&self) -> &'static str {
        "content_prohibition"
    }

    fn evaluate(
        &self,
        request: &PolicyRequest,
        ctx: &RuleContext<'_>,
    ) -> Result<(bool, String), PdpError> {
        let Some(content) = request.context.content.as_deref() else {
            return Ok((true, "No content to scan".to_string()));
        };
        if content.is_empty() {
            return Ok((true, "No content to scan".to_string()));
        }
        let result = ctx.scanner.scan(content);
        if result.safe {
            Ok((true, "Content scan passed".to_string()))
        } else {
            Ok((
                false,
                format!("Prohibited content detected: {}", result.violations.join(", ")),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RequestContext;
    use warden_core::{Principal, Project, ProjectRepo, Store};

    struct Fixture {
        principals: PrincipalRepo,
        acls: AclManager,
        rate_limiter: RateLimiter,
        scanner: ContentScanner,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Store::temp().unwrap();
            let principals = PrincipalRepo::new(store.clone());
            for (id, role) in [(1, Role::Admin), (2, Role::Engineer), (3, Role::Viewer)] {
                principals
                    .upsert(&Principal {
                        id,
                        name: format!("user-{id}"),
                        email: format!("user{id}@example.com"),
                        role,
                    })
                    .unwrap();
            }
            ProjectRepo::new(store.clone())
                .upsert(&Project {
                    id: 101,
                    name: "North Tower".into(),
                })
                .unwrap();
            Self {
                principals,
                acls: AclManager::new(store.clone()),
                rate_limiter: RateLimiter::new(store.clone()),
                scanner: ContentScanner::new(),
            }
        }

        fn ctx(&self) -> RuleContext<'_> {
            RuleContext {
                principals: &self.principals,
                acls: &self.acls,
                rate_limiter: &self.rate_limiter,
                scanner: &self.scanner,
            }
        }
    }

    fn request(principal_id: i64, action: &str, context: RequestContext) -> PolicyRequest {
        PolicyRequest {
            principal_id,
            action: action.to_string(),
            resource_type: "document".to_string(),
            resource_id: None,
            context,
        }
    }

    #[test]
    fn role_rule_grants_admin_everything() {
        let fixture = Fixture::new();
        let (allowed, reason) = RoleBasedRule
            .evaluate(&request(1, "delete", RequestContext::default()), &fixture.ctx())
            .unwrap();
        assert!(allowed);
        assert!(reason.contains("admin"));
    }

    #[test]
    fn role_rule_denies_out_of_role_actions() {
        let fixture = Fixture::new();
        let (allowed, _) = RoleBasedRule
            .evaluate(&request(3, "write", RequestContext::default()), &fixture.ctx())
            .unwrap();
        assert!(!allowed);
        let (allowed, _) = RoleBasedRule
            .evaluate(&request(2, "execute", RequestContext::default()), &fixture.ctx())
            .unwrap();
        assert!(allowed);
        let (allowed, reason) = RoleBasedRule
            .evaluate(&request(99, "read", RequestContext::default()), &fixture.ctx())
            .unwrap();
        assert!(!allowed);
        assert_eq!(reason, "User not found");
    }

    #[test]
    fn project_rule_uses_grants_and_global_roles() {
        let fixture = Fixture::new();
        let with_project = RequestContext {
            project_id: Some(101),
            ..Default::default()
        };
        // Engineer without a grant is refused.
        let (allowed, reason) = ProjectAccessRule
            .evaluate(&request(2, "read", with_project.clone()), &fixture.ctx())
            .unwrap();
        assert!(!allowed);
        assert_eq!(reason, "No access to project");
        // Grant it, and access follows.
        fixture.acls.grant(2, 101, Role::Engineer, Some(1), None).unwrap();
        let (allowed, reason) = ProjectAccessRule
            .evaluate(&request(2, "read", with_project.clone()), &fixture.ctx())
            .unwrap();
        assert!(allowed);
        assert!(reason.contains("engineer"));
        // Admin passes without a grant.
        let (allowed, _) = ProjectAccessRule
            .evaluate(&request(1, "read", with_project), &fixture.ctx())
            .unwrap();
        assert!(allowed);
    }

    #[test]
    fn project_rule_reports_expired_access() {
        let fixture = Fixture::new();
        fixture
            .acls
            .grant(
                3,
                101,
                Role::Viewer,
                None,
                Some(Utc::now() - chrono::Duration::minutes(5)),
            )
            .unwrap();
        let (allowed, reason) = ProjectAccessRule
            .evaluate(
                &request(
                    3,
                    "read",
                    RequestContext {
                        project_id: Some(101),
                        ..Default::default()
                    },
                ),
                &fixture.ctx(),
            )
            .unwrap();
        assert!(!allowed);
        assert_eq!(reason, "Access expired");
    }

    #[test]
    fn classification_rule_compares_levels() {
        let fixture = Fixture::new();
        let restricted = RequestContext {
            classification: Some("restricted".into()),
            ..Default::default()
        };
        let (allowed, _) = DataClassificationRule
            .evaluate(&request(1, "read", restricted.clone()), &fixture.ctx())
            .unwrap();
        assert!(allowed);
        let (allowed, reason) = DataClassificationRule
            .evaluate(&request(2, "read", restricted), &fixture.ctx())
            .unwrap();
        assert!(!allowed);
        assert!(reason.contains("Insufficient clearance"));
        // Viewer cannot touch the internal default.
        let (allowed, _) = DataClassificationRule
            .evaluate(&request(3, "read", RequestContext::default()), &fixture.ctx())
            .unwrap();
        assert!(!allowed);
    }

    #[test]
    fn time_rule_honors_configured_windows() {
        let fixture = Fixture::new();
        let open = TimeBasedRule::default();
        let (allowed, _) = open
            .evaluate(&request(1, "read", RequestContext::default()), &fixture.ctx())
            .unwrap();
        assert!(allowed);

        let closed = TimeBasedRule {
            allowed_hours: vec![],
            ..Default::default()
        };
        let (allowed, reason) = closed
            .evaluate(&request(1, "read", RequestContext::default()), &fixture.ctx())
            .unwrap();
        assert!(!allowed);
        assert!(reason.contains("outside allowed hours"));
    }

    #[test]
    fn geofence_rule_prefix_matches() {
        let fixture = Fixture::new();
        let rule = GeofenceRule {
            allowed_prefixes: vec!["10.".into()],
            blocked_prefixes: vec!["10.66.".into()],
        };
        let ip = |addr: &str| RequestContext {
            ip_address: Some(addr.to_string()),
            ..Default::default()
        };
        assert!(rule.evaluate(&request(1, "read", ip("10.0.0.5")), &fixture.ctx()).unwrap().0);
        assert!(!rule.evaluate(&request(1, "read", ip("10.66.1.1")), &fixture.ctx()).unwrap().0);
        assert!(!rule.evaluate(&request(1, "read", ip("192.168.1.1")), &fixture.ctx()).unwrap().0);
        // No IP means allow.
        assert!(rule
            .evaluate(&request(1, "read", RequestContext::default()), &fixture.ctx())
            .unwrap()
            .0);
    }

    #[test]
    fn content_rule_wraps_scanner() {
        let fixture = Fixture::new();
        let clean = RequestContext {
            content: Some("weekly progress report".into()),
            ..Default::default()
        };
        assert!(ContentProhibitionRule
            .evaluate(&request(1, "write", clean), &fixture.ctx())
            .unwrap()
            .0);
        let dirty = RequestContext {
            content: Some("'; DROP TABLE users;--".into()),
            ..Default::default()
        };
        let (allowed, reason) = ContentProhibitionRule
            .evaluate(&request(1, "write", dirty), &fixture.ctx())
            .unwrap();
        assert!(!allowed);
        assert!(reason.contains("Prohibited content"));
    }
}
