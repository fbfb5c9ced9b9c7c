//! The policy evaluation engine.
//!
//! Evaluation order is strict and fail-fast: rate limit → content scan →
//! access control (RBAC, then project ACL) → policy chain (classification →
//! temporal → geofence). The rate counter is incremented exactly once per
//! evaluation, after a passing check. Every non-trivial evaluation writes
//! exactly one audit record; internal errors become deny decisions and are
//! still audited.

use crate::acl_manager::AclManager;
use crate::audit_logger::AuditLogger;
use crate::content_scanner::{ContentScanner, MlClassifier, PatternRepo};
use crate::models::{Decision, Policy, PolicyDecision, PolicyRequest, PolicyType};
use crate::rate_limiter::RateLimiter;
use crate::rules::{
    DataClassificationRule, GeofenceRule, ProjectAccessRule, RoleBasedRule, Rule, RuleContext,
    TimeBasedRule,
};
use crate::PdpError;
use std::sync::RwLock;
use tracing::{debug, error};
use warden_core::{be_key, get_json, put_json, scan_json, PrincipalRepo, Store};

/// CRUD over the `policies` tree.
pub struct PolicyRepo {
    store: Store,
}

impl PolicyRepo {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn create(
        &self,
        name: &str,
        policy_type: PolicyType,
        rules: serde_json::Value,
        enabled: bool,
        priority: i32,
        description: Option<String>,
    ) -> Result<Policy, PdpError> {
        let id = self.store.next_id("policies")?;
        let policy = Policy {
            id,
            name: name.to_string(),
            policy_type,
            rules,
            enabled,
            priority,
            description,
        };
        let tree = self.store.tree("policies")?;
        put_json(&tree, be_key(id), &policy)?;
        Ok(policy)
    }

    pub fn get(&self, id: u64) -> Result<Option<Policy>, PdpError> {
        let tree = self.store.tree("policies")?;
        Ok(get_json(&tree, be_key(id))?)
    }

    pub fn update(&self, policy: &Policy) -> Result<(), PdpError> {
        let tree = self.store.tree("policies")?;
        if tree
            .get(be_key(policy.id))
            .map_err(warden_core::StoreError::from)?
            .is_none()
        {
            return Err(PdpError::NotFound(format!("policy {}", policy.id)));
        }
        Ok(put_json(&tree, be_key(policy.id), policy)?)
    }

    pub fn delete(&self, id: u64) -> Result<bool, PdpError> {
        let tree = self.store.tree("policies")?;
        Ok(tree
            .remove(be_key(id))
            .map_err(warden_core::StoreError::from)?
            .is_some())
    }

    pub fn list(&self) -> Result<Vec<Policy>, PdpError> {
        let tree = self.store.tree("policies")?;
        Ok(scan_json(&tree, [])?)
    }

    /// Enabled policies, priority descending, the engine's evaluation order.
    pub fn list_active(&self) -> Result<Vec<Policy>, PdpError> {
        let mut policies: Vec<Policy> =
            self.list()?.into_iter().filter(|p| p.enabled).collect();
        policies.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(policies)
    }
}

/// Orchestrates policy checks and writes the audit trail.
pub struct PolicyEngine {
    pub acl_manager: AclManager,
    pub rate_limiter: RateLimiter,
    pub content_scanner: ContentScanner,
    pub audit_logger: AuditLogger,
    principals: PrincipalRepo,
    policies: PolicyRepo,
    chain: RwLock<PolicyChain>,
}

struct PolicyChain {
    classification: DataClassificationRule,
    temporal: TimeBasedRule,
    geofence: GeofenceRule,
}

impl PolicyEngine {
    /// Build the engine over the shared store and load active policies.
    pub fn new(store: Store) -> Result<Self, PdpError> {
        Self::with_ml(store, None, 0.8)
    }

    /// Build with an optional ML content classifier.
    pub fn with_ml(
        store: Store,
        ml: Option<std::sync::Arc<dyn MlClassifier>>,
        ml_threshold: f64,
    ) -> Result<Self, PdpError> {
        let mut content_scanner = ContentScanner::new();
        if let Some(classifier) = ml {
            content_scanner = content_scanner.with_ml(classifier, ml_threshold);
        }
        content_scanner.load_patterns(&PatternRepo::new(store.clone()))?;

        let engine = Self {
            acl_manager: AclManager::new(store.clone()),
            rate_limiter: RateLimiter::new(store.clone()),
            content_scanner,
            audit_logger: AuditLogger::new(store.clone()),
            principals: PrincipalRepo::new(store.clone()),
            policies: PolicyRepo::new(store),
            chain: RwLock::new(PolicyChain {
                classification: DataClassificationRule,
                temporal: TimeBasedRule::default(),
                geofence: GeofenceRule::default(),
            }),
        };
        engine.refresh_policies()?;
        Ok(engine)
    }

    /// Reload the policy chain configuration from the policies table. The
    /// highest-priority enabled policy of each recognized type reconfigures
    /// the matching rule; the default chain stays available regardless.
    pub fn refresh_policies(&self) -> Result<(), PdpError> {
        let active = self.policies.list_active()?;
        let mut chain = PolicyChain {
            classification: DataClassificationRule,
            temporal: TimeBasedRule::default(),
            geofence: GeofenceRule::default(),
        };
        let mut temporal_set = false;
        let mut geofence_set = false;
        for policy in &active {
            match policy.policy_type {
                PolicyType::Temporal if !temporal_set => {
                    chain.temporal = temporal_rule_from(&policy.rules);
                    temporal_set = true;
                }
                PolicyType::Abac if !geofence_set => {
                    if let Some(rule) = geofence_rule_from(&policy.rules) {
                        chain.geofence = rule;
                        geofence_set = true;
                    }
                }
                _ => {}
            }
        }
        debug!(
            target: "warden::pdp",
            policies = active.len(),
            "policy chain refreshed"
        );
        if let Ok(mut guard) = self.chain.write() {
            *guard = chain;
        }
        Ok(())
    }

    /// The policy repository (gateway CRUD surface).
    pub fn policies(&self) -> &PolicyRepo {
        &self.policies
    }

    fn rule_context(&self) -> RuleContext<'_> {
        RuleContext {
            principals: &self.principals,
            acls: &self.acl_manager,
            rate_limiter: &self.rate_limiter,
            scanner: &self.content_scanner,
        }
    }

    /// Evaluate a request through the complete chain. Never panics and never
    /// surfaces internal errors: they become deny decisions, and the outcome
    /// is always audited.
    pub fn evaluate(&self, request: &PolicyRequest) -> PolicyDecision {
        let decision = match self.evaluate_inner(request) {
            Ok(decision) => decision,
            Err(err) => {
                error!(target: "warden::pdp", error = %err, "policy evaluation error");
                PolicyDecision::deny(format!("Policy evaluation error: {err}"))
            }
        };
        if decision.audit_required {
            self.log_decision(request, &decision);
        }
        decision
    }

    fn evaluate_inner(&self, request: &PolicyRequest) -> Result<PolicyDecision, PdpError> {
        // 1. Rate limiting, checked first to stop abuse cheaply.
        let rate = self.check_rate_limit(request)?;
        if !rate.allowed {
            return Ok(rate);
        }

        // 2. Content scanning, only when content travels with the request.
        let content = self.check_content(request);
        if !content.allowed {
            return Ok(content);
        }

        // 3. Access control (RBAC + project ACL).
        let access = self.check_access(request)?;
        if !access.allowed {
            return Ok(access);
        }

        // 4. Policy chain.
        self.apply_policy_chain(request)
    }

    fn check_rate_limit(&self, request: &PolicyRequest) -> Result<PolicyDecision, PdpError> {
        let endpoint = request
            .context
            .endpoint
            .clone()
            .unwrap_or_else(|| request.resource_type.clone());
        let (allowed, remaining) = self.rate_limiter.check(request.principal_id, &endpoint)?;
        if !allowed {
            return Ok(PolicyDecision::deny(format!(
                "Rate limit exceeded for endpoint '{endpoint}'"
            )));
        }
        // The single increment for this evaluation.
        self.rate_limiter.increment(request.principal_id, &endpoint)?;
        Ok(PolicyDecision::allow(format!("Rate limit OK ({remaining} remaining)")).quiet())
    }

    fn check_content(&self, request: &PolicyRequest) -> PolicyDecision {
        let Some(content) = request.context.content.as_deref().filter(|c| !c.is_empty())
        else {
            return PolicyDecision::allow("No content to scan").quiet();
        };
        let scan = self.content_scanner.scan(content);
        if scan.safe {
            return PolicyDecision::allow("Content scan passed").quiet();
        }
        PolicyDecision::deny(format!(
            "Content violations detected: {}",
            scan.violations.join(", ")
        ))
        .with_conditions(vec![format!("severity={}", scan.severity.as_str())])
    }

    fn check_access(&self, request: &PolicyRequest) -> Result<PolicyDecision, PdpError> {
        let ctx = self.rule_context();

        let (rbac_allowed, rbac_reason) = RoleBasedRule.evaluate(request, &ctx)?;
        if !rbac_allowed {
            return Ok(PolicyDecision::deny(format!("RBAC denied: {rbac_reason}")));
        }

        if request.context.project_id.is_some() {
            let (project_allowed, project_reason) =
                ProjectAccessRule.evaluate(request, &ctx)?;
            if !project_allowed {
                return Ok(PolicyDecision::deny(format!(
                    "Project access denied: {project_reason}"
                )));
            }
        }

        Ok(PolicyDecision::allow("Access granted"))
    }

    fn apply_policy_chain(&self, request: &PolicyRequest) -> Result<PolicyDecision, PdpError> {
        let ctx = self.rule_context();
        let chain = self
            .chain
            .read()
            .map_err(|_| PdpError::InvalidInput("policy chain lock poisoned".to_string()))?;
        let mut conditions = Vec::new();

        let (ok, reason) = chain.classification.evaluate(request, &ctx)?;
        if !ok {
            return Ok(PolicyDecision::deny(format!(
                "Data classification check failed: {reason}"
            )));
        }
        conditions.push(reason);

        let (ok, reason) = chain.temporal.evaluate(request, &ctx)?;
        if !ok {
            return Ok(PolicyDecision::deny(format!("Temporal check failed: {reason}")));
        }
        conditions.push(reason);

        if request.context.ip_address.is_some() {
            let (ok, reason) = chain.geofence.evaluate(request, &ctx)?;
            if !ok {
                return Ok(PolicyDecision::deny(format!("Geofence check failed: {reason}")));
            }
            conditions.push(reason);
        }

        Ok(PolicyDecision::allow("Access granted").with_conditions(conditions))
    }

    fn log_decision(&self, request: &PolicyRequest, decision: &PolicyDecision) {
        let audit_decision = if decision.allowed {
            Decision::Allow
        } else if decision.reason.starts_with("Rate limit exceeded") {
            Decision::RateLimitExceeded
        } else {
            Decision::Deny
        };
        let metadata = serde_json::json!({
            "reason": decision.reason,
            "conditions": decision.conditions,
            "context": request.context,
        });
        if let Err(err) = self.audit_logger.log(
            Some(request.principal_id),
            &request.action,
            Some(&request.resource_type),
            request.resource_id.as_deref(),
            audit_decision,
            metadata,
            request.context.ip_address.as_deref(),
        ) {
            error!(target: "warden::pdp", error = %err, "failed to write audit record");
        }
    }
}

fn temporal_rule_from(rules: &serde_json::Value) -> TimeBasedRule {
    let hours = rules
        .get("allowed_hours")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_u64().map(|h| h as u32)).collect());
    let days = rules
        .get("allowed_days")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_u64().map(|d| d as u32)).collect());
    let zone = rules
        .get("zone")
        .and_then(|v| v.as_str())
        .and_then(|name| name.parse().ok())
        .unwrap_or(chrono_tz::Tz::UTC);
    let defaults = TimeBasedRule::default();
    TimeBasedRule {
        allowed_hours: hours.unwrap_or(defaults.allowed_hours),
        allowed_days: days.unwrap_or(defaults.allowed_days),
        zone,
    }
}

fn geofence_rule_from(rules: &serde_json::Value) -> Option<GeofenceRule> {
    let allowed = rules.get("allowed_ip_prefixes").and_then(|v| v.as_array());
    let blocked = rules.get("blocked_ip_prefixes").and_then(|v| v.as_array());
    if allowed.is_none() && blocked.is_none() {
        return None;
    }
    let collect = |arr: Option<&Vec<serde_json::Value>>| {
        arr.map(|values| {
            values
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
    };
    Some(GeofenceRule {
        allowed_prefixes: collect(allowed),
        blocked_prefixes: collect(blocked),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RequestContext;
    use crate::AuditFilter;
    use warden_core::{Principal, Project, ProjectRepo, Role};

    fn seeded_engine() -> (PolicyEngine, Store) {
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
        (PolicyEngine::new(store.clone()).unwrap(), store)
    }

    fn base_request(principal_id: i64) -> PolicyRequest {
        PolicyRequest {
            principal_id,
            action: "read".to_string(),
            resource_type: "document".to_string(),
            resource_id: Some("1".to_string()),
            context: RequestContext {
                project_id: Some(101),
                ..Default::default()
            },
        }
    }

    #[test]
    fn admin_read_is_allowed_and_audited_once() {
        let (engine, _store) = seeded_engine();
        let decision = engine.evaluate(&base_request(1));
        assert!(decision.allowed);
        assert!(decision.reason.contains("Access granted"));
        let records = engine.audit_logger.query(&AuditFilter::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].decision, Decision::Allow);
    }

    #[test]
    fn exhausted_rate_budget_denies_with_rate_limit_audit() {
        let (engine, _store) = seeded_engine();
        for _ in 0..100 {
            engine.rate_limiter.increment(1, "default").unwrap();
        }
        let mut request = base_request(1);
        request.resource_type = "x".to_string();
        request.context.endpoint = Some("default".to_string());
        let decision = engine.evaluate(&request);
        assert!(!decision.allowed);
        assert!(decision.reason.contains("Rate limit exceeded"));
        let records = engine.audit_logger.query(&AuditFilter::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].decision, Decision::RateLimitExceeded);
    }

    #[test]
    fn malicious_content_denies_with_severity_condition() {
        let (engine, _store) = seeded_engine();
        let mut request = base_request(1);
        request.context.content = Some("'; DROP TABLE users;--".to_string());
        let decision = engine.evaluate(&request);
        assert!(!decision.allowed);
        assert!(decision.reason.contains("violations"));
        assert!(decision
            .conditions
            .iter()
            .any(|c| c.starts_with("severity=")));
        let records = engine.audit_logger.query(&AuditFilter::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].decision, Decision::Deny);
    }

    #[test]
    fn viewer_cannot_write() {
        let (engine, _store) = seeded_engine();
        let mut request = base_request(3);
        request.action = "write".to_string();
        let decision = engine.evaluate(&request);
        assert!(!decision.allowed);
        assert!(decision.reason.contains("RBAC denied"));
    }

    #[test]
    fn engineer_without_grant_is_refused_project_access() {
        let (engine, _store) = seeded_engine();
        let decision = engine.evaluate(&base_request(2));
        assert!(!decision.allowed);
        assert!(decision.reason.contains("Project access denied"));
        // Grant and retry.
        engine
            .acl_manager
            .grant(2, 101, Role::Engineer, Some(1), None)
            .unwrap();
        let decision = engine.evaluate(&base_request(2));
        assert!(decision.allowed);
    }

    #[test]
    fn chain_conditions_accumulate_on_allow() {
        let (engine, _store) = seeded_engine();
        let mut request = base_request(1);
        request.context.ip_address = Some("10.0.0.1".to_string());
        let decision = engine.evaluate(&request);
        assert!(decision.allowed);
        assert!(decision.conditions.iter().any(|c| c.contains("clearance")));
        assert!(decision.conditions.iter().any(|c| c.contains("time window")));
        assert!(decision.conditions.iter().any(|c| c.contains("IP address")));
    }

    #[test]
    fn temporal_policy_reconfigures_the_chain() {
        let (engine, _store) = seeded_engine();
        engine
            .policies()
            .create(
                "after-hours lockout",
                PolicyType::Temporal,
                serde_json::json!({"allowed_hours": []}),
                true,
                10,
                None,
            )
            .unwrap();
        engine.refresh_policies().unwrap();
        let decision = engine.evaluate(&base_request(1));
        assert!(!decision.allowed);
        assert!(decision.reason.contains("Temporal check failed"));
    }

    #[test]
    fn unknown_principal_is_denied_not_errored() {
        let (engine, _store) = seeded_engine();
        let decision = engine.evaluate(&base_request(42));
        assert!(!decision.allowed);
        assert!(decision.reason.contains("User not found"));
        let records = engine.audit_logger.query(&AuditFilter::default()).unwrap();
        assert_eq!(records.len(), 1);
    }
}
