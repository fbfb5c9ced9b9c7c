//! The regression guard: request → check → admin-approve → promote.

use crate::evaluation::EvaluationHarness;
use crate::models::{
    CurrentComponentVersion, PromotionRequest, RegressionCheck, RegressionThreshold,
    RequestStatus,
};
use crate::RegressionError;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use warden_core::{
    be_key, get_json, put_json, scan_json, BackplaneEvent, EventEmitter, Store,
};
use warden_pdp::{PolicyEngine, PolicyRequest, RequestContext};

/// The closed set of promotable components.
pub const COMPONENTS: [&str; 5] = [
    "intent_router",
    "tool_router",
    "ule_linking",
    "pdp_policies",
    "prompt_templates",
];

const DEFAULT_BASELINE_TAG: &str = "baseline:v1";
const DEFAULT_MAX_DROP: f64 = 0.02;

/// Which suite gates each component.
pub fn suite_for_component(component: &str) -> Option<&'static str> {
    match component {
        "ule_linking" => Some("linking"),
        "pdp_policies" => Some("pdp"),
        "intent_router" | "tool_router" | "prompt_templates" => Some("runtime"),
        _ => None,
    }
}

pub struct RegressionGuard {
    store: Store,
    harness: Arc<EvaluationHarness>,
    pdp: Arc<PolicyEngine>,
    events: EventEmitter,
}

impl RegressionGuard {
    pub fn new(
        store: Store,
        harness: Arc<EvaluationHarness>,
        pdp: Arc<PolicyEngine>,
        events: EventEmitter,
    ) -> Self {
        Self {
            store,
            harness,
            pdp,
            events,
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn create_request(
        &self,
        component: &str,
        candidate_tag: &str,
        workspace_id: Option<&str>,
        requested_by: Option<i64>,
    ) -> Result<PromotionRequest, RegressionError> {
        if !COMPONENTS.contains(&component) {
            return Err(RegressionError::InvalidInput(format!(
                "unknown component '{component}'"
            )));
        }
        let baseline_tag = self.get_or_seed_baseline(component)?;
        self.ensure_thresholds(component)?;

        let now = Utc::now();
        let request = PromotionRequest {
            id: self.store.next_id("promotion_requests")?,
            workspace_id: workspace_id.map(str::to_string),
            component: component.to_string(),
            baseline_tag,
            candidate_tag: candidate_tag.to_string(),
            status: RequestStatus::Requested,
            requested_by,
            approved_by: None,
            created_at: now,
            updated_at: now,
        };
        self.save_request(&request)?;
        Ok(request)
    }

    /// Run the gating suite for both tags and record the comparison. Suite
    /// errors abort the check: the request stays `running` until retried.
    pub fn run_check(&self, request_id: u64) -> Result<RegressionCheck, RegressionError> {
        let mut request = self.require_request(request_id)?;
        let suite_name = suite_for_component(&request.component).ok_or_else(|| {
            RegressionError::InvalidInput(format!(
                "no suite mapped for component '{}'",
                request.component
            ))
        })?;
        let thresholds = self.ensure_thresholds(&request.component)?;
        if !thresholds.enabled {
            return Err(RegressionError::InvalidInput(format!(
                "regression checks disabled for component '{}'",
                request.component
            )));
        }

        request.status = RequestStatus::Running;
        request.updated_at = Utc::now();
        self.save_request(&request)?;

        let baseline = self.harness.run_suite(
            suite_name,
            &request.baseline_tag,
            request.workspace_id.as_deref(),
        )?;
        let candidate = self.harness.run_suite(
            suite_name,
            &request.candidate_tag,
            request.workspace_id.as_deref(),
        )?;

        let min_threshold = thresholds.min_threshold.unwrap_or(0.0);

        let (passed, drop_value) = match (baseline.score, candidate.score) {
            (Some(baseline_score), Some(candidate_score)) => {
                let drop = baseline_score - candidate_score;
                (
                    candidate_score >= min_threshold && drop <= thresholds.max_drop,
                    Some(drop),
                )
            }
            _ => (false, None),
        };

        request.status = if passed {
            RequestStatus::Pass
        } else {
            RequestStatus::Fail
        };
        request.updated_at = Utc::now();
        self.save_request(&request)?;

        let check = RegressionCheck {
            id: self.store.next_id("regression_checks")?,
            request_id: request.id,
            suite_name: suite_name.to_string(),
            baseline_run_id: Some(baseline.id),
            candidate_run_id: Some(candidate.id),
            baseline_score: baseline.score,
            candidate_score: candidate.score,
            min_threshold,
            max_drop: thresholds.max_drop,
            drop_value,
            passed,
            report: serde_json::json!({
                "baseline": baseline,
                "candidate": candidate,
            }),
            created_at: Utc::now(),
        };
        self.save_check(&check)?;
        info!(
            target: "warden::regression",
            request = request.id,
            component = %request.component,
            passed,
            "regression check recorded"
        );
        Ok(check)
    }

    pub fn approve(
        &self,
        request_id: u64,
        approved_by: i64,
    ) -> Result<PromotionRequest, RegressionError> {
        let mut request = self.require_request(request_id)?;
        if request.status != RequestStatus::Pass {
            return Err(RegressionError::Conflict(
                "request must pass regression checks before approval".to_string(),
            ));
        }
        self.require_admin(
            approved_by,
            "regression.approve",
            &format!("promotion_request:{}", request.id),
            request.workspace_id.as_deref(),
        )?;

        request.status = RequestStatus::Approved;
        request.approved_by = Some(approved_by);
        request.updated_at = Utc::now();
        self.save_request(&request)?;
        self.emit("regression.approved", &request, approved_by)?;
        Ok(request)
    }

    pub fn promote(
        &self,
        request_id: u64,
        actor_id: i64,
    ) -> Result<PromotionRequest, RegressionError> {
        let mut request = self.require_request(request_id)?;
        if request.status != RequestStatus::Approved {
            return Err(RegressionError::Conflict(
                "request must be approved before promotion".to_string(),
            ));
        }
        let latest = self
            .latest_check(request.id)?
            .ok_or_else(|| RegressionError::Conflict("no regression check on record".into()))?;
        if !latest.passed {
            return Err(RegressionError::Conflict(
                "regression checks must pass before promotion".to_string(),
            ));
        }
        self.require_admin(
            actor_id,
            "regression.promote",
            &format!("promotion_request:{}", request.id),
            request.workspace_id.as_deref(),
        )?;

        // The tag swap and status change persist together.
        let versions = self.store.tree("component_versions")?;
        put_json(
            &versions,
            &request.component,
            &CurrentComponentVersion {
                component: request.component.clone(),
                current_tag: request.candidate_tag.clone(),
            },
        )?;
        request.status = RequestStatus::Promoted;
        request.updated_at = Utc::now();
        self.save_request(&request)?;
        self.emit("regression.promoted", &request, actor_id)?;
        info!(
            target: "warden::regression",
            component = %request.component,
            tag = %request.candidate_tag,
            "component promoted"
        );
        Ok(request)
    }

    pub fn update_thresholds(
        &self,
        component: &str,
        updated_by: i64,
        min_threshold: Option<f64>,
        max_drop: Option<f64>,
        enabled: Option<bool>,
    ) -> Result<RegressionThreshold, RegressionError> {
        if !COMPONENTS.contains(&component) {
            return Err(RegressionError::InvalidInput(format!(
                "unknown component '{component}'"
            )));
        }
        let mut thresholds = self.ensure_thresholds(component)?;
        self.require_admin(
            updated_by,
            "regression.thresholds.update",
            &format!("thresholds:{component}"),
            None,
        )?;

        if let Some(value) = min_threshold {
            thresholds.min_threshold = Some(value);
        }
        if let Some(value) = max_drop {
            thresholds.max_drop = value;
        }
        if let Some(value) = enabled {
            thresholds.enabled = value;
        }
        let tree = self.store.tree("regression_thresholds")?;
        put_json(&tree, component, &thresholds)?;
        Ok(thresholds)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get_request(&self, id: u64) -> Result<Option<PromotionRequest>, RegressionError> {
        let tree = self.store.tree("promotion_requests")?;
        Ok(get_json(&tree, be_key(id))?)
    }

    pub fn list_requests(&self) -> Result<Vec<PromotionRequest>, RegressionError> {
        let tree = self.store.tree("promotion_requests")?;
        Ok(scan_json(&tree, [])?)
    }

    pub fn current_version(&self, component: &str) -> Result<Option<String>, RegressionError> {
        let tree = self.store.tree("component_versions")?;
        let current: Option<CurrentComponentVersion> = get_json(&tree, component)?;
        Ok(current.map(|c| c.current_tag))
    }

    pub fn checks_for(&self, request_id: u64) -> Result<Vec<RegressionCheck>, RegressionError> {
        let tree = self.store.tree("regression_checks")?;
        let all: Vec<RegressionCheck> = scan_json(&tree, [])?;
        Ok(all.into_iter().filter(|c| c.request_id == request_id).collect())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn require_request(&self, id: u64) -> Result<PromotionRequest, RegressionError> {
        self.get_request(id)?
            .ok_or_else(|| RegressionError::NotFound(format!("promotion request {id}")))
    }

    fn latest_check(&self, request_id: u64) -> Result<Option<RegressionCheck>, RegressionError> {
        Ok(self.checks_for(request_id)?.into_iter().max_by_key(|c| c.id))
    }

    fn require_admin(
        &self,
        principal_id: i64,
        action: &str,
        resource_id: &str,
        workspace_id: Option<&str>,
    ) -> Result<(), RegressionError> {
        let decision = self.pdp.evaluate(&PolicyRequest {
            principal_id,
            action: action.to_string(),
            resource_type: "regression".to_string(),
            resource_id: Some(resource_id.to_string()),
            context: RequestContext {
                workspace_id: workspace_id.map(str::to_string),
                ..Default::default()
            },
        });
        if !decision.allowed {
            return Err(RegressionError::Forbidden(decision.reason));
        }
        Ok(())
    }

    fn get_or_seed_baseline(&self, component: &str) -> Result<String, RegressionError> {
        let tree = self.store.tree("component_versions")?;
        if let Some(current) = get_json::<CurrentComponentVersion>(&tree, component)? {
            return Ok(current.current_tag);
        }
        let seeded = CurrentComponentVersion {
            component: component.to_string(),
            current_tag: DEFAULT_BASELINE_TAG.to_string(),
        };
        put_json(&tree, component, &seeded)?;
        Ok(seeded.current_tag)
    }

    fn ensure_thresholds(&self, component: &str) -> Result<RegressionThreshold, RegressionError> {
        let tree = self.store.tree("regression_thresholds")?;
        if let Some(thresholds) = get_json::<RegressionThreshold>(&tree, component)? {
            return Ok(thresholds);
        }
        let suite_name = suite_for_component(component).ok_or_else(|| {
            RegressionError::InvalidInput(format!("no suite mapped for component '{component}'"))
        })?;
        let thresholds = RegressionThreshold {
            component: component.to_string(),
            suite_name: suite_name.to_string(),
            min_threshold: None,
            max_drop: DEFAULT_MAX_DROP,
            enabled: true,
        };
        put_json(&tree, component, &thresholds)?;
        Ok(thresholds)
    }

    fn save_request(&self, request: &PromotionRequest) -> Result<(), RegressionError> {
        let tree = self.store.tree("promotion_requests")?;
        Ok(put_json(&tree, be_key(request.id), request)?)
    }

    fn save_check(&self, check: &RegressionCheck) -> Result<(), RegressionError> {
        let tree = self.store.tree("regression_checks")?;
        Ok(put_json(&tree, be_key(check.id), check)?)
    }

    fn emit(
        &self,
        event_type: &str,
        request: &PromotionRequest,
        actor_id: i64,
    ) -> Result<(), RegressionError> {
        self.events.emit(BackplaneEvent {
            event_type: event_type.to_string(),
            source: "regression".to_string(),
            workspace_id: request.workspace_id.clone(),
            actor_id: Some(actor_id),
            payload: serde_json::json!({
                "component": request.component,
                "candidate_tag": request.candidate_tag,
                "baseline_tag": request.baseline_tag,
                "request_id": request.id,
            }),
            occurred_at: Utc::now(),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::StoredScoreSuite;
    use warden_core::{Principal, PrincipalRepo, Role};

    struct Fixture {
        store: Store,
        guard: RegressionGuard,
    }

    fn fixture() -> Fixture {
        let store = Store::temp().unwrap();
        let principals = PrincipalRepo::new(store.clone());
        for (id, role) in [(10, Role::Admin), (2, Role::Engineer), (1, Role::Admin)] {
            principals
                .upsert(&Principal {
                    id,
                    name: format!("user-{id}"),
                    email: format!("user{id}@example.com"),
                    role,
                })
                .unwrap();
        }
        let harness = Arc::new(EvaluationHarness::new(store.clone()));
        for suite in ["linking", "pdp", "runtime"] {
            harness.register_suite(Arc::new(StoredScoreSuite::new(
                store.clone(),
                suite,
                0.95,
                None,
            )));
        }
        let pdp = Arc::new(PolicyEngine::new(store.clone()).unwrap());
        let events = EventEmitter::new(store.clone(), None);
        Fixture {
            guard: RegressionGuard::new(store.clone(), harness, pdp, events),
            store,
        }
    }

    #[tokio::test]
    async fn promotion_happy_path_swaps_the_active_tag() {
        let fx = fixture();
        let request = fx
            .guard
            .create_request("tool_router", "candidate:v3", None, Some(1))
            .unwrap();
        assert_eq!(request.status, RequestStatus::Requested);
        assert_eq!(request.baseline_tag, "baseline:v1");

        let check = fx.guard.run_check(request.id).unwrap();
        assert!(check.passed);
        assert_eq!(check.baseline_score, Some(0.95));
        assert_eq!(check.candidate_score, Some(0.95));
        assert_eq!(
            fx.guard.get_request(request.id).unwrap().unwrap().status,
            RequestStatus::Pass
        );

        let approved = fx.guard.approve(request.id, 10).unwrap();
        assert_eq!(approved.status, RequestStatus::Approved);
        assert_eq!(approved.approved_by, Some(10));

        let promoted = fx.guard.promote(request.id, 10).unwrap();
        assert_eq!(promoted.status, RequestStatus::Promoted);
        assert_eq!(
            fx.guard.current_version("tool_router").unwrap().unwrap(),
            "candidate:v3"
        );
    }

    #[tokio::test]
    async fn non_admin_approval_is_forbidden_and_status_stays_pass() {
        let fx = fixture();
        let request = fx
            .guard
            .create_request("tool_router", "candidate:v3", None, Some(1))
            .unwrap();
        fx.guard.run_check(request.id).unwrap();

        let err = fx.guard.approve(request.id, 2).unwrap_err();
        assert!(matches!(err, RegressionError::Forbidden(_)));
        assert_eq!(
            fx.guard.get_request(request.id).unwrap().unwrap().status,
            RequestStatus::Pass
        );
    }

    #[tokio::test]
    async fn score_drop_beyond_tolerance_fails_the_check() {
        let fx = fixture();
        StoredScoreSuite::record_score(&fx.store, "linking", "baseline:v1", 0.95).unwrap();
        StoredScoreSuite::record_score(&fx.store, "linking", "candidate:bad", 0.90).unwrap();
        let request = fx
            .guard
            .create_request("ule_linking", "candidate:bad", None, Some(1))
            .unwrap();
        let check = fx.guard.run_check(request.id).unwrap();
        assert!(!check.passed);
        assert!(check.drop_value.unwrap() > 0.02);
        assert_eq!(
            fx.guard.get_request(request.id).unwrap().unwrap().status,
            RequestStatus::Fail
        );
        // Failed requests cannot be approved.
        assert!(matches!(
            fx.guard.approve(request.id, 10),
            Err(RegressionError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn promote_requires_approval_first() {
        let fx = fixture();
        let request = fx
            .guard
            .create_request("pdp_policies", "candidate:v2", None, Some(1))
            .unwrap();
        fx.guard.run_check(request.id).unwrap();
        assert!(matches!(
            fx.guard.promote(request.id, 10),
            Err(RegressionError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn unknown_component_and_request_are_rejected() {
        let fx = fixture();
        assert!(matches!(
            fx.guard.create_request("mystery", "x", None, None),
            Err(RegressionError::InvalidInput(_))
        ));
        assert!(matches!(
            fx.guard.run_check(404),
            Err(RegressionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn thresholds_update_is_admin_gated() {
        let fx = fixture();
        let err = fx
            .guard
            .update_thresholds("tool_router", 2, Some(0.9), None, None)
            .unwrap_err();
        assert!(matches!(err, RegressionError::Forbidden(_)));

        let updated = fx
            .guard
            .update_thresholds("tool_router", 10, Some(0.9), Some(0.05), Some(true))
            .unwrap();
        assert_eq!(updated.min_threshold, Some(0.9));
        assert_eq!(updated.max_drop, 0.05);
    }

    #[tokio::test]
    async fn disabled_thresholds_block_checks() {
        let fx = fixture();
        let request = fx
            .guard
            .create_request("tool_router", "candidate:v3", None, Some(1))
            .unwrap();
        fx.guard
            .update_thresholds("tool_router", 10, None, None, Some(false))
            .unwrap();
        assert!(matches!(
            fx.guard.run_check(request.id),
            Err(RegressionError::InvalidInput(_))
        ));
    }
}
