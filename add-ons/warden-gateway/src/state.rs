//! Shared gateway state: engines and repositories built once at startup.

use std::sync::Arc;
use warden_core::{CoreConfig, EventEmitter, JobQueue, LockManager, PrincipalRepo, ProjectRepo, Store};
use warden_hydration::HydrationPipeline;
use warden_pdp::{PatternRepo, PolicyEngine};
use warden_regression::{EvaluationHarness, RegressionGuard};
use warden_ule::UleEngine;

pub struct AppState {
    pub config: CoreConfig,
    pub store: Store,
    pub pdp: Arc<PolicyEngine>,
    pub principals: PrincipalRepo,
    pub projects: ProjectRepo,
    pub patterns: PatternRepo,
    pub queue: Arc<JobQueue>,
    pub locks: Arc<LockManager>,
    pub pipeline: Arc<HydrationPipeline>,
    pub ule: Arc<UleEngine>,
    pub harness: Arc<EvaluationHarness>,
    pub guard: Arc<RegressionGuard>,
    pub events: EventEmitter,
}
