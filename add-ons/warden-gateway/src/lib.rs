//! Gateway library surface: state construction and the router, shared by the
//! binary and the integration tests.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod state;

use std::sync::Arc;
use tracing::info;
use warden_core::{
    CoreConfig, EventEmitter, JobQueue, LockManager, Principal, PrincipalRepo, ProjectRepo,
    Role, Store,
};
use warden_hydration::{
    ConnectorRegistry, EmbeddedIndex, EngineUleHook, HydrationPipeline, HydrationWorker,
};
use warden_pdp::{PatternRepo, PolicyEngine};
use warden_regression::{EvaluationHarness, RegressionGuard, StoredScoreSuite};
use warden_ule::{
    CommercialPack, ConstructionPack, EmbeddingProvider, HashEmbedder, RemoteEmbedder,
    UleEngine, UleStore,
};

pub use state::AppState;

const EVAL_SUITES: [&str; 5] = ["linking", "pdp", "runtime", "extraction", "prediction"];
const DEFAULT_SUITE_SCORE: f64 = 0.95;

/// Wire every engine over one store. Used by `main` and the test harness.
pub fn build_state(
    config: CoreConfig,
    store: Store,
) -> Result<Arc<AppState>, Box<dyn std::error::Error + Send + Sync>> {
    let locks = Arc::new(LockManager::new(store.clone(), config.lock_backend));
    let queue = Arc::new(JobQueue::new(store.clone()));
    // No ML classifier ships with the gateway; the threshold still applies
    // when a deployment registers one.
    let pdp = Arc::new(PolicyEngine::with_ml(
        store.clone(),
        None,
        config.ml_scanner_threshold,
    )?);

    let embedder: Option<Arc<dyn EmbeddingProvider>> = match config.embedding_provider.as_str() {
        "hash" => Some(Arc::new(HashEmbedder::default())),
        "remote" => config.embedding_api_url.clone().map(|url| {
            Arc::new(RemoteEmbedder::new(url, config.embedding_api_key.clone(), 256))
                as Arc<dyn EmbeddingProvider>
        }),
        _ => None,
    };
    let ule = Arc::new(UleEngine::new(UleStore::new(store.clone()), embedder)?);
    ule.register_pack(Arc::new(ConstructionPack::new()))?;
    ule.register_pack(Arc::new(CommercialPack::new()))?;

    let pipeline = Arc::new(HydrationPipeline::new(
        store.clone(),
        locks.clone(),
        ConnectorRegistry::default(),
        Arc::new(EmbeddedIndex::new(store.clone())),
        Arc::new(EngineUleHook::new(ule.clone())),
        config.hydration_ocr_enabled,
    ));

    let harness = Arc::new(EvaluationHarness::new(store.clone()));
    for suite in EVAL_SUITES {
        harness.register_suite(Arc::new(StoredScoreSuite::new(
            store.clone(),
            suite,
            DEFAULT_SUITE_SCORE,
            None,
        )));
    }

    let events = EventEmitter::new(store.clone(), config.event_webhook_url.clone());
    let guard = Arc::new(RegressionGuard::new(
        store.clone(),
        harness.clone(),
        pdp.clone(),
        events.clone(),
    ));

    Ok(Arc::new(AppState {
        principals: PrincipalRepo::new(store.clone()),
        projects: ProjectRepo::new(store.clone()),
        patterns: PatternRepo::new(store.clone()),
        config,
        store,
        pdp,
        queue,
        locks,
        pipeline,
        ule,
        harness,
        guard,
        events,
    }))
}

/// First-boot seed: a root admin and the hydration service principal, so the
/// PDP has someone to say yes to.
pub fn seed_defaults(state: &AppState) -> Result<(), warden_core::StoreError> {
    if !state.principals.list()?.is_empty() {
        return Ok(());
    }
    state.principals.upsert(&Principal {
        id: 1,
        name: "Root Admin".to_string(),
        email: "admin@warden.local".to_string(),
        role: Role::Admin,
    })?;
    state.principals.upsert(&Principal {
        id: state.config.hydration_service_user_id,
        name: "Hydration Service".to_string(),
        email: "hydration@warden.local".to_string(),
        role: Role::Admin,
    })?;
    state.projects.upsert(&warden_core::Project {
        id: 1,
        name: "Default Project".to_string(),
    })?;
    info!(target: "warden::gateway", "seeded default principals and project");
    Ok(())
}

/// Spawn the hydration scheduler, the queue consumer, and the retention
/// sweeper.
pub fn spawn_workers(state: &Arc<AppState>) {
    tokio::spawn(run_retention_sweeper(state.clone()));

    if !state.config.hydration_enabled {
        info!(target: "warden::gateway", "hydration workers disabled");
        return;
    }
    let worker = Arc::new(HydrationWorker::new(
        state.store.clone(),
        state.pipeline.clone(),
        state.pdp.clone(),
        state.locks.clone(),
        state.queue.clone(),
        state.config.clone(),
    ));
    tokio::spawn(worker.clone().run_scheduler());
    tokio::spawn(worker.run_queue_worker());
}

/// Daily sweep: audit retention and stale rate-counter rows.
async fn run_retention_sweeper(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(60 * 60 * 24));
    loop {
        interval.tick().await;
        match state.pdp.audit_logger.cleanup(state.config.audit_retention_days) {
            Ok(deleted) if deleted > 0 => {
                info!(target: "warden::gateway", deleted, "audit retention sweep");
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(target: "warden::gateway", error = %err, "audit retention sweep failed");
            }
        }
        if let Err(err) = state.pdp.rate_limiter.cleanup(24) {
            tracing::warn!(target: "warden::gateway", error = %err, "rate counter sweep failed");
        }
    }
}
