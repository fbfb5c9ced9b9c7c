//! warden-regression: the promotion gate.
//!
//! The evaluation harness runs named suites against tagged component
//! versions; the regression guard compares candidate vs. baseline scores,
//! requires admin approval through the PDP, and atomically swaps the active
//! tag only when the thresholds hold.

mod evaluation;
mod guard;
mod models;

pub use evaluation::{
    EvalAlert, EvalRun, EvalRunStatus, EvaluationHarness, StoredScoreSuite, Suite, SuiteOutcome,
};
pub use guard::{suite_for_component, RegressionGuard, COMPONENTS};
pub use models::{
    CurrentComponentVersion, PromotionRequest, RegressionCheck, RegressionThreshold,
    RequestStatus,
};

/// Regression errors, mapped at the HTTP boundary: InvalidInput → 400,
/// NotFound → 404, Conflict → 409, Forbidden → 403.
#[derive(Debug, thiserror::Error)]
pub enum RegressionError {
    #[error(transparent)]
    Store(#[from] warden_core::StoreError),
    #[error(transparent)]
    Pdp(#[from] warden_pdp::PdpError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("suite error: {0}")]
    Suite(String),
}
