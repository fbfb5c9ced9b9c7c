//! Evaluation harness: a registry of named suites, run lifecycle records,
//! and score-threshold alerts.
//!
//! Suite content (domain fixtures) lives behind the [`Suite`] trait; the
//! harness only orchestrates. [`StoredScoreSuite`] is the bundled tagged
//! evaluation: it reads recorded scores per (suite, tag) from the store, so
//! regression checks can compare any two tags without re-running fixtures.

use crate::RegressionError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use warden_core::{be_key, get_json, put_json, Store};

/// Result of one suite execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteOutcome {
    pub score: f64,
    pub total: u32,
    pub passed: u32,
    #[serde(default)]
    pub failures: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_threshold: Option<f64>,
}

/// A named evaluation suite runnable against a tagged component version.
pub trait Suite: Send + Sync {
    fn name(&self) -> &str;
    fn run(&self, tag: &str, workspace_id: Option<&str>) -> Result<SuiteOutcome, RegressionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalRunStatus {
    Running,
    Completed,
    Failed,
}

/// One recorded suite execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalRun {
    pub id: u64,
    pub suite: String,
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: EvalRunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub passed: u32,
    #[serde(default)]
    pub failures: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Raised when a completed run scores below its suite's minimum threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalAlert {
    pub id: u64,
    pub suite: String,
    pub run_id: u64,
    pub score: f64,
    pub min_threshold: f64,
    pub created_at: DateTime<Utc>,
}

pub struct EvaluationHarness {
    store: Store,
    suites: DashMap<String, Arc<dyn Suite>>,
}

impl EvaluationHarness {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            suites: DashMap::new(),
        }
    }

    /// Register a suite; re-registering a name replaces it with a warning.
    pub fn register_suite(&self, suite: Arc<dyn Suite>) {
        let name = suite.name().to_string();
        if self.suites.insert(name.clone(), suite).is_some() {
            warn!(target: "warden::evaluation", suite = %name, "suite replaced");
        }
    }

    pub fn suite_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.suites.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Run one suite; records the run and raises a threshold alert when the
    /// score falls below the suite's minimum. Unknown suites are invalid
    /// input; suite failures record a failed run and propagate.
    pub fn run_suite(
        &self,
        suite_name: &str,
        tag: &str,
        workspace_id: Option<&str>,
    ) -> Result<EvalRun, RegressionError> {
        let suite = self
            .suites
            .get(suite_name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RegressionError::InvalidInput(format!("unknown suite '{suite_name}'")))?;

        let mut run = EvalRun {
            id: self.store.next_id("eval_runs")?,
            suite: suite_name.to_string(),
            tag: tag.to_string(),
            workspace_id: workspace_id.map(str::to_string),
            started_at: Utc::now(),
            finished_at: None,
            status: EvalRunStatus::Running,
            score: None,
            total: 0,
            passed: 0,
            failures: Vec::new(),
            error: None,
        };
        self.save_run(&run)?;

        match suite.run(tag, workspace_id) {
            Ok(outcome) => {
                run.status = EvalRunStatus::Completed;
                run.score = Some(outcome.score);
                run.total = outcome.total;
                run.passed = outcome.passed;
                run.failures = outcome.failures.clone();
                run.finished_at = Some(Utc::now());
                self.save_run(&run)?;
                if let Some(min_threshold) = outcome.min_threshold {
                    if outcome.score < min_threshold {
                        self.raise_alert(&run, outcome.score, min_threshold)?;
                    }
                }
                info!(
                    target: "warden::evaluation",
                    suite = suite_name,
                    tag,
                    score = outcome.score,
                    "suite completed"
                );
                Ok(run)
            }
            Err(err) => {
                run.status = EvalRunStatus::Failed;
                run.error = Some(err.to_string());
                run.finished_at = Some(Utc::now());
                self.save_run(&run)?;
                error!(target: "warden::evaluation", suite = suite_name, error = %err, "suite failed");
                Err(err)
            }
        }
    }

    /// Run every registered suite against one tag. Failed suites are
    /// recorded but do not abort the sweep, and they never feed threshold
    /// alerting.
    pub fn run_all_suites(&self, tag: &str, workspace_id: Option<&str>) -> Vec<EvalRun> {
        let mut runs = Vec::new();
        for name in self.suite_names() {
            match self.run_suite(&name, tag, workspace_id) {
                Ok(run) => runs.push(run),
                Err(_) => {
                    // The failed run record was already written.
                    if let Ok(Some(run)) = self.latest_run_for(&name) {
                        runs.push(run);
                    }
                }
            }
        }
        runs
    }

    pub fn get_run(&self, id: u64) -> Result<Option<EvalRun>, RegressionError> {
        let tree = self.store.tree("eval_runs")?;
        Ok(get_json(&tree, be_key(id))?)
    }

    /// Runs newest-first.
    pub fn list_runs(&self, limit: usize) -> Result<Vec<EvalRun>, RegressionError> {
        let tree = self.store.tree("eval_runs")?;
        let mut out = Vec::new();
        for entry in tree.iter().rev().take(limit) {
            let (_, bytes) = entry.map_err(warden_core::StoreError::from)?;
            out.push(serde_json::from_slice(&bytes).map_err(warden_core::StoreError::from)?);
        }
        Ok(out)
    }

    pub fn list_alerts(&self, limit: usize) -> Result<Vec<EvalAlert>, RegressionError> {
        let tree = self.store.tree("eval_alerts")?;
        let mut out = Vec::new();
        for entry in tree.iter().rev().take(limit) {
            let (_, bytes) = entry.map_err(warden_core::StoreError::from)?;
            out.push(serde_json::from_slice(&bytes).map_err(warden_core::StoreError::from)?);
        }
        Ok(out)
    }

    fn latest_run_for(&self, suite: &str) -> Result<Option<EvalRun>, RegressionError> {
        Ok(self
            .list_runs(64)?
            .into_iter()
            .find(|run| run.suite == suite))
    }

    fn save_run(&self, run: &EvalRun) -> Result<(), RegressionError> {
        let tree = self.store.tree("eval_runs")?;
        Ok(put_json(&tree, be_key(run.id), run)?)
    }

    fn raise_alert(
        &self,
        run: &EvalRun,
        score: f64,
        min_threshold: f64,
    ) -> Result<(), RegressionError> {
        let alert = EvalAlert {
            id: self.store.next_id("eval_alerts")?,
            suite: run.suite.clone(),
            run_id: run.id,
            score,
            min_threshold,
            created_at: Utc::now(),
        };
        let tree = self.store.tree("eval_alerts")?;
        put_json(&tree, be_key(alert.id), &alert)?;
        warn!(
            target: "warden::evaluation",
            suite = %run.suite,
            score,
            min_threshold,
            "suite scored below threshold"
        );
        Ok(())
    }
}

/// Tagged evaluation backed by recorded scores: reads `eval_scores` at key
/// `{suite}/{tag}`, falling back to a default when no score was recorded.
pub struct StoredScoreSuite {
    store: Store,
    name: String,
    default_score: f64,
    min_threshold: Option<f64>,
}

impl StoredScoreSuite {
    pub fn new(store: Store, name: &str, default_score: f64, min_threshold: Option<f64>) -> Self {
        Self {
            store,
            name: name.to_string(),
            default_score,
            min_threshold,
        }
    }

    /// Record the score a tag should evaluate to.
    pub fn record_score(
        store: &Store,
        suite: &str,
        tag: &str,
        score: f64,
    ) -> Result<(), RegressionError> {
        let tree = store.tree("eval_scores")?;
        Ok(put_json(&tree, format!("{suite}/{tag}"), &score)?)
    }
}

impl Suite for StoredScoreSuite {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, tag: &str, _workspace_id: Option<&str>) -> Result<SuiteOutcome, RegressionError> {
        let tree = self.store.tree("eval_scores")?;
        let score: f64 =
            get_json(&tree, format!("{}/{tag}", self.name))?.unwrap_or(self.default_score);
        Ok(SuiteOutcome {
            score,
            total: 1,
            passed: u32::from(score >= self.min_threshold.unwrap_or(0.0)),
            failures: Vec::new(),
            min_threshold: self.min_threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harness_with_suite(min_threshold: Option<f64>) -> (EvaluationHarness, Store) {
        let store = Store::temp().unwrap();
        let harness = EvaluationHarness::new(store.clone());
        harness.register_suite(Arc::new(StoredScoreSuite::new(
            store.clone(),
            "linking",
            0.95,
            min_threshold,
        )));
        (harness, store)
    }

    #[test]
    fn unknown_suite_is_invalid_input() {
        let (harness, _store) = harness_with_suite(None);
        assert!(matches!(
            harness.run_suite("nope", "baseline:v1", None),
            Err(RegressionError::InvalidInput(_))
        ));
    }

    #[test]
    fn run_records_score_and_lifecycle() {
        let (harness, store) = harness_with_suite(None);
        StoredScoreSuite::record_score(&store, "linking", "candidate:v3", 0.91).unwrap();
        let run = harness.run_suite("linking", "candidate:v3", None).unwrap();
        assert_eq!(run.status, EvalRunStatus::Completed);
        assert_eq!(run.score, Some(0.91));
        assert!(run.finished_at.is_some());
        let fetched = harness.get_run(run.id).unwrap().unwrap();
        assert_eq!(fetched.score, Some(0.91));
        // Default score when the tag has no recorded value.
        let default_run = harness.run_suite("linking", "unseen", None).unwrap();
        assert_eq!(default_run.score, Some(0.95));
    }

    #[test]
    fn below_threshold_scores_raise_alerts() {
        let (harness, store) = harness_with_suite(Some(0.9));
        StoredScoreSuite::record_score(&store, "linking", "bad", 0.5).unwrap();
        harness.run_suite("linking", "bad", None).unwrap();
        let alerts = harness.list_alerts(10).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].score, 0.5);
        // A healthy score raises nothing further.
        harness.run_suite("linking", "unseen", None).unwrap();
        assert_eq!(harness.list_alerts(10).unwrap().len(), 1);
    }

    struct BrokenSuite;

    impl Suite for BrokenSuite {
        fn name(&self) -> &str {
            "broken"
        }
        fn run(&self, _: &str, _: Option<&str>) -> Result<SuiteOutcome, RegressionError> {
            Err(RegressionError::Suite("fixtures unavailable".into()))
        }
    }

    #[test]
    fn failed_suites_record_failed_runs_without_alerting() {
        let (harness, _store) = harness_with_suite(Some(0.9));
        harness.register_suite(Arc::new(BrokenSuite));
        let runs = harness.run_all_suites("baseline:v1", None);
        assert_eq!(runs.len(), 2);
        let failed = runs.iter().find(|r| r.suite == "broken").unwrap();
        assert_eq!(failed.status, EvalRunStatus::Failed);
        assert!(failed.error.as_ref().unwrap().contains("fixtures"));
        // Failed runs never alert.
        assert!(harness.list_alerts(10).unwrap().is_empty());
    }
}
