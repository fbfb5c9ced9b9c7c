//! Append-only decision log with filtered queries, aggregates, and
//! retention cleanup.
//!
//! Records are keyed by a monotonic id, so reverse key order gives the
//! required ordering (timestamp descending, id as tie-break).

use crate::models::{AuditRecord, Decision};
use crate::PdpError;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use warden_core::{be_key, put_json, Store};

const TREE: &str = "audit";

/// Query filter; all fields are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub principal_id: Option<i64>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub decision: Option<Decision>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Aggregate view over the audit trail.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AuditStatistics {
    pub total: usize,
    pub denials: usize,
    pub denial_rate: f64,
    pub top_principals: Vec<(i64, usize)>,
    pub top_actions: Vec<(String, usize)>,
    pub top_resources: Vec<(String, usize)>,
}

pub struct AuditLogger {
    store: Store,
}

impl AuditLogger {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Append one decision record with a server timestamp.
    #[allow(clippy::too_many_arguments)]
    pub fn log(
        &self,
        principal_id: Option<i64>,
        action: &str,
        resource_type: Option<&str>,
        resource_id: Option<&str>,
        decision: Decision,
        metadata: serde_json::Value,
        ip_address: Option<&str>,
    ) -> Result<AuditRecord, PdpError> {
        let id = self.store.next_id("audit")?;
        let record = AuditRecord {
            id,
            principal_id,
            action: action.to_string(),
            resource_type: resource_type.map(str::to_string),
            resource_id: resource_id.map(str::to_string),
            decision,
            metadata,
            ip_address: ip_address.map(str::to_string),
            timestamp: Utc::now(),
        };
        let tree = self.store.tree(TREE)?;
        put_json(&tree, be_key(id), &record)?;
        Ok(record)
    }

    /// Query records newest-first.
    pub fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, PdpError> {
        let tree = self.store.tree(TREE)?;
        let limit = filter.limit.unwrap_or(usize::MAX);
        let mut out = Vec::new();
        for entry in tree.iter().rev() {
            if out.len() >= limit {
                break;
            }
            let (_, bytes) = entry.map_err(warden_core::StoreError::from)?;
            let record: AuditRecord =
                serde_json::from_slice(&bytes).map_err(warden_core::StoreError::from)?;
            if let Some(principal_id) = filter.principal_id {
                if record.principal_id != Some(principal_id) {
                    continue;
                }
            }
            if let Some(action) = &filter.action {
                if &record.action != action {
                    continue;
                }
            }
            if let Some(resource_type) = &filter.resource_type {
                if record.resource_type.as_deref() != Some(resource_type.as_str()) {
                    continue;
                }
            }
            if let Some(decision) = filter.decision {
                if record.decision != decision {
                    continue;
                }
            }
            if let Some(since) = filter.since {
                if record.timestamp < since {
                    continue;
                }
            }
            if let Some(until) = filter.until {
                if record.timestamp > until {
                    continue;
                }
            }
            out.push(record);
        }
        Ok(out)
    }

    /// Denial rate and top principals/actions/resources.
    pub fn statistics(&self, top_n: usize) -> Result<AuditStatistics, PdpError> {
        let records = self.query(&AuditFilter::default())?;
        let total = records.len();
        let denials = records
            .iter()
            .filter(|r| !matches!(r.decision, Decision::Allow))
            .count();

        let mut principals: BTreeMap<i64, usize> = BTreeMap::new();
        let mut actions: BTreeMap<String, usize> = BTreeMap::new();
        let mut resources: BTreeMap<String, usize> = BTreeMap::new();
        for record in &records {
            if let Some(principal_id) = record.principal_id {
                *principals.entry(principal_id).or_default() += 1;
            }
            *actions.entry(record.action.clone()).or_default() += 1;
            if let Some(resource) = &record.resource_type {
                *resources.entry(resource.clone()).or_default() += 1;
            }
        }

        Ok(AuditStatistics {
            total,
            denials,
            denial_rate: if total == 0 {
                0.0
            } else {
                denials as f64 / total as f64
            },
            top_principals: top_of(principals, top_n),
            top_actions: top_of(actions, top_n),
            top_resources: top_of(resources, top_n),
        })
    }

    /// Delete records older than `days`. Returns the number removed.
    pub fn cleanup(&self, days: i64) -> Result<usize, PdpError> {
        let cutoff = Utc::now() - Duration::days(days);
        let tree = self.store.tree(TREE)?;
        let mut stale = Vec::new();
        for entry in tree.iter() {
            let (key, bytes) = entry.map_err(warden_core::StoreError::from)?;
            let record: AuditRecord =
                serde_json::from_slice(&bytes).map_err(warden_core::StoreError::from)?;
            if record.timestamp < cutoff {
                stale.push(key);
            }
        }
        let mut deleted = 0;
        for key in stale {
            if tree
                .remove(key)
                .map_err(warden_core::StoreError::from)?
                .is_some()
            {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

fn top_of<K: Clone>(counts: BTreeMap<K, usize>, top_n: usize) -> Vec<(K, usize)> {
    let mut entries: Vec<(K, usize)> = counts.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1));
    entries.truncate(top_n);
    entries
}
