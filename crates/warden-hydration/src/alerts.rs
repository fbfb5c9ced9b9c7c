//! Operational alerts raised by the pipeline, the scheduler, and the
//! linking hook.

use crate::models::{Alert, AlertCategory, AlertSeverity};
use crate::HydrationError;
use chrono::Utc;
use tracing::warn;
use warden_core::{be_key, get_json, put_json, Store};

const TREE: &str = "hydration_alerts";

pub struct AlertManager {
    store: Store,
}

impl AlertManager {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn create_alert(
        &self,
        workspace_id: &str,
        severity: AlertSeverity,
        category: AlertCategory,
        message: &str,
        run_id: Option<u64>,
    ) -> Result<Alert, HydrationError> {
        let alert = Alert {
            id: self.store.next_id("hydration_alerts")?,
            workspace_id: workspace_id.to_string(),
            severity,
            category,
            message: message.to_string(),
            run_id,
            is_active: true,
            created_at: Utc::now(),
            acknowledged_at: None,
            acknowledged_by: None,
        };
        let tree = self.store.tree(TREE)?;
        put_json(&tree, be_key(alert.id), &alert)?;
        warn!(
            target: "warden::hydration",
            workspace = workspace_id,
            category = ?category,
            message,
            "hydration alert raised"
        );
        Ok(alert)
    }

    pub fn acknowledge(&self, id: u64, principal_id: i64) -> Result<Alert, HydrationError> {
        let tree = self.store.tree(TREE)?;
        let mut alert: Alert = get_json(&tree, be_key(id))?
            .ok_or_else(|| HydrationError::NotFound(format!("alert {id}")))?;
        alert.is_active = false;
        alert.acknowledged_at = Some(Utc::now());
        alert.acknowledged_by = Some(principal_id);
        put_json(&tree, be_key(id), &alert)?;
        Ok(alert)
    }

    /// Alerts newest-first; `active_only` filters acknowledged ones out.
    pub fn list(
        &self,
        workspace_id: Option<&str>,
        active_only: bool,
        limit: usize,
    ) -> Result<Vec<Alert>, HydrationError> {
        let tree = self.store.tree(TREE)?;
        let mut out = Vec::new();
        for entry in tree.iter().rev() {
            if out.len() >= limit {
                break;
            }
            let (_, bytes) = entry.map_err(warden_core::StoreError::from)?;
            let alert: Alert =
                serde_json::from_slice(&bytes).map_err(warden_core::StoreError::from)?;
            if active_only && !alert.is_active {
                continue;
            }
            if workspace_id.map(|w| alert.workspace_id == w).unwrap_or(true) {
                out.push(alert);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acknowledge_deactivates() {
        let alerts = AlertManager::new(Store::temp().unwrap());
        let alert = alerts
            .create_alert("ws1", AlertSeverity::Warn, AlertCategory::Extraction, "boom", Some(3))
            .unwrap();
        assert!(alert.is_active);

        let acked = alerts.acknowledge(alert.id, 10).unwrap();
        assert!(!acked.is_active);
        assert_eq!(acked.acknowledged_by, Some(10));

        assert!(alerts.list(Some("ws1"), true, 10).unwrap().is_empty());
        assert_eq!(alerts.list(Some("ws1"), false, 10).unwrap().len(), 1);
        assert!(matches!(
            alerts.acknowledge(999, 10),
            Err(HydrationError::NotFound(_))
        ));
    }
}
