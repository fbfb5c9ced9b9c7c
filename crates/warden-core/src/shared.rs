//! Shared identity types and the backplane event stream.

use crate::store::{get_json, put_json, scan_json, Store, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Global roles, ordered loosely by privilege. Snake-cased on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Director,
    Engineer,
    Commercial,
    SafetyOfficer,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Director => "director",
            Role::Engineer => "engineer",
            Role::Commercial => "commercial",
            Role::SafetyOfficer => "safety_officer",
            Role::Viewer => "viewer",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "director" => Ok(Role::Director),
            "engineer" => Ok(Role::Engineer),
            "commercial" => Ok(Role::Commercial),
            "safety_officer" => Ok(Role::SafetyOfficer),
            "viewer" => Ok(Role::Viewer),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An identified acting subject (user or service). Immutable for policy
/// purposes except the role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
}

/// A governed project. The PDP keys ACLs on this id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
}

/// Principal repository over the `principals` tree.
pub struct PrincipalRepo {
    store: Store,
}

impl PrincipalRepo {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn upsert(&self, principal: &Principal) -> Result<(), StoreError> {
        let tree = self.store.tree("principals")?;
        put_json(&tree, principal.id.to_be_bytes(), principal)
    }

    pub fn get(&self, id: i64) -> Result<Option<Principal>, StoreError> {
        let tree = self.store.tree("principals")?;
        get_json(&tree, id.to_be_bytes())
    }

    pub fn list(&self) -> Result<Vec<Principal>, StoreError> {
        let tree = self.store.tree("principals")?;
        scan_json(&tree, [])
    }
}

/// Project repository over the `projects` tree.
pub struct ProjectRepo {
    store: Store,
}

impl ProjectRepo {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn upsert(&self, project: &Project) -> Result<(), StoreError> {
        let tree = self.store.tree("projects")?;
        put_json(&tree, project.id.to_be_bytes(), project)
    }

    pub fn get(&self, id: i64) -> Result<Option<Project>, StoreError> {
        let tree = self.store.tree("projects")?;
        get_json(&tree, id.to_be_bytes())
    }

    pub fn list(&self) -> Result<Vec<Project>, StoreError> {
        let tree = self.store.tree("projects")?;
        scan_json(&tree, [])
    }
}

/// One backplane event (e.g. `regression.approved`). Appended to the
/// `events` tree and optionally forwarded to a webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackplaneEvent {
    pub event_type: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<i64>,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

/// Appends events and forwards them to the configured webhook without
/// blocking the caller.
#[derive(Clone)]
pub struct EventEmitter {
    store: Store,
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl EventEmitter {
    pub fn new(store: Store, webhook_url: Option<String>) -> Self {
        Self {
            store,
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn emit(&self, event: BackplaneEvent) -> Result<u64, StoreError> {
        let seq = self.store.next_id("events")?;
        let tree = self.store.tree("events")?;
        put_json(&tree, seq.to_be_bytes(), &event)?;
        debug!(
            target: "warden::events",
            seq,
            event_type = %event.event_type,
            source = %event.source,
            "event recorded"
        );

        if let Some(url) = self.webhook_url.clone() {
            let client = self.client.clone();
            let body = serde_json::to_value(&event).unwrap_or_default();
            tokio::spawn(async move {
                if let Err(err) = client.post(&url).json(&body).send().await {
                    warn!(target: "warden::events", error = %err, "event webhook delivery failed");
                }
            });
        }
        Ok(seq)
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<BackplaneEvent>, StoreError> {
        let tree = self.store.tree("events")?;
        let mut out = Vec::new();
        for entry in tree.iter().rev().take(limit) {
            let (_, bytes) = entry?;
            out.push(serde_json::from_slice(&bytes)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_snake_case() {
        let role: Role = "safety_officer".parse().unwrap();
        assert_eq!(role, Role::SafetyOfficer);
        assert_eq!(role.to_string(), "safety_officer");
        assert!("overlord".parse::<Role>().is_err());
    }

    #[test]
    fn principal_repo_upserts_and_lists() {
        let store = Store::temp().unwrap();
        let repo = PrincipalRepo::new(store);
        repo.upsert(&Principal {
            id: 1,
            name: "Root Admin".into(),
            email: "admin@example.com".into(),
            role: Role::Admin,
        })
        .unwrap();
        repo.upsert(&Principal {
            id: 2,
            name: "Site Engineer".into(),
            email: "eng@example.com".into(),
            role: Role::Engineer,
        })
        .unwrap();
        assert_eq!(repo.get(1).unwrap().unwrap().role, Role::Admin);
        assert_eq!(repo.list().unwrap().len(), 2);
        assert!(repo.get(9).unwrap().is_none());
    }
}
