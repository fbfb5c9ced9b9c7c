//! Access control lists: project grants with expiry and global-role
//! fallbacks.

use crate::models::AclEntry;
use crate::PdpError;
use chrono::{DateTime, Utc};
use warden_core::{get_json, put_json, PrincipalRepo, ProjectRepo, Role, Store};

const TREE: &str = "acls";

/// All known permission atoms.
pub const PERMISSIONS: [&str; 6] = ["read", "write", "execute", "export", "delete", "admin"];

/// Fixed role → permission expansion.
pub fn role_permissions(role: Role) -> &'static [&'static str] {
    match role {
        Role::Admin => &["read", "write", "execute", "export", "delete", "admin"],
        Role::Director => &["read", "write", "execute", "export"],
        Role::Engineer => &["read", "write", "execute"],
        Role::Commercial => &["read", "write", "export"],
        Role::SafetyOfficer => &["read", "write"],
        Role::Viewer => &["read"],
    }
}

/// Manages ACL entries keyed by (principal, project).
pub struct AclManager {
    store: Store,
    principals: PrincipalRepo,
    projects: ProjectRepo,
}

impl AclManager {
    pub fn new(store: Store) -> Self {
        let principals = PrincipalRepo::new(store.clone());
        let projects = ProjectRepo::new(store.clone());
        Self {
            store,
            principals,
            projects,
        }
    }

    fn key(principal_id: i64, project_id: i64) -> String {
        format!("{principal_id}/{project_id}")
    }

    /// Grant `principal_id` access to `project_id` with `role`. Upserts the
    /// single entry per (principal, project); permissions are the role
    /// expansion.
    pub fn grant(
        &self,
        principal_id: i64,
        project_id: i64,
        role: Role,
        granted_by: Option<i64>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<AclEntry, PdpError> {
        if self.principals.get(principal_id)?.is_none() {
            return Err(PdpError::NotFound(format!("principal {principal_id}")));
        }
        if self.projects.get(project_id)?.is_none() {
            return Err(PdpError::NotFound(format!("project {project_id}")));
        }

        let tree = self.store.tree(TREE)?;
        let key = Self::key(principal_id, project_id);
        let id = match get_json::<AclEntry>(&tree, &key)? {
            Some(existing) => existing.id,
            None => self.store.next_id("acls")?,
        };
        let entry = AclEntry {
            id,
            principal_id,
            project_id,
            role,
            permissions: role_permissions(role).iter().map(|p| p.to_string()).collect(),
            granted_by,
            granted_at: Utc::now(),
            expires_at,
        };
        put_json(&tree, &key, &entry)?;
        Ok(entry)
    }

    /// Remove the grant. Returns false when no grant existed.
    pub fn revoke(&self, principal_id: i64, project_id: i64) -> Result<bool, PdpError> {
        let tree = self.store.tree(TREE)?;
        Ok(tree
            .remove(Self::key(principal_id, project_id))
            .map_err(warden_core::StoreError::from)?
            .is_some())
    }

    /// The stored entry regardless of expiry. Rules use this to distinguish
    /// "expired" from "never granted".
    pub fn raw_entry(
        &self,
        principal_id: i64,
        project_id: i64,
    ) -> Result<Option<AclEntry>, PdpError> {
        let tree = self.store.tree(TREE)?;
        Ok(get_json(&tree, Self::key(principal_id, project_id))?)
    }

    /// The non-expired entry for (principal, project), if any.
    pub fn entry(
        &self,
        principal_id: i64,
        project_id: i64,
    ) -> Result<Option<AclEntry>, PdpError> {
        let tree = self.store.tree(TREE)?;
        let entry: Option<AclEntry> = get_json(&tree, Self::key(principal_id, project_id))?;
        Ok(entry.filter(|e| !e.is_expired(Utc::now())))
    }

    /// Effective permissions for a principal on a project. Falls back to the
    /// global role expansion for admins and directors without explicit
    /// grants; expired grants read as empty.
    pub fn permissions(
        &self,
        principal_id: i64,
        project_id: i64,
    ) -> Result<Vec<String>, PdpError> {
        if let Some(entry) = self.entry(principal_id, project_id)? {
            return Ok(entry.permissions);
        }
        if let Some(principal) = self.principals.get(principal_id)? {
            if matches!(principal.role, Role::Admin | Role::Director) {
                return Ok(role_permissions(principal.role)
                    .iter()
                    .map(|p| p.to_string())
                    .collect());
            }
        }
        Ok(Vec::new())
    }

    /// Whether the principal holds `permission` on the project. A global
    /// admin role, or the `admin` permission atom, implies everything.
    pub fn check_permission(
        &self,
        principal_id: i64,
        project_id: i64,
        permission: &str,
    ) -> Result<bool, PdpError> {
        if let Some(principal) = self.principals.get(principal_id)? {
            if principal.role == Role::Admin {
                return Ok(true);
            }
        }
        let permissions = self.permissions(principal_id, project_id)?;
        Ok(permissions.iter().any(|p| p == permission || p == "admin"))
    }

    /// Project ids the principal can reach: explicit non-expired grants,
    /// plus every project for implicit global admins/directors.
    pub fn projects_for(&self, principal_id: i64) -> Result<Vec<i64>, PdpError> {
        if let Some(principal) = self.principals.get(principal_id)? {
            if matches!(principal.role, Role::Admin | Role::Director) {
                return Ok(self.projects.list()?.into_iter().map(|p| p.id).collect());
            }
        }
        let tree = self.store.tree(TREE)?;
        let prefix = format!("{principal_id}/");
        let now = Utc::now();
        let entries: Vec<AclEntry> = warden_core::scan_json(&tree, &prefix)?;
        Ok(entries
            .into_iter()
            .filter(|e| !e.is_expired(now))
            .map(|e| e.project_id)
            .collect())
    }

    /// Principal ids with access to a project: explicit non-expired grants,
    /// plus implicit global admins/directors.
    pub fn principals_for(&self, project_id: i64) -> Result<Vec<i64>, PdpError> {
        let tree = self.store.tree(TREE)?;
        let now = Utc::now();
        let mut ids: Vec<i64> = Vec::new();
        for entry in warden_core::scan_json::<AclEntry>(&tree, [])? {
            if entry.project_id == project_id && !entry.is_expired(now) {
                ids.push(entry.principal_id);
            }
        }
        for principal in self.principals.list()? {
            if matches!(principal.role, Role::Admin | Role::Director)
                && !ids.contains(&principal.id)
            {
                ids.push(principal.id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::{Principal, Project};

    fn fixture() -> (AclManager, Store) {
        let store = Store::temp().unwrap();
        let principals = PrincipalRepo::new(store.clone());
        let projects = ProjectRepo::new(store.clone());
        for (id, role) in [
            (1, Role::Admin),
            (2, Role::Engineer),
            (3, Role::Viewer),
            (4, Role::Director),
        ] {
            principals
                .upsert(&Principal {
                    id,
                    name: format!("user-{id}"),
                    email: format!("user{id}@example.com"),
                    role,
                })
                .unwrap();
        }
        projects
            .upsert(&Project {
                id: 101,
                name: "North Tower".into(),
            })
            .unwrap();
        (AclManager::new(store.clone()), store)
    }

    #[test]
    fn grant_expands_role_permissions() {
        let (acls, _store) = fixture();
        let entry = acls.grant(2, 101, Role::Engineer, Some(1), None).unwrap();
        assert_eq!(entry.permissions, vec!["read", "write", "execute"]);
        assert_eq!(acls.permissions(2, 101).unwrap(), entry.permissions);
    }

    #[test]
    fn grant_requires_existing_principal_and_project() {
        let (acls, _store) = fixture();
        assert!(matches!(
            acls.grant(99, 101, Role::Viewer, None, None),
            Err(PdpError::NotFound(_))
        ));
        assert!(matches!(
            acls.grant(2, 999, Role::Viewer, None, None),
            Err(PdpError::NotFound(_))
        ));
    }

    #[test]
    fn expired_grant_reads_as_absent() {
        let (acls, _store) = fixture();
        acls.grant(
            3,
            101,
            Role::Viewer,
            None,
            Some(Utc::now() - chrono::Duration::hours(1)),
        )
        .unwrap();
        assert!(acls.permissions(3, 101).unwrap().is_empty());
        assert!(acls.entry(3, 101).unwrap().is_none());
        assert!(acls.projects_for(3).unwrap().is_empty());
    }

    #[test]
    fn regrant_upserts_single_entry() {
        let (acls, _store) = fixture();
        let first = acls.grant(2, 101, Role::Viewer, None, None).unwrap();
        let second = acls.grant(2, 101, Role::Engineer, None, None).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(acls.permissions(2, 101).unwrap(), vec!["read", "write", "execute"]);
    }

    #[test]
    fn admin_and_director_fall_back_to_global_role() {
        let (acls, _store) = fixture();
        assert!(acls.permissions(1, 101).unwrap().contains(&"admin".to_string()));
        assert_eq!(
            acls.permissions(4, 101).unwrap(),
            vec!["read", "write", "execute", "export"]
        );
        // Viewer gets nothing without an explicit grant.
        assert!(acls.permissions(3, 101).unwrap().is_empty());
    }

    #[test]
    fn check_permission_admin_implies_all() {
        let (acls, _store) = fixture();
        assert!(acls.check_permission(1, 101, "delete").unwrap());
        acls.grant(2, 101, Role::Engineer, None, None).unwrap();
        assert!(acls.check_permission(2, 101, "write").unwrap());
        assert!(!acls.check_permission(2, 101, "export").unwrap());
    }

    #[test]
    fn membership_listings_include_implicit_globals() {
        let (acls, _store) = fixture();
        acls.grant(2, 101, Role::Engineer, None, None).unwrap();
        let principals = acls.principals_for(101).unwrap();
        assert!(principals.contains(&1)); // global admin
        assert!(principals.contains(&2)); // explicit grant
        assert!(principals.contains(&4)); // global director
        assert!(!principals.contains(&3));

        assert_eq!(acls.projects_for(2).unwrap(), vec![101]);
        assert_eq!(acls.projects_for(1).unwrap(), vec![101]);
    }

    #[test]
    fn revoke_removes_the_grant() {
        let (acls, _store) = fixture();
        acls.grant(2, 101, Role::Engineer, None, None).unwrap();
        assert!(acls.revoke(2, 101).unwrap());
        assert!(!acls.revoke(2, 101).unwrap());
        assert!(acls.permissions(2, 101).unwrap().is_empty());
    }
}
