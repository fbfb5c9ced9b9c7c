//! Hydration records and their repositories.

use crate::HydrationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_core::{be_key, get_json, put_json, scan_json, Store};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Configured origin kinds for workspace documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    GoogleDrive,
    GoogleDrivePublic,
    ServerFs,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::GoogleDrive => "google_drive",
            SourceType::GoogleDrivePublic => "google_drive_public",
            SourceType::ServerFs => "server_fs",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HydrationTrigger {
    Scheduled,
    Manual,
    Api,
    Recovery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HydrationStatus {
    Idle,
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunItemAction {
    Skip,
    New,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunItemStatus {
    Pending,
    Linked,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Boq,
    Spec,
    Contract,
    Drawing,
    Report,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStatus {
    Pending,
    Extracted,
    Indexed,
    Linked,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Pending,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    Auth,
    Extraction,
    Indexing,
    Ule,
    Quota,
    System,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A configured document origin within a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSource {
    pub id: u64,
    pub workspace_id: String,
    pub source_type: SourceType,
    pub name: String,
    pub config: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets_ref: Option<String>,
    pub enabled: bool,
}

/// Per-source sync state. The cursor is an opaque per-source token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HydrationState {
    pub source_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
    pub status: HydrationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub consecutive_failures: u32,
}

impl HydrationState {
    pub fn idle(source_id: u64) -> Self {
        Self {
            source_id,
            cursor: None,
            last_run_at: None,
            next_run_at: None,
            status: HydrationStatus::Idle,
            last_error: None,
            consecutive_failures: 0,
        }
    }
}

/// An ingested document, unique per (workspace, source_type, source doc id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: u64,
    pub workspace_id: String,
    pub source_type: SourceType,
    pub source_document_id: String,
    pub source_path: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub doc_type: DocumentType,
    pub ingestion_status: IngestionStatus,
}

/// One immutable content version of a document. `version_num` is monotonic
/// per document; a new version exists iff the checksum changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentVersion {
    pub id: u64,
    pub document_id: u64,
    pub version_num: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_blob_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    #[serde(default)]
    pub extracted_structured: serde_json::Value,
    #[serde(default)]
    pub chunk_count: u32,
    pub embedding_status: VersionStatus,
    pub index_status: VersionStatus,
    pub link_status: VersionStatus,
}

/// Counters accumulated over one run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunCounters {
    pub files_seen: u32,
    pub files_new: u32,
    pub files_updated: u32,
    pub files_downloaded: u32,
    pub files_extracted: u32,
    pub files_indexed: u32,
    pub files_ule_processed: u32,
    pub files_failed: u32,
}

/// One invocation of the pipeline for a workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HydrationRun {
    pub id: u64,
    pub workspace_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub trigger: HydrationTrigger,
    pub status: RunStatus,
    pub sources_count: u32,
    #[serde(default)]
    pub counters: RunCounters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_summary: Option<String>,
}

/// Per-file record within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunItem {
    pub id: u64,
    pub run_id: u64,
    pub source_id: u64,
    pub source_document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<u64>,
    pub action: RunItemAction,
    pub status: RunItemStatus,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Operational alert raised by the pipeline or the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: u64,
    pub workspace_id: String,
    pub severity: AlertSeverity,
    pub category: AlertCategory,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<u64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<i64>,
}

/// Options for one pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HydrationOptions {
    pub trigger: HydrationTrigger,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ids: Option<Vec<u64>>,
    #[serde(default)]
    pub force_full_scan: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_files: Option<usize>,
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for HydrationOptions {
    fn default() -> Self {
        Self {
            trigger: HydrationTrigger::Scheduled,
            source_ids: None,
            force_full_scan: false,
            max_files: None,
            dry_run: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Repositories
// ---------------------------------------------------------------------------

/// Workspace source repository.
pub struct SourceRepo {
    store: Store,
}

impl SourceRepo {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn create(
        &self,
        workspace_id: &str,
        source_type: SourceType,
        name: &str,
        config: serde_json::Value,
        secrets_ref: Option<String>,
        enabled: bool,
    ) -> Result<WorkspaceSource, HydrationError> {
        let id = self.store.next_id("workspace_sources")?;
        let source = WorkspaceSource {
            id,
            workspace_id: workspace_id.to_string(),
            source_type,
            name: name.to_string(),
            config,
            secrets_ref,
            enabled,
        };
        let tree = self.store.tree("workspace_sources")?;
        put_json(&tree, be_key(id), &source)?;
        Ok(source)
    }

    pub fn get(&self, id: u64) -> Result<Option<WorkspaceSource>, HydrationError> {
        let tree = self.store.tree("workspace_sources")?;
        Ok(get_json(&tree, be_key(id))?)
    }

    pub fn update(&self, source: &WorkspaceSource) -> Result<(), HydrationError> {
        let tree = self.store.tree("workspace_sources")?;
        if tree
            .get(be_key(source.id))
            .map_err(warden_core::StoreError::from)?
            .is_none()
        {
            return Err(HydrationError::NotFound(format!("source {}", source.id)));
        }
        Ok(put_json(&tree, be_key(source.id), source)?)
    }

    pub fn delete(&self, id: u64) -> Result<bool, HydrationError> {
        let tree = self.store.tree("workspace_sources")?;
        Ok(tree
            .remove(be_key(id))
            .map_err(warden_core::StoreError::from)?
            .is_some())
    }

    pub fn list(&self) -> Result<Vec<WorkspaceSource>, HydrationError> {
        let tree = self.store.tree("workspace_sources")?;
        Ok(scan_json(&tree, [])?)
    }

    pub fn enabled_for_workspace(
        &self,
        workspace_id: &str,
    ) -> Result<Vec<WorkspaceSource>, HydrationError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|s| s.workspace_id == workspace_id && s.enabled)
            .collect())
    }

    pub fn enabled(&self) -> Result<Vec<WorkspaceSource>, HydrationError> {
        Ok(self.list()?.into_iter().filter(|s| s.enabled).collect())
    }
}

/// Hydration state repository, one row per source.
pub struct StateRepo {
    store: Store,
}

impl StateRepo {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn load_or_create(&self, source_id: u64) -> Result<HydrationState, HydrationError> {
        let tree = self.store.tree("hydration_states")?;
        match get_json(&tree, be_key(source_id))? {
            Some(state) => Ok(state),
            None => {
                let state = HydrationState::idle(source_id);
                put_json(&tree, be_key(source_id), &state)?;
                Ok(state)
            }
        }
    }

    pub fn save(&self, state: &HydrationState) -> Result<(), HydrationError> {
        let tree = self.store.tree("hydration_states")?;
        Ok(put_json(&tree, be_key(state.source_id), state)?)
    }

    pub fn get(&self, source_id: u64) -> Result<Option<HydrationState>, HydrationError> {
        let tree = self.store.tree("hydration_states")?;
        Ok(get_json(&tree, be_key(source_id))?)
    }
}

/// Documents and their versions.
pub struct DocumentRepo {
    store: Store,
}

impl DocumentRepo {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    fn unique_key(workspace_id: &str, source_type: SourceType, source_document_id: &str) -> String {
        format!("{workspace_id}|{}|{source_document_id}", source_type.as_str())
    }

    pub fn get(&self, id: u64) -> Result<Option<Document>, HydrationError> {
        let tree = self.store.tree("documents")?;
        Ok(get_json(&tree, be_key(id))?)
    }

    pub fn find(
        &self,
        workspace_id: &str,
        source_type: SourceType,
        source_document_id: &str,
    ) -> Result<Option<Document>, HydrationError> {
        let index = self.store.tree("documents_by_key")?;
        let key = Self::unique_key(workspace_id, source_type, source_document_id);
        let id: Option<u64> = get_json(&index, &key)?;
        match id {
            Some(id) => self.get(id),
            None => Ok(None),
        }
    }

    pub fn insert(&self, mut document: Document) -> Result<Document, HydrationError> {
        document.id = self.store.next_id("documents")?;
        let tree = self.store.tree("documents")?;
        put_json(&tree, be_key(document.id), &document)?;
        let index = self.store.tree("documents_by_key")?;
        let key = Self::unique_key(
            &document.workspace_id,
            document.source_type,
            &document.source_document_id,
        );
        put_json(&index, &key, &document.id)?;
        Ok(document)
    }

    pub fn save(&self, document: &Document) -> Result<(), HydrationError> {
        let tree = self.store.tree("documents")?;
        Ok(put_json(&tree, be_key(document.id), document)?)
    }

    pub fn list_for_workspace(&self, workspace_id: &str) -> Result<Vec<Document>, HydrationError> {
        let tree = self.store.tree("documents")?;
        let all: Vec<Document> = scan_json(&tree, [])?;
        Ok(all
            .into_iter()
            .filter(|d| d.workspace_id == workspace_id)
            .collect())
    }

    fn version_key(document_id: u64, version_num: u32) -> Vec<u8> {
        let mut key = document_id.to_be_bytes().to_vec();
        key.extend_from_slice(&version_num.to_be_bytes());
        key
    }

    pub fn latest_version(
        &self,
        document_id: u64,
    ) -> Result<Option<DocumentVersion>, HydrationError> {
        Ok(self.versions(document_id)?.pop())
    }

    pub fn versions(&self, document_id: u64) -> Result<Vec<DocumentVersion>, HydrationError> {
        let tree = self.store.tree("document_versions")?;
        Ok(scan_json(&tree, document_id.to_be_bytes())?)
    }

    /// Create the next version for a document (monotonic, contiguous from 1).
    pub fn create_version(
        &self,
        document_id: u64,
        modified_time: Option<DateTime<Utc>>,
        checksum: Option<String>,
    ) -> Result<DocumentVersion, HydrationError> {
        let version_num = self
            .latest_version(document_id)?
            .map(|v| v.version_num + 1)
            .unwrap_or(1);
        let version = DocumentVersion {
            id: self.store.next_id("document_versions")?,
            document_id,
            version_num,
            modified_time,
            checksum,
            raw_blob_ref: None,
            extracted_text: None,
            extracted_structured: serde_json::Value::Null,
            chunk_count: 0,
            embedding_status: VersionStatus::Pending,
            index_status: VersionStatus::Pending,
            link_status: VersionStatus::Pending,
        };
        self.save_version(&version)?;
        Ok(version)
    }

    pub fn save_version(&self, version: &DocumentVersion) -> Result<(), HydrationError> {
        let tree = self.store.tree("document_versions")?;
        Ok(put_json(
            &tree,
            Self::version_key(version.document_id, version.version_num),
            version,
        )?)
    }
}

/// Hydration runs and their items.
pub struct RunRepo {
    store: Store,
}

impl RunRepo {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn create(
        &self,
        workspace_id: &str,
        trigger: HydrationTrigger,
        sources_count: u32,
    ) -> Result<HydrationRun, HydrationError> {
        let run = HydrationRun {
            id: self.store.next_id("hydration_runs")?,
            workspace_id: workspace_id.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            trigger,
            status: RunStatus::Running,
            sources_count,
            counters: RunCounters::default(),
            error_summary: None,
        };
        self.save(&run)?;
        Ok(run)
    }

    pub fn save(&self, run: &HydrationRun) -> Result<(), HydrationError> {
        let tree = self.store.tree("hydration_runs")?;
        Ok(put_json(&tree, be_key(run.id), run)?)
    }

    pub fn get(&self, id: u64) -> Result<Option<HydrationRun>, HydrationError> {
        let tree = self.store.tree("hydration_runs")?;
        Ok(get_json(&tree, be_key(id))?)
    }

    /// Runs newest-first, optionally scoped to a workspace.
    pub fn list(
        &self,
        workspace_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<HydrationRun>, HydrationError> {
        let tree = self.store.tree("hydration_runs")?;
        let mut out = Vec::new();
        for entry in tree.iter().rev() {
            if out.len() >= limit {
                break;
            }
            let (_, bytes) = entry.map_err(warden_core::StoreError::from)?;
            let run: HydrationRun =
                serde_json::from_slice(&bytes).map_err(warden_core::StoreError::from)?;
            if workspace_id.map(|w| run.workspace_id == w).unwrap_or(true) {
                out.push(run);
            }
        }
        Ok(out)
    }

    pub fn create_item(
        &self,
        run_id: u64,
        source_id: u64,
        source_document_id: &str,
        action: RunItemAction,
    ) -> Result<RunItem, HydrationError> {
        let item = RunItem {
            id: self.store.next_id("hydration_run_items")?,
            run_id,
            source_id,
            source_document_id: source_document_id.to_string(),
            document_id: None,
            action,
            status: RunItemStatus::Pending,
            duration_ms: 0,
            details: serde_json::Value::Null,
            error_message: None,
        };
        self.save_item(&item)?;
        Ok(item)
    }

    pub fn save_item(&self, item: &RunItem) -> Result<(), HydrationError> {
        let tree = self.store.tree("hydration_run_items")?;
        let mut key = item.run_id.to_be_bytes().to_vec();
        key.extend_from_slice(&item.id.to_be_bytes());
        Ok(put_json(&tree, key, item)?)
    }

    pub fn items(&self, run_id: u64) -> Result<Vec<RunItem>, HydrationError> {
        let tree = self.store.tree("hydration_run_items")?;
        Ok(scan_json(&tree, run_id.to_be_bytes())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_unique_key_lookup() {
        let store = Store::temp().unwrap();
        let docs = DocumentRepo::new(store);
        let inserted = docs
            .insert(Document {
                id: 0,
                workspace_id: "ws1".into(),
                source_type: SourceType::ServerFs,
                source_document_id: "a.txt".into(),
                source_path: "/srv/a.txt".into(),
                name: "a.txt".into(),
                mime_type: Some("text/plain".into()),
                size_bytes: Some(3),
                modified_time: None,
                checksum: Some("abc".into()),
                doc_type: DocumentType::Other,
                ingestion_status: IngestionStatus::Pending,
            })
            .unwrap();
        assert!(inserted.id > 0);
        let found = docs
            .find("ws1", SourceType::ServerFs, "a.txt")
            .unwrap()
            .unwrap();
        assert_eq!(found.id, inserted.id);
        assert!(docs.find("ws2", SourceType::ServerFs, "a.txt").unwrap().is_none());
    }

    #[test]
    fn version_numbers_are_contiguous_from_one() {
        let store = Store::temp().unwrap();
        let docs = DocumentRepo::new(store);
        let doc = docs
            .insert(Document {
                id: 0,
                workspace_id: "ws1".into(),
                source_type: SourceType::ServerFs,
                source_document_id: "a.txt".into(),
                source_path: "/srv/a.txt".into(),
                name: "a.txt".into(),
                mime_type: None,
                size_bytes: None,
                modified_time: None,
                checksum: None,
                doc_type: DocumentType::Other,
                ingestion_status: IngestionStatus::Pending,
            })
            .unwrap();
        let v1 = docs.create_version(doc.id, None, Some("abc".into())).unwrap();
        let v2 = docs.create_version(doc.id, None, Some("def".into())).unwrap();
        assert_eq!(v1.version_num, 1);
        assert_eq!(v2.version_num, 2);
        let versions = docs.versions(doc.id).unwrap();
        assert_eq!(
            versions.iter().map(|v| v.version_num).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(docs.latest_version(doc.id).unwrap().unwrap().version_num, 2);
    }

    #[test]
    fn run_listing_is_newest_first_and_scoped() {
        let store = Store::temp().unwrap();
        let runs = RunRepo::new(store);
        runs.create("ws1", HydrationTrigger::Manual, 1).unwrap();
        runs.create("ws2", HydrationTrigger::Api, 1).unwrap();
        runs.create("ws1", HydrationTrigger::Scheduled, 1).unwrap();
        let all = runs.list(None, 10).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all[0].id > all[1].id);
        let ws1 = runs.list(Some("ws1"), 10).unwrap();
        assert_eq!(ws1.len(), 2);
    }

    #[test]
    fn state_load_or_create_is_stable() {
        let store = Store::temp().unwrap();
        let states = StateRepo::new(store);
        let first = states.load_or_create(7).unwrap();
        assert_eq!(first.status, HydrationStatus::Idle);
        let mut updated = first.clone();
        updated.status = HydrationStatus::Success;
        updated.consecutive_failures = 0;
        states.save(&updated).unwrap();
        let reloaded = states.load_or_create(7).unwrap();
        assert_eq!(reloaded.status, HydrationStatus::Success);
    }
}
