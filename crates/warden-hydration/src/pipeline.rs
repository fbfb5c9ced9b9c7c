//! Pipeline orchestration: run → sources → items.
//!
//! Per-item failures are contained: recorded on the run item, surfaced as an
//! alert, and the run continues with `partial` status. Source-level failures
//! land in the run's error summary and bump the source's consecutive failure
//! count. Version creation is checksum-gated, which makes re-runs idempotent.

use crate::alerts::AlertManager;
use crate::connectors::{Connector, ConnectorRegistry, ItemMetadata, SourceItem};
use crate::extractors::{extract, NoOcr, OcrEngine};
use crate::indexing::IndexingClient;
use crate::models::{
    Document, DocumentRepo, DocumentType, DocumentVersion, HydrationOptions, HydrationRun,
    HydrationStatus, IngestionStatus, RunItem, RunItemAction, RunItemStatus, RunRepo,
    RunStatus, SourceRepo, StateRepo, VersionStatus, WorkspaceSource,
};
use crate::ule_hook::UleHook;
use crate::{AlertCategory, AlertSeverity, HydrationError};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use warden_core::{workspace_lock_key, LockManager, Store, WORKSPACE_LOCK_TTL_SECS};

const MAX_CHUNK_LENGTH: usize = 800;

pub struct HydrationPipeline {
    sources: SourceRepo,
    states: StateRepo,
    documents: DocumentRepo,
    runs: RunRepo,
    alerts: AlertManager,
    connectors: ConnectorRegistry,
    indexing: Arc<dyn IndexingClient>,
    ule: Arc<dyn UleHook>,
    locks: Arc<LockManager>,
    ocr: Arc<dyn OcrEngine>,
    ocr_enabled: bool,
}

impl HydrationPipeline {
    pub fn new(
        store: Store,
        locks: Arc<LockManager>,
        connectors: ConnectorRegistry,
        indexing: Arc<dyn IndexingClient>,
        ule: Arc<dyn UleHook>,
        ocr_enabled: bool,
    ) -> Self {
        Self {
            sources: SourceRepo::new(store.clone()),
            states: StateRepo::new(store.clone()),
            documents: DocumentRepo::new(store.clone()),
            runs: RunRepo::new(store.clone()),
            alerts: AlertManager::new(store),
            connectors,
            indexing,
            ule,
            locks,
            ocr: Arc::new(NoOcr),
            ocr_enabled,
        }
    }

    pub fn with_ocr(mut self, ocr: Arc<dyn OcrEngine>) -> Self {
        self.ocr = ocr;
        self
    }

    /// Hydrate a workspace, acquiring its lock for the duration.
    pub async fn hydrate_workspace(
        &self,
        workspace_id: &str,
        options: &HydrationOptions,
    ) -> Result<HydrationRun, HydrationError> {
        self.hydrate_with_lock(workspace_id, options, None).await
    }

    /// Hydrate with an optionally pre-acquired lock token (the scheduler
    /// holds the lock before gating on the PDP).
    pub async fn hydrate_with_lock(
        &self,
        workspace_id: &str,
        options: &HydrationOptions,
        held_token: Option<&str>,
    ) -> Result<HydrationRun, HydrationError> {
        let mut sources = self.sources.enabled_for_workspace(workspace_id)?;
        if let Some(ids) = &options.source_ids {
            sources.retain(|s| ids.contains(&s.id));
        }
        if sources.is_empty() {
            return Err(HydrationError::NoSources(workspace_id.to_string()));
        }

        let mut run = self
            .runs
            .create(workspace_id, options.trigger, sources.len() as u32)?;

        let lock_key = workspace_lock_key(workspace_id);
        let owned_token = match held_token {
            Some(token) => {
                self.locks.extend(&lock_key, token, WORKSPACE_LOCK_TTL_SECS);
                None
            }
            None => match self.locks.acquire(&lock_key, WORKSPACE_LOCK_TTL_SECS) {
                Some(token) => Some(token),
                None => {
                    self.alerts.create_alert(
                        workspace_id,
                        AlertSeverity::Warn,
                        AlertCategory::Auth,
                        "Hydration skipped: workspace lock held by another run",
                        Some(run.id),
                    )?;
                    run.status = RunStatus::Failed;
                    run.error_summary = Some("workspace lock held by another run".to_string());
                    run.finished_at = Some(Utc::now());
                    self.runs.save(&run)?;
                    return Ok(run);
                }
            },
        };

        for source in &sources {
            if let Err(err) = self.hydrate_source(source, &mut run, options).await {
                error!(
                    target: "warden::hydration",
                    source = source.id,
                    error = %err,
                    "hydration source failed"
                );
                run.counters.files_failed += 1;
                run.status = RunStatus::Partial;
                run.error_summary = Some(err.to_string());
                self.alerts.create_alert(
                    workspace_id,
                    AlertSeverity::Warn,
                    AlertCategory::System,
                    &format!("Hydration source {} failed: {err}", source.name),
                    Some(run.id),
                )?;
                let mut state = self.states.load_or_create(source.id)?;
                state.status = HydrationStatus::Failed;
                state.last_error = Some(err.to_string());
                state.consecutive_failures += 1;
                self.states.save(&state)?;
            }
        }

        if run.status == RunStatus::Running {
            run.status = RunStatus::Success;
        }
        run.finished_at = Some(Utc::now());
        self.runs.save(&run)?;

        if let Some(token) = owned_token {
            self.locks.release(&lock_key, &token);
        }

        info!(
            target: "warden::hydration",
            workspace = workspace_id,
            run = run.id,
            status = ?run.status,
            seen = run.counters.files_seen,
            new = run.counters.files_new,
            failed = run.counters.files_failed,
            "hydration run finished"
        );
        Ok(run)
    }

    async fn hydrate_source(
        &self,
        source: &WorkspaceSource,
        run: &mut HydrationRun,
        options: &HydrationOptions,
    ) -> Result<(), HydrationError> {
        let mut state = self.states.load_or_create(source.id)?;
        state.status = HydrationStatus::Running;
        state.last_error = None;
        self.states.save(&state)?;

        let connector = self.connectors.connect(
            source.source_type,
            &source.config,
            source.secrets_ref.as_deref(),
        )?;

        let cursor = if options.force_full_scan {
            None
        } else {
            state.cursor.clone()
        };
        let (items, new_cursor) = connector.list_changes(cursor).await?;

        let cap = options.max_files.unwrap_or(items.len());
        for item in items.iter().take(cap) {
            run.counters.files_seen += 1;
            self.process_item(item, source, run, connector.as_ref(), options)
                .await?;
            self.runs.save(run)?;
        }

        let mut state = self.states.load_or_create(source.id)?;
        if new_cursor.is_some() {
            state.cursor = new_cursor;
        }
        state.last_run_at = Some(Utc::now());
        if run.status == RunStatus::Failed {
            state.status = HydrationStatus::Failed;
            state.consecutive_failures += 1;
        } else {
            state.status = HydrationStatus::Success;
            state.consecutive_failures = 0;
        }
        self.states.save(&state)?;
        Ok(())
    }

    /// Handle one item. Domain failures are contained here; only storage
    /// errors propagate (and then fail the source).
    async fn process_item(
        &self,
        item: &SourceItem,
        source: &WorkspaceSource,
        run: &mut HydrationRun,
        connector: &dyn Connector,
        options: &HydrationOptions,
    ) -> Result<(), HydrationError> {
        let started = Instant::now();
        let metadata = match connector.get_metadata(item) {
            Ok(metadata) => metadata,
            Err(err) => {
                let mut run_item =
                    self.runs
                        .create_item(run.id, source.id, "unknown", RunItemAction::New)?;
                self.fail_item(
                    run,
                    &mut run_item,
                    &source.workspace_id,
                    AlertCategory::Extraction,
                    &err,
                )?;
                return Ok(());
            }
        };

        let action = if metadata.removed {
            RunItemAction::Delete
        } else {
            RunItemAction::New
        };
        let mut run_item =
            self.runs
                .create_item(run.id, source.id, &metadata.source_document_id, action)?;

        let outcome = self
            .ingest_item(item, source, run, connector, options, &metadata, &mut run_item)
            .await;

        match outcome {
            Ok(()) => {
                run_item.duration_ms = started.elapsed().as_millis() as u64;
                self.runs.save_item(&run_item)?;
                Ok(())
            }
            Err((category, err)) => {
                run_item.duration_ms = started.elapsed().as_millis() as u64;
                self.fail_item(run, &mut run_item, &source.workspace_id, category, &err)?;
                Ok(())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn ingest_item(
        &self,
        item: &SourceItem,
        source: &WorkspaceSource,
        run: &mut HydrationRun,
        connector: &dyn Connector,
        options: &HydrationOptions,
        metadata: &ItemMetadata,
        run_item: &mut RunItem,
    ) -> Result<(), (AlertCategory, HydrationError)> {
        // Deletions only touch existing documents.
        if metadata.removed {
            if let Some(mut document) = self
                .documents
                .find(
                    &source.workspace_id,
                    source.source_type,
                    &metadata.source_document_id,
                )
                .map_err(system)?
            {
                document.ingestion_status = IngestionStatus::Skipped;
                self.documents.save(&document).map_err(system)?;
                run_item.document_id = Some(document.id);
            }
            run_item.status = RunItemStatus::Linked;
            return Ok(());
        }

        let (mut document, is_new, is_update, mut version) =
            self.upsert_document(source, metadata).map_err(system)?;
        run_item.document_id = Some(document.id);

        if !is_new && !is_update {
            run_item.action = RunItemAction::Skip;
            run_item.status = RunItemStatus::Linked;
            run_item.details = serde_json::json!({"reason": "unchanged"});
            return Ok(());
        }
        if is_update {
            run_item.action = RunItemAction::Update;
        }

        if options.dry_run {
            run_item.status = RunItemStatus::Linked;
            run_item.details = serde_json::json!({"dry_run": true});
            return Ok(());
        }

        // Download.
        let download_start = Instant::now();
        let content = connector
            .download(item)
            .await
            .map_err(|err| (AlertCategory::Extraction, err))?;
        let download_ms = download_start.elapsed().as_millis() as u64;
        run.counters.files_downloaded += 1;

        // Extract and classify.
        let extract_start = Instant::now();
        let (text, structured) = extract(
            &document.name,
            document.mime_type.as_deref(),
            &content,
            self.ocr.as_ref(),
            self.ocr_enabled,
        );
        let extract_ms = extract_start.elapsed().as_millis() as u64;
        document.doc_type = classify(&document.name, &text);
        document.ingestion_status = IngestionStatus::Extracted;
        version.extracted_text = Some(text.clone());
        version.extracted_structured = structured;
        self.documents.save(&document).map_err(system)?;
        self.documents.save_version(&version).map_err(system)?;
        run.counters.files_extracted += 1;

        // Chunk.
        let chunk_start = Instant::now();
        let chunks = chunk_text(&text, MAX_CHUNK_LENGTH);
        let chunk_ms = chunk_start.elapsed().as_millis() as u64;

        // Index.
        let index_start = Instant::now();
        let chunk_count = self
            .indexing
            .index_chunks(&source.workspace_id, document.id, version.id, &chunks)
            .await
            .map_err(|err| (AlertCategory::Indexing, err))?;
        let embed_ms = index_start.elapsed().as_millis() as u64;
        version.chunk_count = chunk_count as u32;
        version.embedding_status = VersionStatus::Done;
        version.index_status = VersionStatus::Done;
        document.ingestion_status = IngestionStatus::Indexed;
        self.documents.save(&document).map_err(system)?;
        self.documents.save_version(&version).map_err(system)?;
        run.counters.files_indexed += 1;

        // Linking.
        let ule_start = Instant::now();
        let entity_count = self
            .ule
            .run(&source.workspace_id, document.id, &document.name, &text)
            .await
            .map_err(|err| (AlertCategory::Ule, err))?;
        let ule_ms = ule_start.elapsed().as_millis() as u64;
        version.link_status = VersionStatus::Done;
        document.ingestion_status = IngestionStatus::Linked;
        self.documents.save(&document).map_err(system)?;
        self.documents.save_version(&version).map_err(system)?;
        run.counters.files_ule_processed += 1;

        if is_new {
            run.counters.files_new += 1;
        }
        if is_update {
            run.counters.files_updated += 1;
        }

        run_item.status = RunItemStatus::Linked;
        run_item.details = serde_json::json!({
            "download_ms": download_ms,
            "extract_ms": extract_ms,
            "chunk_ms": chunk_ms,
            "embed_ms": embed_ms,
            "ule_ms": ule_ms,
            "entities": entity_count,
        });
        Ok(())
    }

    fn fail_item(
        &self,
        run: &mut HydrationRun,
        run_item: &mut RunItem,
        workspace_id: &str,
        category: AlertCategory,
        err: &HydrationError,
    ) -> Result<(), HydrationError> {
        error!(target: "warden::hydration", error = %err, "hydration item failed");
        run.counters.files_failed += 1;
        run.status = RunStatus::Partial;
        run_item.status = RunItemStatus::Failed;
        run_item.error_message = Some(err.to_string());
        self.runs.save_item(run_item)?;
        self.alerts.create_alert(
            workspace_id,
            AlertSeverity::Warn,
            category,
            &format!("Hydration item failed: {err}"),
            Some(run.id),
        )?;
        Ok(())
    }

    fn upsert_document(
        &self,
        source: &WorkspaceSource,
        metadata: &ItemMetadata,
    ) -> Result<(Document, bool, bool, DocumentVersion), HydrationError> {
        let checksum = metadata
            .checksum
            .clone()
            .unwrap_or_else(|| checksum_fallback(&metadata.source_document_id));

        let existing = self.documents.find(
            &source.workspace_id,
            source.source_type,
            &metadata.source_document_id,
        )?;

        let Some(mut document) = existing else {
            let document = self.documents.insert(Document {
                id: 0,
                workspace_id: source.workspace_id.clone(),
                source_type: source.source_type,
                source_document_id: metadata.source_document_id.clone(),
                source_path: metadata.path.clone(),
                name: metadata.name.clone(),
                mime_type: metadata.mime_type.clone(),
                size_bytes: metadata.size_bytes,
                modified_time: metadata.modified_time,
                checksum: Some(checksum.clone()),
                doc_type: DocumentType::Other,
                ingestion_status: IngestionStatus::Pending,
            })?;
            let version =
                self.documents
                    .create_version(document.id, metadata.modified_time, Some(checksum))?;
            return Ok((document, true, false, version));
        };

        if document.checksum.as_deref() == Some(checksum.as_str()) {
            let version = match self.documents.latest_version(document.id)? {
                Some(version) => version,
                None => self.documents.create_version(
                    document.id,
                    metadata.modified_time,
                    Some(checksum),
                )?,
            };
            return Ok((document, false, false, version));
        }

        document.name = metadata.name.clone();
        document.mime_type = metadata.mime_type.clone().or(document.mime_type);
        document.size_bytes = metadata.size_bytes.or(document.size_bytes);
        document.modified_time = metadata.modified_time;
        document.checksum = Some(checksum.clone());
        self.documents.save(&document)?;
        let version =
            self.documents
                .create_version(document.id, metadata.modified_time, Some(checksum))?;
        Ok((document, false, true, version))
    }

    pub fn runs(&self) -> &RunRepo {
        &self.runs
    }

    pub fn documents(&self) -> &DocumentRepo {
        &self.documents
    }

    pub fn alerts(&self) -> &AlertManager {
        &self.alerts
    }

    pub fn sources(&self) -> &SourceRepo {
        &self.sources
    }

    pub fn states(&self) -> &StateRepo {
        &self.states
    }
}

fn system(err: HydrationError) -> (AlertCategory, HydrationError) {
    (AlertCategory::System, err)
}

/// Keyword classification over the lowercased name + text.
pub fn classify(name: &str, text: &str) -> DocumentType {
    let token = format!("{} {}", name.to_lowercase(), text.to_lowercase());
    if token.contains("boq") {
        DocumentType::Boq
    } else if token.contains("spec") {
        DocumentType::Spec
    } else if token.contains("contract") {
        DocumentType::Contract
    } else if token.contains("drawing") {
        DocumentType::Drawing
    } else if token.contains("report") {
        DocumentType::Report
    } else {
        DocumentType::Other
    }
}

/// Paragraph-accumulating chunker: emits a chunk when adding the next
/// paragraph would exceed `max_length`. Empty text yields no chunks.
pub fn chunk_text(text: &str, max_length: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0;
    for paragraph in text.split('\n') {
        if paragraph.trim().is_empty() {
            continue;
        }
        if current_len + paragraph.len() > max_length && !current.is_empty() {
            chunks.push(current.join("\n"));
            current.clear();
            current_len = 0;
        }
        current.push(paragraph);
        current_len += paragraph.len();
    }
    if !current.is_empty() {
        chunks.push(current.join("\n"));
    }
    chunks
}

fn checksum_fallback(source_document_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_document_id.as_bytes());
    format!("{:x}", hasher.finalize())
}
