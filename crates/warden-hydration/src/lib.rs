//! warden-hydration: the workspace document ingestion pipeline.
//!
//! Discovers changes through pluggable source connectors, deduplicates via
//! content checksums, versions documents, extracts and chunks text, indexes
//! for retrieval, and invokes the linking engine, all under per-workspace
//! locks with partial-failure semantics.

pub mod alerts;
pub mod connectors;
pub mod extractors;
pub mod indexing;
mod models;
mod pipeline;
pub mod ule_hook;
pub mod worker;

pub use alerts::AlertManager;
pub use connectors::{Connector, ConnectorRegistry, ItemMetadata, SourceItem};
pub use indexing::{EmbeddedIndex, IndexingClient};
pub use models::{
    Alert, AlertCategory, AlertSeverity, Document, DocumentRepo, DocumentType,
    DocumentVersion, HydrationOptions, HydrationRun, HydrationState, HydrationStatus,
    HydrationTrigger, IngestionStatus, RunCounters, RunItem, RunItemAction, RunItemStatus,
    RunRepo, RunStatus, SourceRepo, SourceType, StateRepo, VersionStatus, WorkspaceSource,
};
pub use extractors::{NoOcr, OcrEngine};
pub use pipeline::{chunk_text, classify, HydrationPipeline};
pub use ule_hook::{EngineUleHook, NoopUleHook, UleHook};
pub use worker::{enqueue_hydration_job, next_run_time, HydrationWorker};

/// Hydration errors. `NoSources` maps to 400, `NotFound` to 404; per-item
/// failures never surface here; they are contained on the run.
#[derive(Debug, thiserror::Error)]
pub enum HydrationError {
    #[error(transparent)]
    Store(#[from] warden_core::StoreError),
    #[error("no enabled sources for workspace {0}")]
    NoSources(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid source config: {0}")]
    InvalidConfig(String),
    #[error("source io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("source transport error: {0}")]
    Transport(String),
    #[error("linking hook error: {0}")]
    Linking(String),
}
