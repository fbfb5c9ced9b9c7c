//! Bridge from the pipeline into the linking engine.
//!
//! Per-item linking during ingestion uses the lightweight hydration pack;
//! heavier packs run on demand through the reasoning surface.

use crate::HydrationError;
use async_trait::async_trait;
use std::sync::Arc;
use warden_ule::{DocumentInput, HydrationPack, UleEngine};

#[async_trait]
pub trait UleHook: Send + Sync {
    /// Extract and link entities for one document; returns the entity count.
    async fn run(
        &self,
        workspace_id: &str,
        document_id: u64,
        document_name: &str,
        text: &str,
    ) -> Result<usize, HydrationError>;
}

/// No-op hook for tests and link-disabled deployments.
pub struct NoopUleHook;

#[async_trait]
impl UleHook for NoopUleHook {
    async fn run(&self, _: &str, _: u64, _: &str, _: &str) -> Result<usize, HydrationError> {
        Ok(0)
    }
}

/// Engine-backed hook. Registers the hydration pack on construction when the
/// engine does not have it yet.
pub struct EngineUleHook {
    engine: Arc<UleEngine>,
}

impl EngineUleHook {
    pub fn new(engine: Arc<UleEngine>) -> Self {
        // Already-registered is fine; any other outcome is too.
        let _ = engine.register_pack(Arc::new(HydrationPack::new()));
        Self { engine }
    }
}

#[async_trait]
impl UleHook for EngineUleHook {
    async fn run(
        &self,
        workspace_id: &str,
        document_id: u64,
        document_name: &str,
        text: &str,
    ) -> Result<usize, HydrationError> {
        if text.trim().is_empty() {
            return Ok(0);
        }
        let document = DocumentInput {
            document_id: document_id.to_string(),
            document_name: document_name.to_string(),
            content: text.to_string(),
            document_type: "hydration".to_string(),
            metadata: serde_json::json!({ "workspace_id": workspace_id }),
        };
        let result = self
            .engine
            .process_document(&document, Some(&["HydrationPack".to_string()]))
            .await
            .map_err(|err| HydrationError::Linking(err.to_string()))?;
        Ok(result.total_entities_processed)
    }
}
