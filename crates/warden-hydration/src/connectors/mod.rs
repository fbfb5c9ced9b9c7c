//! Source connectors: pluggable origins of workspace documents.
//!
//! Items returned by `list_changes` are opaque to the pipeline; only the
//! connector interprets them. New source types register a factory on the
//! [`ConnectorRegistry`].

mod google_drive;
mod server_fs;

pub use google_drive::{GoogleDriveConnector, GoogleDrivePublicConnector};
pub use server_fs::ServerFsConnector;

use crate::models::SourceType;
use crate::HydrationError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// An opaque per-file token produced by `list_changes`.
pub type SourceItem = serde_json::Value;

/// Normalized file metadata the pipeline understands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub source_document_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub path: String,
    #[serde(default)]
    pub removed: bool,
}

/// A configured document origin.
#[async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    /// Validate the parsed config; failures are source-level failures.
    fn validate_config(&self) -> Result<(), HydrationError>;

    /// Enumerate changed items since `cursor` (nil cursor = full scan) and
    /// return the next cursor.
    async fn list_changes(
        &self,
        cursor: Option<String>,
    ) -> Result<(Vec<SourceItem>, Option<String>), HydrationError>;

    /// Normalize an opaque item into pipeline metadata.
    fn get_metadata(&self, item: &SourceItem) -> Result<ItemMetadata, HydrationError>;

    /// Fetch the item's raw bytes.
    async fn download(&self, item: &SourceItem) -> Result<Vec<u8>, HydrationError>;
}

type Factory = Arc<
    dyn Fn(&serde_json::Value, Option<&str>) -> Result<Box<dyn Connector>, HydrationError>
        + Send
        + Sync,
>;

/// `SourceType -> factory` table. Cloneable; shared by pipeline and worker.
#[derive(Clone)]
pub struct ConnectorRegistry {
    factories: HashMap<SourceType, Factory>,
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(SourceType::ServerFs, |config, _secrets| {
            Ok(Box::new(ServerFsConnector::from_config(config)?) as Box<dyn Connector>)
        });
        registry.register(SourceType::GoogleDrive, |config, secrets| {
            Ok(Box::new(GoogleDriveConnector::from_config(config, secrets)?) as Box<dyn Connector>)
        });
        registry.register(SourceType::GoogleDrivePublic, |config, _secrets| {
            Ok(Box::new(GoogleDrivePublicConnector::from_config(config)?) as Box<dyn Connector>)
        });
        registry
    }
}

impl ConnectorRegistry {
    pub fn register<F>(&mut self, source_type: SourceType, factory: F)
    where
        F: Fn(&serde_json::Value, Option<&str>) -> Result<Box<dyn Connector>, HydrationError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(source_type, Arc::new(factory));
    }

    /// Build a connector for a source; validates the config.
    pub fn connect(
        &self,
        source_type: SourceType,
        config: &serde_json::Value,
        secrets_ref: Option<&str>,
    ) -> Result<Box<dyn Connector>, HydrationError> {
        let factory = self.factories.get(&source_type).ok_or_else(|| {
            HydrationError::InvalidConfig(format!(
                "no connector registered for {}",
                source_type.as_str()
            ))
        })?;
        let connector = factory(config, secrets_ref)?;
        connector.validate_config()?;
        Ok(connector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_rejects_invalid_configs() {
        let registry = ConnectorRegistry::default();
        let err = registry
            .connect(
                SourceType::ServerFs,
                &serde_json::json!({"root": "/definitely/not/here"}),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, HydrationError::InvalidConfig(_)));

        let err = registry
            .connect(SourceType::GoogleDrive, &serde_json::json!({}), None)
            .unwrap_err();
        assert!(matches!(err, HydrationError::InvalidConfig(_)));
    }
}
