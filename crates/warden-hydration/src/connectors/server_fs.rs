//! Server filesystem connector: walks a configured root and checksums file
//! contents, so the pipeline's checksum gate decides what actually changed.

use super::{Connector, ItemMetadata, SourceItem};
use crate::HydrationError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug)]
pub struct ServerFsConnector {
    root: PathBuf,
    include_extensions: Option<Vec<String>>,
}

impl ServerFsConnector {
    pub fn from_config(config: &serde_json::Value) -> Result<Self, HydrationError> {
        let root = config
            .get("root")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HydrationError::InvalidConfig("server_fs requires 'root'".into()))?;
        let include_extensions = config
            .get("include_extensions")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.trim_start_matches('.').to_lowercase()))
                    .collect()
            });
        Ok(Self {
            root: PathBuf::from(root),
            include_extensions,
        })
    }

    fn included(&self, path: &Path) -> bool {
        match &self.include_extensions {
            None => true,
            Some(extensions) => path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| extensions.contains(&e.to_lowercase()))
                .unwrap_or(false),
        }
    }
}

#[async_trait]
impl Connector for ServerFsConnector {
    fn validate_config(&self) -> Result<(), HydrationError> {
        if !self.root.is_dir() {
            return Err(HydrationError::InvalidConfig(format!(
                "server_fs root '{}' is not a directory",
                self.root.display()
            )));
        }
        Ok(())
    }

    /// Lists every included file on each scan; the checksum gate downstream
    /// keeps unchanged files from being re-ingested. The returned cursor
    /// records the newest mtime observed.
    async fn list_changes(
        &self,
        _cursor: Option<String>,
    ) -> Result<(Vec<SourceItem>, Option<String>), HydrationError> {
        let mut items = Vec::new();
        let mut max_mtime: Option<DateTime<Utc>> = None;
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.map_err(|err| HydrationError::Transport(err.to_string()))?;
            if !entry.file_type().is_file() || !self.included(entry.path()) {
                continue;
            }
            let metadata = entry.metadata().map_err(|err| HydrationError::Transport(err.to_string()))?;
            let modified: Option<DateTime<Utc>> =
                metadata.modified().ok().map(DateTime::<Utc>::from);
            if let Some(modified) = modified {
                if max_mtime.map(|m| modified > m).unwrap_or(true) {
                    max_mtime = Some(modified);
                }
            }
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .to_string();
            items.push(serde_json::json!({
                "path": entry.path().to_string_lossy(),
                "relative": relative,
                "size": metadata.len(),
                "modified": modified.map(|m| m.to_rfc3339()),
            }));
        }
        debug!(
            target: "warden::hydration",
            root = %self.root.display(),
            files = items.len(),
            "server_fs scan complete"
        );
        Ok((items, max_mtime.map(|m| m.to_rfc3339())))
    }

    fn get_metadata(&self, item: &SourceItem) -> Result<ItemMetadata, HydrationError> {
        let path = item
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HydrationError::Transport("server_fs item missing path".into()))?;
        let relative = item
            .get("relative")
            .and_then(|v| v.as_str())
            .unwrap_or(path)
            .to_string();
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| relative.clone());
        let removed = !Path::new(path).exists();

        // Content checksum so renames and touch-only updates do not trigger
        // new versions.
        let checksum = if removed {
            None
        } else {
            let bytes = std::fs::read(path)?;
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            Some(format!("{:x}", hasher.finalize()))
        };

        Ok(ItemMetadata {
            source_document_id: relative.clone(),
            name: name.clone(),
            mime_type: mime_for(&name),
            modified_time: item
                .get("modified")
                .and_then(|v| v.as_str())
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            size_bytes: item.get("size").and_then(|v| v.as_u64()),
            checksum,
            path: relative,
            removed,
        })
    }

    async fn download(&self, item: &SourceItem) -> Result<Vec<u8>, HydrationError> {
        let path = item
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HydrationError::Transport("server_fs item missing path".into()))?;
        Ok(tokio::fs::read(path).await?)
    }
}

fn mime_for(name: &str) -> Option<String> {
    let extension = Path::new(name).extension()?.to_str()?.to_lowercase();
    let mime = match extension.as_str() {
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => return None,
    };
    Some(mime.to_string())
}
