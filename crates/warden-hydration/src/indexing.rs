//! Retrieval indexing behind a client trait. The embedded default writes
//! chunks into a store tree namespaced by workspace, so search stays
//! tenant-scoped.

use crate::HydrationError;
use async_trait::async_trait;
use warden_core::{put_json, Store};

#[async_trait]
pub trait IndexingClient: Send + Sync {
    /// Index chunks for one document version; returns the chunk count.
    async fn index_chunks(
        &self,
        workspace_id: &str,
        document_id: u64,
        version_id: u64,
        chunks: &[String],
    ) -> Result<usize, HydrationError>;
}

/// Store-backed index. Keys are `{workspace}/{document}/{version}/{n}`, so a
/// workspace prefix scan returns exactly that tenant's chunks.
pub struct EmbeddedIndex {
    store: Store,
}

impl EmbeddedIndex {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// All chunks indexed for a workspace, in key order.
    pub fn chunks_for_workspace(&self, workspace_id: &str) -> Result<Vec<String>, HydrationError> {
        let tree = self.store.tree("search_index")?;
        let prefix = format!("{workspace_id}/");
        Ok(warden_core::scan_json(&tree, &prefix)?)
    }
}

#[async_trait]
impl IndexingClient for EmbeddedIndex {
    async fn index_chunks(
        &self,
        workspace_id: &str,
        document_id: u64,
        version_id: u64,
        chunks: &[String],
    ) -> Result<usize, HydrationError> {
        let tree = self.store.tree("search_index")?;
        for (n, chunk) in chunks.iter().enumerate() {
            let key = format!("{workspace_id}/{document_id:016x}/{version_id:016x}/{n:04}");
            put_json(&tree, &key, chunk)?;
        }
        Ok(chunks.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chunks_are_namespaced_by_workspace() {
        let store = Store::temp().unwrap();
        let index = EmbeddedIndex::new(store);
        let count = index
            .index_chunks("ws1", 1, 1, &["alpha".into(), "bravo".into()])
            .await
            .unwrap();
        assert_eq!(count, 2);
        index
            .index_chunks("ws2", 2, 1, &["charlie".into()])
            .await
            .unwrap();

        assert_eq!(index.chunks_for_workspace("ws1").unwrap().len(), 2);
        assert_eq!(index.chunks_for_workspace("ws2").unwrap().len(), 1);
        assert!(index.chunks_for_workspace("ws3").unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_chunk_list_indexes_nothing() {
        let store = Store::temp().unwrap();
        let index = EmbeddedIndex::new(store);
        assert_eq!(index.index_chunks("ws1", 1, 1, &[]).await.unwrap(), 0);
        assert!(index.chunks_for_workspace("ws1").unwrap().is_empty());
    }
}
