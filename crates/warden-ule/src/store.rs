//! Persistence for entities, links, embeddings, and the document → entity
//! adjacency. Upserts are keyed on stable ids so re-runs stay idempotent;
//! the link graph is an adjacency table, and evidence is owned by the link row.

use crate::schemas::{Entity, Link};
use crate::UleError;
use uuid::Uuid;
use warden_core::{get_json, put_json, scan_json, Store};

const ENTITIES: &str = "ule_entities";
const LINKS: &str = "ule_links";
const DOC_ENTITIES: &str = "ule_doc_entities";
const EMBEDDINGS: &str = "ule_embeddings";

/// Entity/link repository over the shared store.
#[derive(Clone)]
pub struct UleStore {
    store: Store,
}

impl UleStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn upsert_entity(&self, entity: &Entity) -> Result<(), UleError> {
        let tree = self.store.tree(ENTITIES)?;
        Ok(put_json(&tree, &entity.id, entity)?)
    }

    pub fn entity(&self, id: &str) -> Result<Option<Entity>, UleError> {
        let tree = self.store.tree(ENTITIES)?;
        Ok(get_json(&tree, id)?)
    }

    pub fn entities(&self) -> Result<Vec<Entity>, UleError> {
        let tree = self.store.tree(ENTITIES)?;
        Ok(scan_json(&tree, [])?)
    }

    pub fn upsert_link(&self, link: &Link) -> Result<(), UleError> {
        let tree = self.store.tree(LINKS)?;
        Ok(put_json(&tree, link.id.to_string(), link)?)
    }

    pub fn link(&self, id: Uuid) -> Result<Option<Link>, UleError> {
        let tree = self.store.tree(LINKS)?;
        Ok(get_json(&tree, id.to_string())?)
    }

    pub fn links(&self) -> Result<Vec<Link>, UleError> {
        let tree = self.store.tree(LINKS)?;
        Ok(scan_json(&tree, [])?)
    }

    /// Links whose source or target belongs to the document.
    pub fn links_for_document(&self, document_id: &str) -> Result<Vec<Link>, UleError> {
        Ok(self
            .links()?
            .into_iter()
            .filter(|link| {
                link.source.document_id.as_deref() == Some(document_id)
                    || link.target.document_id.as_deref() == Some(document_id)
            })
            .collect())
    }

    pub fn set_document_entities(
        &self,
        document_id: &str,
        entity_ids: &[String],
    ) -> Result<(), UleError> {
        let tree = self.store.tree(DOC_ENTITIES)?;
        Ok(put_json(&tree, document_id, &entity_ids.to_vec())?)
    }

    pub fn document_entities(&self, document_id: &str) -> Result<Vec<String>, UleError> {
        let tree = self.store.tree(DOC_ENTITIES)?;
        Ok(get_json::<Vec<String>>(&tree, document_id)?.unwrap_or_default())
    }

    pub fn put_embedding(&self, entity_id: &str, vector: &[f32]) -> Result<(), UleError> {
        let tree = self.store.tree(EMBEDDINGS)?;
        Ok(put_json(&tree, entity_id, &vector.to_vec())?)
    }

    pub fn embedding(&self, entity_id: &str) -> Result<Option<Vec<f32>>, UleError> {
        let tree = self.store.tree(EMBEDDINGS)?;
        Ok(get_json(&tree, entity_id)?)
    }

    /// All persisted (entity id, vector) pairs, used to rebuild the index at
    /// startup.
    pub fn all_embeddings(&self) -> Result<Vec<(String, Vec<f32>)>, UleError> {
        let tree = self.store.tree(EMBEDDINGS)?;
        let mut out = Vec::new();
        for entry in tree.iter() {
            let (key, bytes) = entry.map_err(warden_core::StoreError::from)?;
            let id = String::from_utf8_lossy(&key).to_string();
            let vector: Vec<f32> =
                serde_json::from_slice(&bytes).map_err(warden_core::StoreError::from)?;
            out.push((id, vector));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{EntityType, LinkType};
    use chrono::Utc;

    fn entity(id: &str, doc: &str) -> Entity {
        Entity {
            id: id.to_string(),
            entity_type: EntityType::Generic,
            text: format!("text of {id}"),
            document_id: Some(doc.to_string()),
            document_name: None,
            section: None,
            project_id: None,
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn entity_upserts_are_idempotent() {
        let store = UleStore::new(Store::temp().unwrap());
        let e = entity("doc1:boq:1.01", "doc1");
        store.upsert_entity(&e).unwrap();
        store.upsert_entity(&e).unwrap();
        assert_eq!(store.entities().unwrap().len(), 1);
        assert!(store.entity("doc1:boq:1.01").unwrap().is_some());
    }

    #[test]
    fn links_index_by_document() {
        let store = UleStore::new(Store::temp().unwrap());
        let link = Link {
            id: Uuid::new_v4(),
            source: entity("a", "doc1"),
            target: entity("b", "doc2"),
            link_type: LinkType::References,
            confidence: 0.9,
            evidence: Vec::new(),
            pack_name: "test".into(),
            validated: false,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        };
        store.upsert_link(&link).unwrap();
        assert_eq!(store.links_for_document("doc1").unwrap().len(), 1);
        assert_eq!(store.links_for_document("doc2").unwrap().len(), 1);
        assert!(store.links_for_document("doc3").unwrap().is_empty());
        assert!(store.link(link.id).unwrap().is_some());
    }

    #[test]
    fn embeddings_round_trip() {
        let store = UleStore::new(Store::temp().unwrap());
        store.put_embedding("a", &[0.5, 0.5]).unwrap();
        assert_eq!(store.embedding("a").unwrap().unwrap(), vec![0.5, 0.5]);
        assert_eq!(store.all_embeddings().unwrap().len(), 1);
    }
}
