//! The linking engine: pack registry, document processing, link search,
//! evidence explanations, and statistics.

use crate::embedding::{EmbeddingProvider, VectorIndex};
use crate::packs::{MatchCandidate, Pack};
use crate::schemas::{
    DocumentInput, Entity, EntityType, EvidenceResponse, EvidenceType, Link, LinkResult,
    LinkType, PackConfig,
};
use crate::store::UleStore;
use crate::UleError;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

const DEFAULT_THRESHOLD: f64 = 0.75;
const QUERY_TOP_K: usize = 50;

/// Parameters for [`UleEngine::find_links`].
#[derive(Debug, Clone, Default)]
pub struct FindLinksQuery {
    pub document_id: Option<String>,
    pub query_text: Option<String>,
    pub entity_types: Option<Vec<EntityType>>,
    pub link_types: Option<Vec<LinkType>>,
    pub packs: Option<Vec<String>>,
    pub confidence_threshold: Option<f64>,
    pub max_links: usize,
}

/// Counts by entity type and link type.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UleStatistics {
    pub total_entities: usize,
    pub total_links: usize,
    pub entities_by_type: BTreeMap<String, usize>,
    pub links_by_type: BTreeMap<String, usize>,
    pub registered_packs: usize,
}

/// Orchestrates packs, embeddings, and the link store.
pub struct UleEngine {
    packs: DashMap<String, Arc<dyn Pack>>,
    store: UleStore,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    index: RwLock<VectorIndex>,
    default_threshold: f64,
}

impl UleEngine {
    /// Build the engine; rebuilds the similarity index from persisted
    /// embeddings.
    pub fn new(
        store: UleStore,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Result<Self, UleError> {
        let mut index = VectorIndex::new();
        for (id, vector) in store.all_embeddings()? {
            index.upsert(&id, vector);
        }
        info!(
            target: "warden::ule",
            threshold = DEFAULT_THRESHOLD,
            embeddings = index.len(),
            provider = embedder.is_some(),
            "ULE engine initialized"
        );
        Ok(Self {
            packs: DashMap::new(),
            store,
            embedder,
            index: RwLock::new(index),
            default_threshold: DEFAULT_THRESHOLD,
        })
    }

    // -----------------------------------------------------------------------
    // Pack management
    // -----------------------------------------------------------------------

    /// Register a pack. Duplicate names are a conflict.
    pub fn register_pack(&self, pack: Arc<dyn Pack>) -> Result<(), UleError> {
        let name = pack.name().to_string();
        if self.packs.contains_key(&name) {
            return Err(UleError::Conflict(format!("pack '{name}' already registered")));
        }
        info!(
            target: "warden::ule",
            pack = %name,
            version = %pack.config().version,
            "pack registered"
        );
        self.packs.insert(name, pack);
        Ok(())
    }

    /// Remove a pack by name. Returns false when it was not registered.
    pub fn unregister_pack(&self, name: &str) -> bool {
        let removed = self.packs.remove(name).is_some();
        if removed {
            info!(target: "warden::ule", pack = name, "pack unregistered");
        }
        removed
    }

    pub fn list_packs(&self) -> Vec<PackConfig> {
        self.packs
            .iter()
            .map(|entry| entry.value().config().clone())
            .collect()
    }

    fn active_packs(&self, names: Option<&[String]>) -> Vec<Arc<dyn Pack>> {
        match names {
            Some(names) => names
                .iter()
                .filter_map(|name| self.packs.get(name).map(|entry| entry.value().clone()))
                .collect(),
            None => self
                .packs
                .iter()
                .map(|entry| entry.value().clone())
                .collect(),
        }
    }

    // -----------------------------------------------------------------------
    // Document processing
    // -----------------------------------------------------------------------

    /// Extract entities with every applicable pack, embed the new ones, link
    /// them against the stored population, and persist everything.
    pub async fn process_document(
        &self,
        document: &DocumentInput,
        pack_names: Option<&[String]>,
    ) -> Result<LinkResult, UleError> {
        let started = Instant::now();
        let active = self.active_packs(pack_names);
        if active.is_empty() {
            warn!(target: "warden::ule", document = %document.document_id, "no packs available");
            let mut result = LinkResult::empty(
                Some(document.document_id.clone()),
                self.default_threshold,
            );
            result.metadata = serde_json::json!({"error": "No packs registered"});
            return Ok(result);
        }

        // Extract and deduplicate by stable entity id.
        let mut by_id: HashMap<String, Entity> = HashMap::new();
        for pack in &active {
            for entity in pack.extract_entities(
                &document.content,
                &document.document_id,
                &document.document_name,
                &document.document_type,
                &document.metadata,
            ) {
                by_id.entry(entity.id.clone()).or_insert(entity);
            }
        }
        let mut new_entities: Vec<Entity> = by_id.into_values().collect();
        new_entities.sort_by(|a, b| a.id.cmp(&b.id));

        for entity in &new_entities {
            self.store.upsert_entity(entity)?;
        }
        self.store.set_document_entities(
            &document.document_id,
            &new_entities.iter().map(|e| e.id.clone()).collect::<Vec<_>>(),
        )?;

        self.compute_embeddings(&new_entities).await?;

        // Targets: the new entities plus everything already stored.
        let stored = self.store.entities()?;
        let embeddings = self.embedding_map(new_entities.iter().chain(stored.iter()))?;
        let links = self.promote_candidates(&active, &new_entities, &stored, &embeddings)?;
        for link in &links {
            self.store.upsert_link(link)?;
        }

        let entity_types: Vec<String> = {
            let mut types: Vec<String> = new_entities
                .iter()
                .map(|e| e.entity_type.as_str().to_string())
                .collect();
            types.sort();
            types.dedup();
            types
        };

        Ok(LinkResult {
            document_id: Some(document.document_id.clone()),
            query: None,
            total_entities_processed: new_entities.len(),
            total_links_found: links.len(),
            links,
            processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            packs_used: active.iter().map(|p| p.name().to_string()).collect(),
            confidence_threshold: self.default_threshold,
            metadata: serde_json::json!({ "entity_types": entity_types }),
        })
    }

    /// Find links for a document and/or a semantic query.
    pub async fn find_links(&self, query: FindLinksQuery) -> Result<LinkResult, UleError> {
        let started = Instant::now();
        let threshold = query.confidence_threshold.unwrap_or(self.default_threshold);
        let max_links = if query.max_links == 0 { 100 } else { query.max_links };

        let mut sources: Vec<Entity> = Vec::new();
        if let Some(document_id) = &query.document_id {
            for id in self.store.document_entities(document_id)? {
                if let Some(entity) = self.store.entity(&id)? {
                    sources.push(entity);
                }
            }
        }
        if let Some(text) = &query.query_text {
            sources.extend(self.search_entities(text, QUERY_TOP_K).await?);
        }

        if sources.is_empty() {
            let mut result =
                LinkResult::empty(query.document_id.clone(), threshold);
            result.query = query.query_text.clone();
            result.processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
            return Ok(result);
        }

        if let Some(types) = &query.entity_types {
            sources.retain(|e| types.contains(&e.entity_type));
        }

        let source_ids: std::collections::HashSet<&str> =
            sources.iter().map(|e| e.id.as_str()).collect();
        let mut targets: Vec<Entity> = self
            .store
            .entities()?
            .into_iter()
            .filter(|e| !source_ids.contains(e.id.as_str()))
            .collect();
        if let Some(types) = &query.entity_types {
            targets.retain(|e| types.contains(&e.entity_type));
        }

        let active = self.active_packs(query.packs.as_deref());
        let embeddings = self.embedding_map(sources.iter().chain(targets.iter()))?;
        let mut links: Vec<Link> = Vec::new();
        for pack in &active {
            for candidate in pack.match_entities(&sources, &targets, &embeddings) {
                if candidate.confidence >= threshold {
                    links.push(self.candidate_to_link(pack.name(), candidate));
                }
            }
        }

        if let Some(types) = &query.link_types {
            links.retain(|link| types.contains(&link.link_type));
        }
        links.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        links.truncate(max_links);

        Ok(LinkResult {
            document_id: query.document_id.clone(),
            query: query.query_text.clone(),
            total_entities_processed: sources.len(),
            total_links_found: links.len(),
            links,
            processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            packs_used: active.iter().map(|p| p.name().to_string()).collect(),
            confidence_threshold: threshold,
            metadata: serde_json::Value::Null,
        })
    }

    /// Stored links touching a document, confidence descending.
    pub fn links_for_document(&self, document_id: &str) -> Result<Vec<Link>, UleError> {
        let mut links = self.store.links_for_document(document_id)?;
        links.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(links)
    }

    /// A link with a human-readable explanation of its evidence trail.
    pub fn get_evidence(&self, link_id: Uuid) -> Result<Option<EvidenceResponse>, UleError> {
        let Some(link) = self.store.link(link_id)? else {
            return Ok(None);
        };
        let explanation = explain(&link);
        Ok(Some(EvidenceResponse { link, explanation }))
    }

    pub fn get_statistics(&self) -> Result<UleStatistics, UleError> {
        let entities = self.store.entities()?;
        let links = self.store.links()?;
        let mut entities_by_type: BTreeMap<String, usize> = BTreeMap::new();
        for entity in &entities {
            *entities_by_type
                .entry(entity.entity_type.as_str().to_string())
                .or_default() += 1;
        }
        let mut links_by_type: BTreeMap<String, usize> = BTreeMap::new();
        for link in &links {
            *links_by_type
                .entry(link.link_type.as_str().to_string())
                .or_default() += 1;
        }
        Ok(UleStatistics {
            total_entities: entities.len(),
            total_links: links.len(),
            entities_by_type,
            links_by_type,
            registered_packs: self.packs.len(),
        })
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn compute_embeddings(&self, entities: &[Entity]) -> Result<(), UleError> {
        let Some(embedder) = &self.embedder else {
            return Ok(());
        };
        let missing: Vec<&Entity> = {
            let mut missing = Vec::new();
            for entity in entities {
                if self.store.embedding(&entity.id)?.is_none() {
                    missing.push(entity);
                }
            }
            missing
        };
        if missing.is_empty() {
            return Ok(());
        }
        let texts: Vec<String> = missing.iter().map(|e| e.text.clone()).collect();
        let vectors = embedder.embed(&texts).await?;
        let mut index = self
            .index
            .write()
            .map_err(|_| UleError::Provider("similarity index lock poisoned".into()))?;
        for (entity, vector) in missing.iter().zip(vectors) {
            self.store.put_embedding(&entity.id, &vector)?;
            index.upsert(&entity.id, vector);
        }
        debug!(target: "warden::ule", embedded = texts.len(), "embeddings computed");
        Ok(())
    }

    fn embedding_map<'a>(
        &self,
        entities: impl Iterator<Item = &'a Entity>,
    ) -> Result<HashMap<String, Vec<f32>>, UleError> {
        let mut map = HashMap::new();
        for entity in entities {
            if map.contains_key(&entity.id) {
                continue;
            }
            if let Some(vector) = self.store.embedding(&entity.id)? {
                map.insert(entity.id.clone(), vector);
            }
        }
        Ok(map)
    }

    async fn search_entities(&self, text: &str, top_k: usize) -> Result<Vec<Entity>, UleError> {
        let Some(embedder) = &self.embedder else {
            // Without a provider, fall back to keyword containment.
            let needle = text.to_lowercase();
            return Ok(self
                .store
                .entities()?
                .into_iter()
                .filter(|e| e.text.to_lowercase().contains(&needle))
                .take(top_k)
                .collect());
        };
        let query = embedder.embed(&[text.to_string()]).await?;
        let Some(query_vec) = query.first() else {
            return Ok(Vec::new());
        };
        let hits = {
            let index = self
                .index
                .read()
                .map_err(|_| UleError::Provider("similarity index lock poisoned".into()))?;
            index.search(query_vec, top_k)
        };
        let mut out = Vec::new();
        for (id, _score) in hits {
            if let Some(entity) = self.store.entity(&id)? {
                out.push(entity);
            }
        }
        Ok(out)
    }

    fn promote_candidates(
        &self,
        packs: &[Arc<dyn Pack>],
        new_entities: &[Entity],
        stored: &[Entity],
        embeddings: &HashMap<String, Vec<f32>>,
    ) -> Result<Vec<Link>, UleError> {
        let mut targets: Vec<Entity> = new_entities.to_vec();
        let new_ids: std::collections::HashSet<&str> =
            new_entities.iter().map(|e| e.id.as_str()).collect();
        targets.extend(
            stored
                .iter()
                .filter(|e| !new_ids.contains(e.id.as_str()))
                .cloned(),
        );

        let mut links = Vec::new();
        for pack in packs {
            let threshold = pack.config().confidence_threshold;
            for candidate in pack.match_entities(new_entities, &targets, embeddings) {
                if candidate.confidence >= threshold {
                    links.push(self.candidate_to_link(pack.name(), candidate));
                }
            }
        }
        Ok(links)
    }

    fn candidate_to_link(&self, pack_name: &str, candidate: MatchCandidate) -> Link {
        Link {
            id: Uuid::new_v4(),
            source: candidate.source,
            target: candidate.target,
            link_type: candidate.link_type,
            confidence: candidate.confidence,
            evidence: candidate.evidence,
            pack_name: pack_name.to_string(),
            validated: false,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }
}

fn explain(link: &Link) -> String {
    let mut parts: Vec<String> = Vec::new();
    for evidence in &link.evidence {
        let part = match evidence.evidence_type {
            EvidenceType::SemanticSimilarity => evidence
                .value
                .as_f64()
                .map(|v| format!("semantic similarity {:.0}%", v * 100.0)),
            EvidenceType::KeywordMatch => evidence
                .source_text
                .as_ref()
                .map(|words| format!("matched keywords: {words}")),
            EvidenceType::CsiCodeMatch => evidence
                .source_text
                .as_ref()
                .map(|code| format!("shared CSI code {code}")),
            EvidenceType::CostCodeMatch => evidence
                .source_text
                .as_ref()
                .map(|code| format!("shared cost code {code}")),
            EvidenceType::MaterialMatch => evidence
                .source_text
                .as_ref()
                .map(|materials| format!("matched materials: {materials}")),
            EvidenceType::DrawingReference => evidence
                .target_text
                .as_ref()
                .map(|code| format!("references drawing {code}")),
            EvidenceType::QuantityReference => Some(match (&evidence.source_text, &evidence.target_text) {
                (Some(a), Some(b)) => format!("amounts {a} and {b} agree within tolerance"),
                _ => "amounts agree within tolerance".to_string(),
            }),
            EvidenceType::DateProximity => evidence
                .value
                .as_f64()
                .map(|v| format!("dates close in time (proximity {v:.2})")),
            EvidenceType::ClauseReference => evidence
                .source_text
                .as_ref()
                .map(|clause| format!("references clause {clause}")),
            EvidenceType::RuleBased => Some("rule-based match".to_string()),
        };
        if let Some(part) = part {
            parts.push(part);
        }
    }
    if parts.is_empty() {
        format!(
            "{} link between '{}' and '{}' with confidence {:.2}",
            link.link_type.as_str(),
            link.source.text,
            link.target.text,
            link.confidence
        )
    } else {
        format!(
            "{} link ({:.0}% confidence): {}",
            link.link_type.as_str(),
            link.confidence * 100.0,
            parts.join("; ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::packs::{ConstructionPack, HydrationPack};
    use warden_core::Store;

    fn engine_with(packs: Vec<Arc<dyn Pack>>) -> UleEngine {
        let engine = UleEngine::new(
            UleStore::new(Store::temp().unwrap()),
            Some(Arc::new(HashEmbedder::default())),
        )
        .unwrap();
        for pack in packs {
            engine.register_pack(pack).unwrap();
        }
        engine
    }

    fn document(id: &str, content: &str) -> DocumentInput {
        DocumentInput {
            document_id: id.to_string(),
            document_name: format!("{id}.txt"),
            content: content.to_string(),
            document_type: "other".to_string(),
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn no_packs_yields_empty_result_without_error() {
        let engine = engine_with(Vec::new());
        let result = engine
            .process_document(&document("d1", "some text"), None)
            .await
            .unwrap();
        assert_eq!(result.total_entities_processed, 0);
        assert_eq!(result.total_links_found, 0);
        assert!(result.packs_used.is_empty());
    }

    #[tokio::test]
    async fn duplicate_pack_registration_conflicts() {
        let engine = engine_with(vec![Arc::new(HydrationPack::new())]);
        let err = engine
            .register_pack(Arc::new(HydrationPack::new()))
            .unwrap_err();
        assert!(matches!(err, UleError::Conflict(_)));
        assert!(engine.unregister_pack("HydrationPack"));
        assert!(!engine.unregister_pack("HydrationPack"));
    }

    #[tokio::test]
    async fn process_document_extracts_links_and_persists() {
        let engine = engine_with(vec![Arc::new(HydrationPack::new())]);
        let result = engine
            .process_document(
                &document("d1", "concrete pour for slab\nspec section for concrete"),
                None,
            )
            .await
            .unwrap();
        assert_eq!(result.total_entities_processed, 2);
        assert_eq!(result.total_links_found, 1);
        let link = &result.links[0];
        assert!(link.confidence >= 0.6);
        assert_ne!(link.source.id, link.target.id);

        // Evidence endpoint explains the stored link.
        let response = engine.get_evidence(link.id).unwrap().unwrap();
        assert!(!response.explanation.is_empty());
        assert!(engine.get_evidence(Uuid::new_v4()).unwrap().is_none());
    }

    #[tokio::test]
    async fn find_links_returns_subset_of_processed() {
        let engine = engine_with(vec![Arc::new(HydrationPack::new())]);
        let processed = engine
            .process_document(
                &document("d1", "concrete pour for slab\nspec section for concrete"),
                None,
            )
            .await
            .unwrap();
        let found = engine
            .find_links(FindLinksQuery {
                document_id: Some("d1".to_string()),
                confidence_threshold: Some(0.6),
                max_links: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        // Every found pair must be present among the processed pairs.
        for link in &found.links {
            assert!(processed.links.iter().any(|p| {
                p.source.id == link.source.id && p.target.id == link.target.id
            }));
        }
    }

    #[tokio::test]
    async fn reprocessing_is_idempotent_for_entities() {
        let engine = engine_with(vec![Arc::new(ConstructionPack::new())]);
        let doc = document(
            "boq-1",
            "1.01 Supply concrete grade 40 to columns 03300 250 m3\n",
        );
        let first = engine.process_document(&doc, None).await.unwrap();
        let second = engine.process_document(&doc, None).await.unwrap();
        assert_eq!(
            first.total_entities_processed,
            second.total_entities_processed
        );
        let stats = engine.get_statistics().unwrap();
        assert_eq!(stats.total_entities, first.total_entities_processed);
    }

    #[tokio::test]
    async fn statistics_count_by_type() {
        let engine = engine_with(vec![Arc::new(HydrationPack::new())]);
        engine
            .process_document(
                &document("d1", "first line here\nsecond line there"),
                None,
            )
            .await
            .unwrap();
        let stats = engine.get_statistics().unwrap();
        assert_eq!(stats.total_entities, 2);
        assert_eq!(stats.registered_packs, 1);
        assert!(stats.entities_by_type.contains_key("boq_item"));
        assert!(stats.entities_by_type.contains_key("spec_section"));
    }
}
