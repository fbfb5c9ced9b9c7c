//! Lightweight pack used by the hydration pipeline's linking hook.
//!
//! Keeps per-item linking cheap during ingestion: the first two non-empty
//! lines become entities and are joined by a single rule-scored reference
//! link. Heavier packs run on demand through the reasoning surface.

use super::base::build_evidence;
use super::{MatchCandidate, Pack};
use crate::schemas::{Entity, EntityType, Evidence, EvidenceType, LinkType, PackConfig};
use std::collections::HashMap;

pub struct HydrationPack {
    config: PackConfig,
}

impl Default for HydrationPack {
    fn default() -> Self {
        Self::new()
    }
}

impl HydrationPack {
    pub fn new() -> Self {
        Self {
            config: PackConfig {
                name: "HydrationPack".to_string(),
                version: "1.0.0".to_string(),
                description: "Lightweight pack for hydration processing".to_string(),
                entity_types: vec![EntityType::BoqItem, EntityType::SpecSection],
                link_types: vec![LinkType::References],
                confidence_threshold: 0.6,
            },
        }
    }
}

impl Pack for HydrationPack {
    fn config(&self) -> &PackConfig {
        &self.config
    }

    fn extract_entities(
        &self,
        content: &str,
        document_id: &str,
        document_name: &str,
        _document_type: &str,
        metadata: &serde_json::Value,
    ) -> Vec<Entity> {
        let mut lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.is_empty() && !content.trim().is_empty() {
            lines.push(content.trim());
        }
        lines
            .into_iter()
            .take(2)
            .enumerate()
            .map(|(idx, line)| Entity {
                id: format!("{document_id}-{idx}"),
                entity_type: if idx == 0 {
                    EntityType::BoqItem
                } else {
                    EntityType::SpecSection
                },
                text: line.trim().to_string(),
                document_id: Some(document_id.to_string()),
                document_name: Some(document_name.to_string()),
                section: Some(format!("line-{idx}")),
                project_id: None,
                metadata: metadata.clone(),
            })
            .collect()
    }

    fn match_entities(
        &self,
        sources: &[Entity],
        _targets: &[Entity],
        _embeddings: &HashMap<String, Vec<f32>>,
    ) -> Vec<MatchCandidate> {
        let mut matches = Vec::new();
        if sources.len() >= 2 && self.should_link(&sources[0], &sources[1]) {
            let evidence = vec![build_evidence(
                EvidenceType::KeywordMatch,
                serde_json::json!(1.0),
                0.6,
                Some(sources[0].text.as_str()),
                Some(sources[1].text.as_str()),
            )];
            matches.push(MatchCandidate {
                source: sources[0].clone(),
                target: sources[1].clone(),
                link_type: LinkType::References,
                confidence: 0.8,
                evidence,
            });
        }
        matches
    }

    fn calculate_confidence(
        &self,
        _source: &Entity,
        _target: &Entity,
        evidence: &[Evidence],
    ) -> f64 {
        if evidence.is_empty() {
            return 0.0;
        }
        let total: f64 = evidence.iter().map(|e| e.weight).sum();
        (total / evidence.len() as f64).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_at_most_two_line_entities() {
        let pack = HydrationPack::new();
        let entities = pack.extract_entities(
            "first line\n\nsecond line\nthird line",
            "42",
            "doc.txt",
            "hydration",
            &serde_json::Value::Null,
        );
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].id, "42-0");
        assert_eq!(entities[0].entity_type, EntityType::BoqItem);
        assert_eq!(entities[1].entity_type, EntityType::SpecSection);
    }

    #[test]
    fn empty_content_extracts_nothing() {
        let pack = HydrationPack::new();
        let entities = pack.extract_entities("", "42", "doc.txt", "hydration", &serde_json::Value::Null);
        assert!(entities.is_empty());
    }

    #[test]
    fn two_entities_produce_one_reference_link() {
        let pack = HydrationPack::new();
        let entities = pack.extract_entities(
            "alpha\nbravo",
            "42",
            "doc.txt",
            "hydration",
            &serde_json::Value::Null,
        );
        let matches = pack.match_entities(&entities, &[], &HashMap::new());
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].link_type, LinkType::References);
        assert!(matches[0].confidence >= pack.config().confidence_threshold);

        let single = pack.extract_entities("alpha", "42", "doc.txt", "hydration", &serde_json::Value::Null);
        assert!(pack.match_entities(&single, &[], &HashMap::new()).is_empty());
    }
}
