//! The pack framework: domain modules that extract entities and match them
//! into evidence-scored link candidates.

pub mod base;
mod commercial;
mod construction;
mod hydration;

pub use commercial::CommercialPack;
pub use construction::ConstructionPack;
pub use hydration::HydrationPack;

use crate::schemas::{Entity, Evidence, EvidenceType, LinkType, PackConfig};
use std::collections::HashMap;

/// A matched pair emitted by a pack, before the engine promotes it to a Link.
#[derive(Debug, Clone)]
pub struct MatchCandidate {
    pub source: Entity,
    pub target: Entity,
    pub link_type: LinkType,
    pub confidence: f64,
    pub evidence: Vec<Evidence>,
}

/// A domain linking pack.
///
/// Implementations must keep `extract_entities` idempotent (same inputs yield
/// entities with stable ids) and `calculate_confidence` deterministic.
/// `match_entities` must consult [`Pack::should_link`] and suppress pairs
/// below the pack's confidence threshold.
pub trait Pack: Send + Sync {
    fn config(&self) -> &PackConfig;

    fn name(&self) -> &str {
        &self.config().name
    }

    /// Extract entities from document content.
    fn extract_entities(
        &self,
        content: &str,
        document_id: &str,
        document_name: &str,
        document_type: &str,
        metadata: &serde_json::Value,
    ) -> Vec<Entity>;

    /// Find matching pairs between sources and targets. `embeddings` maps
    /// entity ids to unit vectors; packs fold semantic similarity into the
    /// evidence when both sides have one.
    fn match_entities(
        &self,
        sources: &[Entity],
        targets: &[Entity],
        embeddings: &HashMap<String, Vec<f32>>,
    ) -> Vec<MatchCandidate>;

    /// Deterministic confidence in [0, 1] from the collected evidence.
    fn calculate_confidence(&self, source: &Entity, target: &Entity, evidence: &[Evidence])
        -> f64;

    /// Filters obvious non-matches: self-links and same-(document, section)
    /// pairs.
    fn should_link(&self, source: &Entity, target: &Entity) -> bool {
        if source.id == target.id {
            return false;
        }
        if let (Some(src_doc), Some(tgt_doc)) = (&source.document_id, &target.document_id) {
            if src_doc == tgt_doc && source.section == target.section {
                return false;
            }
        }
        true
    }
}

/// Shared confidence shape used by the bundled packs: weighted average of
/// evidence values, with small boosts for code-level matches and evidence
/// diversity.
pub(crate) fn weighted_confidence(evidence: &[Evidence], boost_type: EvidenceType) -> f64 {
    if evidence.is_empty() {
        return 0.0;
    }
    let total_weight: f64 = evidence.iter().map(|e| e.weight).sum();
    if total_weight == 0.0 {
        return 0.0;
    }
    let weighted_sum: f64 = evidence
        .iter()
        .map(|e| match e.value.as_f64() {
            Some(value) => value * e.weight,
            None => e.weight * 0.8,
        })
        .sum();
    let mut confidence = weighted_sum / total_weight;

    if evidence.iter().any(|e| e.evidence_type == boost_type) {
        confidence += 0.1;
    }
    let distinct: std::collections::HashSet<EvidenceType> =
        evidence.iter().map(|e| e.evidence_type).collect();
    if distinct.len() >= 3 {
        confidence += 0.05;
    }
    (confidence.min(1.0) * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::EntityType;

    fn entity(id: &str, doc: &str, section: Option<&str>) -> Entity {
        Entity {
            id: id.to_string(),
            entity_type: EntityType::Generic,
            text: "x".into(),
            document_id: Some(doc.to_string()),
            document_name: None,
            section: section.map(str::to_string),
            project_id: None,
            metadata: serde_json::Value::Null,
        }
    }

    struct NullPack(PackConfig);

    impl Pack for NullPack {
        fn config(&self) -> &PackConfig {
            &self.0
        }
        fn extract_entities(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
            _: &serde_json::Value,
        ) -> Vec<Entity> {
            Vec::new()
        }
        fn match_entities(
            &self,
            _: &[Entity],
            _: &[Entity],
            _: &HashMap<String, Vec<f32>>,
        ) -> Vec<MatchCandidate> {
            Vec::new()
        }
        fn calculate_confidence(&self, _: &Entity, _: &Entity, _: &[Evidence]) -> f64 {
            0.0
        }
    }

    #[test]
    fn should_link_filters_self_and_same_section() {
        let pack = NullPack(PackConfig {
            name: "null".into(),
            version: "1.0.0".into(),
            description: String::new(),
            entity_types: vec![],
            link_types: vec![],
            confidence_threshold: 0.5,
        });
        let a = entity("a", "doc1", Some("s1"));
        let b = entity("b", "doc1", Some("s1"));
        let c = entity("c", "doc1", Some("s2"));
        let d = entity("d", "doc2", Some("s1"));
        assert!(!pack.should_link(&a, &a));
        assert!(!pack.should_link(&a, &b));
        assert!(pack.should_link(&a, &c));
        assert!(pack.should_link(&a, &d));
    }

    #[test]
    fn weighted_confidence_caps_at_one_and_rewards_diversity() {
        let make = |etype, value: f64, weight| Evidence {
            evidence_type: etype,
            value: serde_json::json!(value),
            weight,
            source_text: None,
            target_text: None,
            metadata: serde_json::Value::Null,
        };
        let thin = vec![make(EvidenceType::KeywordMatch, 0.5, 0.4)];
        let rich = vec![
            make(EvidenceType::KeywordMatch, 0.9, 0.4),
            make(EvidenceType::CsiCodeMatch, 1.0, 0.35),
            make(EvidenceType::SemanticSimilarity, 0.8, 0.6),
        ];
        let low = weighted_confidence(&thin, EvidenceType::CsiCodeMatch);
        let high = weighted_confidence(&rich, EvidenceType::CsiCodeMatch);
        assert!(low < high);
        assert!(high <= 1.0);
        assert_eq!(weighted_confidence(&[], EvidenceType::CsiCodeMatch), 0.0);
    }
}
