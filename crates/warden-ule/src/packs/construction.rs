//! Construction pack: BoQ items, specification sections, and drawing
//! references, linked via CSI codes, material keywords, and semantic
//! similarity.

use super::base::{build_evidence, extract_codes, keyword_match};
use super::{weighted_confidence, MatchCandidate, Pack};
use crate::embedding::cosine_similarity;
use crate::schemas::{Entity, EntityType, Evidence, EvidenceType, LinkType, PackConfig};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

static BOQ_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:Item\s+)?([A-Z]?\d+(?:\.\d+)+)\s+(.+?)\s+(\d+(?:,\d{3})*(?:\.\d+)?)\s*(m2|m3|m²|m³|kg|tons?|ton|nr|nos|ls|set|pcs?|each|lm|sqm|cum)\s*$").unwrap()
});

static SPEC_SECTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)(?:SECTION|Section)\s+(\d{5,6})\s*[-:]\s*([^\n]+)").unwrap());

static CSI_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{5})\b").unwrap());

static MATERIAL_KEYWORDS: Lazy<HashSet<String>> = Lazy::new(|| {
    [
        "concrete", "rebar", "steel", "cement", "aggregate", "masonry", "block", "brick",
        "waterproofing", "membrane", "insulation", "asphalt", "timber", "plywood", "gypsum",
        "plaster", "paint", "tile", "granite", "marble", "aluminium", "aluminum", "glazing",
        "sealant", "grout", "formwork", "scaffolding", "pipe", "duct", "cable", "conduit",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
});

/// BoQ ↔ specification ↔ drawing linking for construction documents.
pub struct ConstructionPack {
    config: PackConfig,
}

impl Default for ConstructionPack {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstructionPack {
    pub fn new() -> Self {
        Self {
            config: PackConfig {
                name: "ConstructionPack".to_string(),
                version: "1.0.0".to_string(),
                description: "Links BoQ items to specification sections and drawings".to_string(),
                entity_types: vec![
                    EntityType::BoqItem,
                    EntityType::SpecSection,
                    EntityType::Drawing,
                    EntityType::Material,
                ],
                link_types: vec![LinkType::Satisfies, LinkType::References, LinkType::Related],
                confidence_threshold: 0.75,
            },
        }
    }

    fn extract_boq_items(
        &self,
        content: &str,
        document_id: &str,
        document_name: &str,
    ) -> Vec<Entity> {
        BOQ_LINE
            .captures_iter(content)
            .filter_map(|caps| {
                let item_no = caps.get(1)?.as_str().to_string();
                let description = caps.get(2)?.as_str().trim().to_string();
                let quantity = caps.get(3)?.as_str().replace(',', "");
                let unit = caps.get(4)?.as_str().to_string();
                let csi_codes = csi_codes_in(&description);
                Some(Entity {
                    id: format!("{document_id}:boq:{item_no}"),
                    entity_type: EntityType::BoqItem,
                    text: description.clone(),
                    document_id: Some(document_id.to_string()),
                    document_name: Some(document_name.to_string()),
                    section: csi_codes.first().cloned(),
                    project_id: None,
                    metadata: serde_json::json!({
                        "item_no": item_no,
                        "quantity": quantity,
                        "unit": unit,
                        "csi_codes": csi_codes,
                    }),
                })
            })
            .collect()
    }

    fn extract_spec_sections(
        &self,
        content: &str,
        document_id: &str,
        document_name: &str,
    ) -> Vec<Entity> {
        SPEC_SECTION
            .captures_iter(content)
            .filter_map(|caps| {
                let code = caps.get(1)?.as_str().to_string();
                let title = caps.get(2)?.as_str().trim().to_string();
                Some(Entity {
                    id: format!("{document_id}:spec:{code}"),
                    entity_type: EntityType::SpecSection,
                    text: title,
                    document_id: Some(document_id.to_string()),
                    document_name: Some(document_name.to_string()),
                    section: Some(code.clone()),
                    project_id: None,
                    metadata: serde_json::json!({ "csi_codes": [code] }),
                })
            })
            .collect()
    }

    fn extract_drawings(
        &self,
        content: &str,
        document_id: &str,
        document_name: &str,
    ) -> Vec<Entity> {
        let codes = extract_codes(content, r"\b(DWG[-/]\d{2,4}|[A-Z]{1,2}-\d{3})\b");
        let mut seen = HashSet::new();
        codes
            .into_iter()
            .filter(|code| seen.insert(code.clone()))
            .map(|code| Entity {
                id: format!("{document_id}:dwg:{code}"),
                entity_type: EntityType::Drawing,
                text: code.clone(),
                document_id: Some(document_id.to_string()),
                document_name: Some(document_name.to_string()),
                section: Some(code),
                project_id: None,
                metadata: serde_json::Value::Null,
            })
            .collect()
    }

    fn collect_evidence(
        &self,
        source: &Entity,
        target: &Entity,
        embeddings: &HashMap<String, Vec<f32>>,
    ) -> Vec<Evidence> {
        let mut evidence = Vec::new();

        // CSI code alignment.
        let source_codes = entity_csi_codes(source);
        let target_codes = entity_csi_codes(target);
        let shared: Vec<&String> = source_codes.intersection(&target_codes).collect();
        if let Some(code) = shared.first() {
            evidence.push(build_evidence(
                EvidenceType::CsiCodeMatch,
                serde_json::json!(1.0),
                0.35,
                Some(code.as_str()),
                Some(code.as_str()),
            ));
        }

        // Material keyword overlap.
        let (score, matched) = keyword_match(&source.text, &target.text, Some(&*MATERIAL_KEYWORDS));
        if score > 0.15 {
            let evidence_type = if matched
                .iter()
                .any(|word| MATERIAL_KEYWORDS.contains(word.as_str()))
            {
                EvidenceType::MaterialMatch
            } else {
                EvidenceType::KeywordMatch
            };
            evidence.push(build_evidence(
                evidence_type,
                serde_json::json!(score),
                0.25,
                Some(matched.join(", ").as_str()),
                None,
            ));
        }

        // Drawing references mentioned in the other entity's text.
        if target.entity_type == EntityType::Drawing && source.text.contains(target.text.as_str())
        {
            evidence.push(build_evidence(
                EvidenceType::DrawingReference,
                serde_json::json!(1.0),
                0.2,
                Some(source.text.as_str()),
                Some(target.text.as_str()),
            ));
        }

        // Semantic similarity when both embeddings are present.
        if let (Some(source_vec), Some(target_vec)) =
            (embeddings.get(&source.id), embeddings.get(&target.id))
        {
            let similarity = cosine_similarity(source_vec, target_vec);
            if similarity > 0.3 {
                evidence.push(build_evidence(
                    EvidenceType::SemanticSimilarity,
                    serde_json::json!(similarity),
                    0.6,
                    None,
                    None,
                ));
            }
        }

        evidence
    }

    fn link_type_for(&self, source: EntityType, target: EntityType) -> Option<LinkType> {
        match (source, target) {
            (EntityType::BoqItem, EntityType::SpecSection) => Some(LinkType::Satisfies),
            (EntityType::SpecSection, EntityType::BoqItem) => Some(LinkType::Satisfies),
            (EntityType::BoqItem, EntityType::Drawing)
            | (EntityType::SpecSection, EntityType::Drawing)
            | (EntityType::Drawing, EntityType::BoqItem)
            | (EntityType::Drawing, EntityType::SpecSection) => Some(LinkType::References),
            (EntityType::Material, _) | (_, EntityType::Material) => Some(LinkType::Related),
            _ => None,
        }
    }
}

fn csi_codes_in(text: &str) -> Vec<String> {
    CSI_CODE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

fn entity_csi_codes(entity: &Entity) -> HashSet<String> {
    let mut codes: HashSet<String> = entity
        .metadata
        .get("csi_codes")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    codes.extend(csi_codes_in(&entity.text));
    codes
}

impl Pack for ConstructionPack {
    fn config(&self) -> &PackConfig {
        &self.config
    }

    fn extract_entities(
        &self,
        content: &str,
        document_id: &str,
        document_name: &str,
        document_type: &str,
        _metadata: &serde_json::Value,
    ) -> Vec<Entity> {
        match document_type.to_lowercase().as_str() {
            "boq" | "bill of quantities" | "quantities" => {
                self.extract_boq_items(content, document_id, document_name)
            }
            "spec" | "specification" | "specs" => {
                self.extract_spec_sections(content, document_id, document_name)
            }
            "drawing" | "dwg" | "cad" => self.extract_drawings(content, document_id, document_name),
            _ => {
                let mut entities = self.extract_boq_items(content, document_id, document_name);
                entities.extend(self.extract_spec_sections(content, document_id, document_name));
                entities.extend(self.extract_drawings(content, document_id, document_name));
                entities
            }
        }
    }

    fn match_entities(
        &self,
        sources: &[Entity],
        targets: &[Entity],
        embeddings: &HashMap<String, Vec<f32>>,
    ) -> Vec<MatchCandidate> {
        let mut matches = Vec::new();
        for source in sources {
            for target in targets {
                if !self.should_link(source, target) {
                    continue;
                }
                let Some(link_type) = self.link_type_for(source.entity_type, target.entity_type)
                else {
                    continue;
                };
                let evidence = self.collect_evidence(source, target, embeddings);
                if evidence.is_empty() {
                    continue;
                }
                let confidence = self.calculate_confidence(source, target, &evidence);
                if confidence >= self.config.confidence_threshold {
                    matches.push(MatchCandidate {
                        source: source.clone(),
                        target: target.clone(),
                        link_type,
                        confidence,
                        evidence,
                    });
                }
            }
        }
        matches
    }

    fn calculate_confidence(
        &self,
        _source: &Entity,
        _target: &Entity,
        evidence: &[Evidence],
    ) -> f64 {
        weighted_confidence(evidence, EvidenceType::CsiCodeMatch)
    }
}
