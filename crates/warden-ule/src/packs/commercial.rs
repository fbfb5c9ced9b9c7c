//! Commercial pack: payment certificates, invoiced amounts, and cost codes,
//! linked via cost-code matches, near-amount matches, and date proximity.

use super::base::{build_evidence, keyword_match};
use super::{weighted_confidence, MatchCandidate, Pack};
use crate::embedding::cosine_similarity;
use crate::schemas::{Entity, EntityType, Evidence, EvidenceType, LinkType, PackConfig};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

static CERTIFICATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^.*\b(?:payment\s+certificate|IPC|PC)\s*(?:No\.?|#|-)?\s*(\d+)\b.*$").unwrap()
});

static AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:[$£€]|USD|GBP|EUR|SAR|AED)\s*([0-9]{1,3}(?:,?[0-9]{3})*(?:\.[0-9]{2})?)").unwrap()
});

static COST_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(CC-\d{3,6})\b").unwrap());

static DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{4}-\d{2}-\d{2})\b").unwrap());

/// Amounts within this relative tolerance count as a near-match.
const AMOUNT_TOLERANCE: f64 = 0.05;

/// Dates further apart than this contribute no proximity evidence.
const DATE_PROXIMITY_DAYS: i64 = 30;

/// Payment-certificate and cost linking for commercial documents.
pub struct CommercialPack {
    config: PackConfig,
}

impl Default for CommercialPack {
    fn default() -> Self {
        Self::new()
    }
}

impl CommercialPack {
    pub fn new() -> Self {
        Self {
            config: PackConfig {
                name: "CommercialPack".to_string(),
                version: "1.0.0".to_string(),
                description: "Links payment certificates to BoQ items and cost codes".to_string(),
                entity_types: vec![
                    EntityType::PaymentCertificate,
                    EntityType::BoqItem,
                    EntityType::CostCode,
                ],
                link_types: vec![LinkType::CertifiedBy, LinkType::CostedBy, LinkType::Related],
                confidence_threshold: 0.7,
            },
        }
    }

    fn extract_certificates(
        &self,
        content: &str,
        document_id: &str,
        document_name: &str,
    ) -> Vec<Entity> {
        let mut seen = HashSet::new();
        CERTIFICATE
            .captures_iter(content)
            .filter_map(|caps| {
                let number = caps.get(1)?.as_str().to_string();
                if !seen.insert(number.clone()) {
                    return None;
                }
                let line = caps.get(0)?.as_str().trim().to_string();
                Some(Entity {
                    id: format!("{document_id}:ipc:{number}"),
                    entity_type: EntityType::PaymentCertificate,
                    text: line.clone(),
                    document_id: Some(document_id.to_string()),
                    document_name: Some(document_name.to_string()),
                    section: Some(format!("IPC-{number}")),
                    project_id: None,
                    metadata: serde_json::json!({
                        "certificate_no": number,
                        "amounts": amounts_in(&line),
                        "cost_codes": cost_codes_in(&line),
                        "dates": dates_in(&line),
                    }),
                })
            })
            .collect()
    }

    fn extract_cost_codes(
        &self,
        content: &str,
        document_id: &str,
        document_name: &str,
    ) -> Vec<Entity> {
        let mut seen = HashSet::new();
        COST_CODE
            .captures_iter(content)
            .filter_map(|caps| {
                let code = caps.get(1)?.as_str().to_string();
                if !seen.insert(code.clone()) {
                    return None;
                }
                Some(Entity {
                    id: format!("{document_id}:cc:{code}"),
                    entity_type: EntityType::CostCode,
                    text: code.clone(),
                    document_id: Some(document_id.to_string()),
                    document_name: Some(document_name.to_string()),
                    section: Some(code),
                    project_id: None,
                    metadata: serde_json::Value::Null,
                })
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

        // Shared cost codes.
        let source_codes = entity_cost_codes(source);
        let target_codes = entity_cost_codes(target);
        if let Some(code) = source_codes.intersection(&target_codes).next() {
            evidence.push(build_evidence(
                EvidenceType::CostCodeMatch,
                serde_json::json!(1.0),
                0.35,
                Some(code.as_str()),
                Some(code.as_str()),
            ));
        }

        // Near-amount match within tolerance.
        if let Some((a, b)) = closest_amount_pair(source, target) {
            let relative = (a - b).abs() / a.max(b).max(f64::EPSILON);
            if relative <= AMOUNT_TOLERANCE {
                evidence.push(build_evidence(
                    EvidenceType::QuantityReference,
                    serde_json::json!(1.0 - relative / AMOUNT_TOLERANCE * 0.5),
                    0.3,
                    Some(format!("{a:.2}").as_str()),
                    Some(format!("{b:.2}").as_str()),
                ));
            }
        }

        // Date proximity, decaying over the window. Both amount and date
        // evidence may contribute; the weight-normalized sum keeps the total
        // bounded.
        if let Some(days) = closest_date_gap(source, target) {
            if days <= DATE_PROXIMITY_DAYS {
                let value = 1.0 - (days as f64 / DATE_PROXIMITY_DAYS as f64);
                evidence.push(build_evidence(
                    EvidenceType::DateProximity,
                    serde_json::json!(value),
                    0.15,
                    None,
                    None,
                ));
            }
        }

        // Keyword overlap.
        let (score, matched) = keyword_match(&source.text, &target.text, None);
        if score > 0.2 {
            evidence.push(build_evidence(
                EvidenceType::KeywordMatch,
                serde_json::json!(score),
                0.2,
                Some(matched.join(", ").as_str()),
                None,
            ));
        }

        // Semantic similarity.
        if let (Some(source_vec), Some(target_vec)) =
            (embeddings.get(&source.id), embeddings.get(&target.id))
        {
            let similarity = cosine_similarity(source_vec, target_vec);
            if similarity > 0.3 {
                evidence.push(build_evidence(
                    EvidenceType::SemanticSimilarity,
                    serde_json::json!(similarity),
                    0.5,
                    None,
                    None,
                ));
            }
        }

        evidence
    }

    fn link_type_for(&self, source: EntityType, target: EntityType) -> Option<LinkType> {
        match (source, target) {
            (EntityType::PaymentCertificate, EntityType::BoqItem)
            | (EntityType::BoqItem, EntityType::PaymentCertificate) => Some(LinkType::CertifiedBy),
            (EntityType::PaymentCertificate, EntityType::CostCode)
            | (EntityType::CostCode, EntityType::PaymentCertificate)
            | (EntityType::BoqItem, EntityType::CostCode)
            | (EntityType::CostCode, EntityType::BoqItem) => Some(LinkType::CostedBy),
            (EntityType::PaymentCertificate, EntityType::PaymentCertificate) => {
                Some(LinkType::Related)
            }
            _ => None,
        }
    }
}

fn amounts_in(text: &str) -> Vec<f64> {
    AMOUNT
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| m.as_str().replace(',', "").parse::<f64>().ok())
        .collect()
}

fn cost_codes_in(text: &str) -> Vec<String> {
    COST_CODE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

fn dates_in(text: &str) -> Vec<String> {
    DATE.captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

fn entity_amounts(entity: &Entity) -> Vec<f64> {
    let mut amounts: Vec<f64> = entity
        .metadata
        .get("amounts")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_f64()).collect())
        .unwrap_or_default();
    if amounts.is_empty() {
        amounts = amounts_in(&entity.text);
    }
    amounts
}

fn entity_cost_codes(entity: &Entity) -> HashSet<String> {
    let mut codes: HashSet<String> = entity
        .metadata
        .get("cost_codes")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    codes.extend(cost_codes_in(&entity.text));
    codes
}

fn entity_dates(entity: &Entity) -> Vec<NaiveDate> {
    let raw: Vec<String> = entity
        .metadata
        .get("dates")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_else(|| dates_in(&entity.text));
    raw.iter()
        .filter_map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .collect()
}

fn closest_amount_pair(source: &Entity, target: &Entity) -> Option<(f64, f64)> {
    let source_amounts = entity_amounts(source);
    let target_amounts = entity_amounts(target);
    let mut best: Option<(f64, f64)> = None;
    for a in &source_amounts {
        for b in &target_amounts {
            let gap = (a - b).abs();
            if best
                .map(|(x, y)| gap < (x - y).abs())
                .unwrap_or(true)
            {
                best = Some((*a, *b));
            }
        }
    }
    best
}

fn closest_date_gap(source: &Entity, target: &Entity) -> Option<i64> {
    let source_dates = entity_dates(source);
    let target_dates = entity_dates(target);
    let mut best: Option<i64> = None;
    for a in &source_dates {
        for b in &target_dates {
            let gap = (*a - *b).num_days().abs();
            if best.map(|current| gap < current).unwrap_or(true) {
                best = Some(gap);
            }
        }
    }
    best
}

impl Pack for CommercialPack {
    fn config(&self) -> &PackConfig {
        &self.config
    }

    fn extract_entities(
        &self,
        content: &str,
        document_id: &str,
        document_name: &str,
        _document_type: &str,
        _metadata: &serde_json::Value,
    ) -> Vec<Entity> {
        let mut entities = self.extract_certificates(content, document_id, document_name);
        entities.extend(self.extract_cost_codes(content, document_id, document_name));
        entities
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
        weighted_confidence(evidence, EvidenceType::CostCodeMatch)
    }
}
