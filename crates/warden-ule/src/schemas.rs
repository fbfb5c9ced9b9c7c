//! Entity, link, and evidence schemas shared by packs and the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Domain entity categories packs may extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    BoqItem,
    SpecSection,
    PaymentCertificate,
    Drawing,
    Clause,
    Material,
    CostCode,
    Generic,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::BoqItem => "boq_item",
            EntityType::SpecSection => "spec_section",
            EntityType::PaymentCertificate => "payment_certificate",
            EntityType::Drawing => "drawing",
            EntityType::Clause => "clause",
            EntityType::Material => "material",
            EntityType::CostCode => "cost_code",
            EntityType::Generic => "generic",
        }
    }
}

/// Typed relationships between entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    References,
    DerivedFrom,
    Satisfies,
    CertifiedBy,
    CostedBy,
    Related,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::References => "references",
            LinkType::DerivedFrom => "derived_from",
            LinkType::Satisfies => "satisfies",
            LinkType::CertifiedBy => "certified_by",
            LinkType::CostedBy => "costed_by",
            LinkType::Related => "related",
        }
    }
}

/// Kinds of observations supporting a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    KeywordMatch,
    SemanticSimilarity,
    CsiCodeMatch,
    MaterialMatch,
    QuantityReference,
    ClauseReference,
    DrawingReference,
    CostCodeMatch,
    DateProximity,
    RuleBased,
}

/// A stable, typed unit of content. Ids must be stable across re-runs so the
/// engine stays idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub entity_type: EntityType,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// One weighted observation supporting a link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub evidence_type: EvidenceType,
    pub value: serde_json::Value,
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_text: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A typed, confidence-scored, evidence-bearing relationship.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub id: Uuid,
    pub source: Entity,
    pub target: Entity,
    pub link_type: LinkType,
    pub confidence: f64,
    pub evidence: Vec<Evidence>,
    pub pack_name: String,
    #[serde(default)]
    pub validated: bool,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Pack identity and tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackConfig {
    pub name: String,
    pub version: String,
    pub description: String,
    pub entity_types: Vec<EntityType>,
    pub link_types: Vec<LinkType>,
    pub confidence_threshold: f64,
}

/// Input document for linking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInput {
    pub document_id: String,
    pub document_name: String,
    pub content: String,
    pub document_type: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Result of `process_document` / `find_links`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default)]
    pub links: Vec<Link>,
    pub total_entities_processed: usize,
    pub total_links_found: usize,
    pub processing_time_ms: f64,
    #[serde(default)]
    pub packs_used: Vec<String>,
    pub confidence_threshold: f64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl LinkResult {
    pub fn empty(document_id: Option<String>, threshold: f64) -> Self {
        Self {
            document_id,
            query: None,
            links: Vec::new(),
            total_entities_processed: 0,
            total_links_found: 0,
            processing_time_ms: 0.0,
            packs_used: Vec::new(),
            confidence_threshold: threshold,
            metadata: serde_json::Value::Null,
        }
    }
}

/// A link plus a human-readable explanation of its evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceResponse {
    pub link: Link,
    pub explanation: String,
}
