//! warden-ule: the universal linking engine.
//!
//! A pluggable "pack" framework extracts domain entities from document text
//! and produces confidence-scored, evidence-bearing links between them.
//! Rule-based matching combines with semantic similarity when an embedding
//! provider is configured; without one, semantic evidence is simply omitted.

pub mod embedding;
mod engine;
pub mod packs;
mod schemas;
mod store;

pub use embedding::{EmbeddingProvider, HashEmbedder, RemoteEmbedder, VectorIndex};
pub use engine::{FindLinksQuery, UleEngine, UleStatistics};
pub use packs::{CommercialPack, ConstructionPack, HydrationPack, MatchCandidate, Pack};
pub use schemas::{
    DocumentInput, Entity, EntityType, Evidence, EvidenceResponse, EvidenceType, Link,
    LinkResult, LinkType, PackConfig,
};
pub use store::UleStore;

/// ULE errors. Conflicts (duplicate pack names) map to 409, missing links to
/// 404 at the HTTP boundary.
#[derive(Debug, thiserror::Error)]
pub enum UleError {
    #[error(transparent)]
    Store(#[from] warden_core::StoreError),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("embedding provider error: {0}")]
    Provider(String),
}
