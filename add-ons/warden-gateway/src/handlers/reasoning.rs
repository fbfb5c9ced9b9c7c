//! Reasoning (ULE) resource family: linking, processing, evidence, packs.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use warden_ule::{DocumentInput, EntityType, FindLinksQuery, LinkResult, LinkType};

#[derive(Deserialize)]
pub struct LinkBody {
    document_id: Option<String>,
    query_text: Option<String>,
    entity_types: Option<Vec<EntityType>>,
    link_types: Option<Vec<LinkType>>,
    packs: Option<Vec<String>>,
    confidence_threshold: Option<f64>,
    #[serde(default)]
    max_links: usize,
}

pub async fn link(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LinkBody>,
) -> Result<Json<LinkResult>, ApiError> {
    if body.document_id.is_none() && body.query_text.is_none() {
        return Err(ApiError::BadRequest(
            "either document_id or query_text is required".to_string(),
        ));
    }
    let result = state
        .ule
        .find_links(FindLinksQuery {
            document_id: body.document_id,
            query_text: body.query_text,
            entity_types: body.entity_types,
            link_types: body.link_types,
            packs: body.packs,
            confidence_threshold: body.confidence_threshold,
            max_links: body.max_links,
        })
        .await?;
    Ok(Json(result))
}

#[derive(Deserialize)]
pub struct ProcessBody {
    document_id: String,
    document_name: String,
    content: String,
    #[serde(default = "default_document_type")]
    document_type: String,
    #[serde(default)]
    metadata: serde_json::Value,
    packs: Option<Vec<String>>,
}

fn default_document_type() -> String {
    "other".to_string()
}

pub async fn process(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ProcessBody>,
) -> Result<Json<LinkResult>, ApiError> {
    let document = DocumentInput {
        document_id: body.document_id,
        document_name: body.document_name,
        content: body.content,
        document_type: body.document_type,
        metadata: body.metadata,
    };
    let result = state
        .ule
        .process_document(&document, body.packs.as_deref())
        .await?;
    Ok(Json(result))
}

pub async fn links_for_document(
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let links = state.ule.links_for_document(&document_id)?;
    Ok(Json(serde_json::json!({
        "document_id": document_id,
        "links": links,
    })))
}

pub async fn evidence(
    State(state): State<Arc<AppState>>,
    Path(link_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = Uuid::parse_str(&link_id)
        .map_err(|_| ApiError::BadRequest(format!("invalid link id '{link_id}'")))?;
    let response = state
        .ule
        .get_evidence(id)?
        .ok_or_else(|| ApiError::NotFound(format!("link {link_id}")))?;
    Ok(Json(serde_json::to_value(response).unwrap_or_default()))
}

pub async fn packs(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "packs": state.ule.list_packs() }))
}

pub async fn stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = state.ule.get_statistics()?;
    Ok(Json(serde_json::to_value(stats).unwrap_or_default()))
}
