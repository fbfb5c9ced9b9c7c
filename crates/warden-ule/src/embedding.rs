//! Embedding providers and the similarity index.
//!
//! The provider is pluggable: a deterministic local hash embedder by default,
//! a remote HTTP provider when configured, or none at all. Without one the
//! engine simply omits semantic evidence. The index is a brute-force
//! normalized dot-product scan; an approximate index can slot in behind the
//! same surface when the deployment needs it.

use crate::UleError;
use async_trait::async_trait;

/// Produces dense vectors for entity texts.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn dimension(&self) -> usize;
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, UleError>;
}

/// Deterministic local embedder: FNV-hashed token buckets, unit-normalized.
/// Same text always yields the same vector, which keeps re-runs idempotent
/// and tests stable.
pub struct HashEmbedder {
    dims: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self { dims: 64 }
    }
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(8) }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() >= 2)
        {
            let bucket = (fnv1a(token.as_bytes()) as usize) % self.dims;
            vector[bucket] += 1.0;
        }
        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, UleError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Remote embedding API: POSTs `{"input": [...]}` with a bearer key and
/// expects `{"data": [{"embedding": [...]}]}`.
pub struct RemoteEmbedder {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    dims: usize,
}

impl RemoteEmbedder {
    pub fn new(url: String, api_key: Option<String>, dims: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            api_key,
            dims,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbedder {
    fn dimension(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, UleError> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "input": texts }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|err| UleError::Provider(err.to_string()))?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| UleError::Provider(err.to_string()))?;
        let data = body
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| UleError::Provider("missing 'data' in embedding response".into()))?;
        let mut out = Vec::with_capacity(data.len());
        for row in data {
            let embedding = row
                .get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| UleError::Provider("missing 'embedding' field".into()))?;
            let mut vector: Vec<f32> = embedding
                .iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect();
            normalize(&mut vector);
            out.push(vector);
        }
        Ok(out)
    }
}

/// Brute-force similarity index over unit vectors.
#[derive(Default)]
pub struct VectorIndex {
    entries: Vec<(String, Vec<f32>)>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the vector for an id. Vectors are normalized on
    /// entry so search reduces to a dot product.
    pub fn upsert(&mut self, id: &str, mut vector: Vec<f32>) {
        normalize(&mut vector);
        if let Some(entry) = self.entries.iter_mut().find(|(eid, _)| eid == id) {
            entry.1 = vector;
        } else {
            self.entries.push((id.to_string(), vector));
        }
    }

    pub fn get(&self, id: &str) -> Option<&[f32]> {
        self.entries
            .iter()
            .find(|(eid, _)| eid == id)
            .map(|(_, v)| v.as_slice())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top-k ids by similarity to `query`, best first.
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<(String, f32)> {
        let mut normalized = query.to_vec();
        normalize(&mut normalized);
        let mut scored: Vec<(String, f32)> = self
            .entries
            .iter()
            .map(|(id, vector)| (id.clone(), dot(&normalized, vector)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }
}

/// Cosine similarity clamped into [0, 1].
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0) as f64
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::default();
        let texts = vec!["concrete grade 40 column".to_string()];
        let a = embedder.embed(&texts).await.unwrap();
        let b = embedder.embed(&texts).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
    }

    #[tokio::test]
    async fn similar_texts_score_higher_than_unrelated() {
        let embedder = HashEmbedder::default();
        let texts = vec![
            "concrete grade 40 supply and pour".to_string(),
            "supply concrete grade 40".to_string(),
            "painting of internal walls".to_string(),
        ];
        let vectors = embedder.embed(&texts).await.unwrap();
        let close = cosine_similarity(&vectors[0], &vectors[1]);
        let far = cosine_similarity(&vectors[0], &vectors[2]);
        assert!(close > far);
    }

    #[tokio::test]
    async fn index_returns_best_match_first() {
        let embedder = HashEmbedder::default();
        let texts = vec![
            "structural steel beams level 2".to_string(),
            "waterproofing membrane basement".to_string(),
        ];
        let vectors = embedder.embed(&texts).await.unwrap();
        let mut index = VectorIndex::new();
        index.upsert("steel", vectors[0].clone());
        index.upsert("membrane", vectors[1].clone());

        let query = embedder
            .embed(&["steel beams for level 2".to_string()])
            .await
            .unwrap();
        let hits = index.search(&query[0], 2);
        assert_eq!(hits[0].0, "steel");
    }

    #[test]
    fn upsert_replaces_existing_vectors() {
        let mut index = VectorIndex::new();
        index.upsert("a", vec![1.0, 0.0]);
        index.upsert("a", vec![0.0, 1.0]);
        assert_eq!(index.len(), 1);
        let hits = index.search(&[0.0, 1.0], 1);
        assert!(hits[0].1 > 0.99);
    }
}
