use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

pub type Embedding = Vec<f32>;

/// Dimensionality of [`InMemorySimilarity`] vectors.
pub const EMBEDDING_DIM: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityHit {
    pub id: String,
    pub content: String,
    pub metadata: Value,
    pub score: f32,
}

/// Vector index over past solutions. Failures are reported, never panicked on;
/// callers treat an error as "nothing recalled".
#[async_trait]
pub trait SimilarityStore: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Up to `k` documents closest to `vector`, best match first.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SimilarityHit>>;

    /// Index `content` with its metadata, returning its id.
    async fn add(&self, content: &str, metadata: Value) -> Result<String>;
}

/// Calculate cosine similarity between two vectors.
/// Returns 0.0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Hashed bag-of-words vector over lowercased alphanumeric tokens.
///
/// Buckets come from SHA-256 of the token, so vectors are identical across
/// processes, platforms and toolchains.
pub fn hashed_embedding(text: &str) -> Embedding {
    let mut vector = vec![0.0f32; EMBEDDING_DIM];
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let digest = Sha256::digest(token.to_lowercase().as_bytes());
        let bucket = u16::from_le_bytes([digest[0], digest[1]]) as usize % EMBEDDING_DIM;
        vector[bucket] += 1.0;
    }
    vector
}

struct Indexed {
    id: String,
    content: String,
    metadata: Value,
    vector: Embedding,
}

/// Process-local similarity store; contents live as long as the organ.
#[derive(Default)]
pub struct InMemorySimilarity {
    documents: RwLock<Vec<Indexed>>,
}

impl InMemorySimilarity {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }
}

#[async_trait]
impl SimilarityStore for InMemorySimilarity {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(hashed_embedding(text))
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SimilarityHit>> {
        let documents = self.documents.read().await;
        let mut hits: Vec<SimilarityHit> = documents
            .iter()
            .map(|doc| SimilarityHit {
                id: doc.id.clone(),
                content: doc.content.clone(),
                metadata: doc.metadata.clone(),
                score: cosine_similarity(vector, &doc.vector),
            })
            .filter(|hit| hit.score > 0.0)
            .collect();
        // Stable sort keeps insertion order among equal scores.
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Ok(hits)
    }

    async fn add(&self, content: &str, metadata: Value) -> Result<String> {
        let vector = self.embed(content).await?;
        let id = format!("sim-{}", uuid::Uuid::new_v4());
        self.documents.write().await.push(Indexed {
            id: id.clone(),
            content: content.to_string(),
            metadata,
            vector,
        });
        Ok(id)
    }
}
