//! Embedding provider abstraction and the OpenAI implementation.
//!
//! Defines the [`Embedder`] trait and:
//! - **[`OpenAIEmbedder`]**: calls `POST {base_url}/embeddings` with retry
//!   and backoff through [`OpenAITransport`].
//!
//! Also provides vector utilities shared by the stores:
//! - [`cosine_similarity`]: similarity between two embedding vectors
//! - [`vec_to_blob`]: encode a `Vec<f32>` as little-endian bytes for SQLite BLOB storage
//! - [`blob_to_vec`]: decode a SQLite BLOB back into a `Vec<f32>`
//!
//! # Ordering
//!
//! `embed_batch(texts)[i]` is always the embedding of `texts[i]`. Response
//! items are placed by their `index` field, not by arrival order.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::ProviderConfig;
use crate::error::{RagError, Result, Upstream};
use crate::openai::OpenAITransport;

/// A fixed-dimensionality embedding vector.
pub type EmbeddingVector = Vec<f32>;

/// Trait for embedding providers.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Embed a batch of texts, one vector per input in input order.
    ///
    /// # Errors
    ///
    /// - [`RagError::Validation`] for an empty batch or an empty text.
    /// - [`RagError::Terminal`] when the provider rejects the batch (for
    ///   example because it is too large). The batch is never truncated.
    /// - [`RagError::Transient`] once the retry budget is exhausted.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<EmbeddingVector> {
        let results = self.embed_batch(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| RagError::terminal(Upstream::Embedding, None, "empty embedding response"))
    }
}

/// Reject empty batches and blank inputs before any network call.
pub fn validate_inputs(texts: &[String]) -> Result<()> {
    if texts.is_empty() {
        return Err(RagError::validation("embedding batch must not be empty"));
    }
    if let Some(i) = texts.iter().position(|t| t.trim().is_empty()) {
        return Err(RagError::validation(format!(
            "embedding input {} must not be empty",
            i
        )));
    }
    Ok(())
}

// ============ OpenAI Embedder ============

/// Embedding client for the OpenAI embeddings API.
pub struct OpenAIEmbedder {
    transport: OpenAITransport,
    model: String,
    dims: Option<usize>,
}

impl OpenAIEmbedder {
    pub fn new(transport: OpenAITransport, config: &ProviderConfig) -> Self {
        Self {
            transport,
            model: config.embedding_model.clone(),
            dims: config.embedding_dims,
        }
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>> {
        validate_inputs(texts)?;

        let body = json!({
            "model": self.model,
            "input": texts,
            "encoding_format": "float",
        });

        let response = self
            .transport
            .post_json("embeddings", &body, Upstream::Embedding)
            .await?;

        let vectors = parse_openai_response(&response, texts.len())?;

        if let Some(dims) = self.dims {
            if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
                return Err(RagError::terminal(
                    Upstream::Embedding,
                    None,
                    format!("expected {} dimensions, provider returned {}", dims, bad.len()),
                ));
            }
        }

        debug!(
            model = %self.model,
            count = vectors.len(),
            dims = vectors.first().map(|v| v.len()).unwrap_or(0),
            "embedded batch"
        );
        Ok(vectors)
    }
}

/// Parse the OpenAI embeddings API response JSON.
///
/// Extracts the `data[].embedding` arrays and places each at its `index`.
/// Fails if the number of embeddings does not match `expected`.
pub fn parse_openai_response(json: &Value, expected: usize) -> Result<Vec<EmbeddingVector>> {
    let malformed = |msg: &str| RagError::terminal(Upstream::Embedding, None, msg.to_string());

    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| malformed("Invalid embeddings response: missing data array"))?;

    if data.len() != expected {
        return Err(RagError::terminal(
            Upstream::Embedding,
            None,
            format!(
                "provider returned {} embeddings for {} inputs",
                data.len(),
                expected
            ),
        ));
    }

    let mut slots: Vec<Option<EmbeddingVector>> = vec![None; expected];

    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);

        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| malformed("Invalid embeddings response: missing embedding"))?;

        let vec = embedding
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| malformed("Invalid embeddings response: non-numeric component"))?;

        match slots.get_mut(index) {
            Some(slot) if slot.is_none() => *slot = Some(vec),
            _ => {
                return Err(RagError::terminal(
                    Upstream::Embedding,
                    None,
                    format!("embedding index {} out of range or duplicated", index),
                ))
            }
        }
    }

    slots
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| malformed("Invalid embeddings response: missing index"))
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use mimir::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector. Trailing bytes that do not form
/// a whole `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors of
/// different lengths, or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
