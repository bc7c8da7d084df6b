//! In-memory [`VectorStore`] for tests and local development.
//!
//! Chunks live in a `Vec` behind `std::sync::RwLock`. Queries are
//! brute-force cosine similarity over every stored vector.

use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{RagError, Result};

use super::{rank, ScoredChunk, VectorStore};

struct StoredChunk {
    content: String,
    vector: Vec<f32>,
}

pub struct InMemoryStore {
    chunks: RwLock<Vec<StoredChunk>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
        }
    }

    /// Build a store from `(content, vector)` pairs.
    pub fn with_chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<f32>)>,
        S: Into<String>,
    {
        let store = Self::new();
        for (content, vector) in chunks {
            store.insert(content, vector);
        }
        store
    }

    pub fn insert(&self, content: impl Into<String>, vector: Vec<f32>) {
        let mut chunks = self.chunks.write().unwrap_or_else(|e| e.into_inner());
        chunks.push(StoredChunk {
            content: content.into(),
            vector,
        });
    }

    pub fn len(&self) -> usize {
        self.chunks.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        let chunks = self
            .chunks
            .read()
            .map_err(|_| RagError::internal("in-memory store lock poisoned"))?;

        let scored = chunks
            .iter()
            .map(|c| ScoredChunk {
                content: c.content.clone(),
                score: cosine_similarity(embedding, &c.vector) as f64,
            })
            .collect();

        Ok(rank(scored, top_k))
    }
}
