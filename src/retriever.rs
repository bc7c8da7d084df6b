//! Context retrieval: nearest chunks for a query embedding, joined into one
//! context string.

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::store::{ScoredChunk, VectorStore};

/// Context text handed to the prompt builder, plus the matches it came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievedContext {
    pub text: String,
    pub matches: Vec<ScoredChunk>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

#[derive(Clone)]
pub struct ContextRetriever {
    store: Arc<dyn VectorStore>,
    separator: String,
}

impl ContextRetriever {
    pub fn new(store: Arc<dyn VectorStore>, separator: impl Into<String>) -> Self {
        Self {
            store,
            separator: separator.into(),
        }
    }

    /// Fetch up to `top_k` chunks and join their contents in the store's
    /// order. No matches yields an empty context, not an error. Store
    /// failures are returned as-is.
    pub async fn retrieve_context(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<RetrievedContext> {
        let matches = self.store.query(embedding, top_k).await?;

        let text = matches
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join(&self.separator);

        debug!(
            matches = matches.len(),
            top_score = matches.first().map(|m| m.score).unwrap_or(0.0),
            context_chars = text.len(),
            "retrieved context"
        );

        Ok(RetrievedContext { text, matches })
    }
}
