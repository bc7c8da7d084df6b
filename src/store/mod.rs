//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the only operation the retriever needs from
//! a backend: nearest-neighbour lookup by embedding. Backends:
//!
//! | Backend | Type | Notes |
//! |---------|------|-------|
//! | `memory` | [`InMemoryStore`] | brute-force cosine, tests and local runs |
//! | `sqlite` | [`SqliteStore`] | reads an existing `content`/`embedding` table |
//! | `supabase` | [`SupabaseStore`] | Postgres similarity function over REST RPC |
//!
//! Implementations must be `Send + Sync`; one handle is shared by every
//! in-flight query.

pub mod memory;
pub mod sqlite;
pub mod supabase;

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::StoreConfig;
use crate::error::Result;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use supabase::SupabaseStore;

/// A stored chunk matched by a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub content: String,
    /// Cosine similarity to the query embedding; higher is closer.
    #[serde(alias = "similarity")]
    pub score: f64,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Return up to `top_k` chunks in the backend's relevance order. The
    /// local backends score and sort themselves; remote backends keep the
    /// order the server returned.
    ///
    /// # Errors
    ///
    /// [`RagError::Transient`](crate::error::RagError::Transient) or
    /// [`RagError::Terminal`](crate::error::RagError::Terminal) tagged with
    /// [`Upstream::VectorStore`](crate::error::Upstream::VectorStore).
    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>>;
}

/// Order by descending score and keep the first `top_k`.
pub(crate) fn rank(mut chunks: Vec<ScoredChunk>, top_k: usize) -> Vec<ScoredChunk> {
    chunks.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    chunks.truncate(top_k);
    chunks
}

/// Open the backend named by `config.backend`.
pub async fn connect(config: &StoreConfig) -> anyhow::Result<Arc<dyn VectorStore>> {
    let store: Arc<dyn VectorStore> = match config.backend.as_str() {
        "memory" => Arc::new(InMemoryStore::new()),
        "sqlite" => {
            let path = config
                .path
                .as_deref()
                .context("store.path is required when backend is 'sqlite'")?;
            Arc::new(SqliteStore::connect(path, &config.table).await?)
        }
        "supabase" => Arc::new(SupabaseStore::from_config(config)?),
        other => anyhow::bail!(
            "Unknown store backend: '{}'. Must be memory, sqlite, or supabase.",
            other
        ),
    };
    Ok(store)
}
