//! Supabase-backed [`VectorStore`].
//!
//! Similarity search runs inside Postgres (pgvector) behind a SQL function
//! exposed through PostgREST:
//!
//! ```text
//! POST {url}/rest/v1/rpc/{function}
//! apikey: <key>
//! Authorization: Bearer <key>
//!
//! {"query_embedding": [...], "match_count": 5}
//! → [{"content": "...", "similarity": 0.83}, ...]
//! ```
//!
//! Rows are used in the order the function returns them, cut to `top_k`.
//! Status codes are classified exactly like provider responses; a call that
//! exceeds `store.timeout_secs` is transient. Store calls are not retried.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::{Result, Upstream};
use crate::openai::{classify_status, classify_transport};

use super::{ScoredChunk, VectorStore};

pub struct SupabaseStore {
    client: reqwest::Client,
    endpoint: String,
    key: String,
}

#[derive(Serialize)]
struct MatchRequest<'a> {
    query_embedding: &'a [f32],
    match_count: usize,
}

impl SupabaseStore {
    pub fn new(
        url: &str,
        key: &str,
        function: &str,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/rest/v1/rpc/{}", url.trim_end_matches('/'), function),
            key: key.to_string(),
        })
    }

    /// Build from `[store]` settings. The key must already be resolved.
    pub fn from_config(config: &StoreConfig) -> anyhow::Result<Self> {
        let url = config
            .url
            .as_deref()
            .context("store.url is required when backend is 'supabase'")?;
        let key = config
            .key
            .as_deref()
            .context("supabase key not resolved")?;
        Self::new(
            url,
            key,
            &config.function,
            config.timeout(),
            config.connect_timeout(),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl VectorStore for SupabaseStore {
    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        let upstream = Upstream::VectorStore;
        let body = MatchRequest {
            query_embedding: embedding,
            match_count: top_k,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(upstream, &e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(upstream, status, &text));
        }

        let mut matches: Vec<ScoredChunk> = response
            .json()
            .await
            .map_err(|e| classify_transport(upstream, &e))?;

        debug!(returned = matches.len(), top_k, "supabase similarity rpc");
        matches.truncate(top_k);
        Ok(matches)
    }
}
