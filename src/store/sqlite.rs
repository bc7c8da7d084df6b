//! SQLite-backed [`VectorStore`].
//!
//! Reads an existing table with at least these columns:
//!
//! ```sql
//! CREATE TABLE chunks (
//!     content   TEXT NOT NULL,
//!     embedding BLOB NOT NULL   -- little-endian f32, see embedding::vec_to_blob
//! );
//! ```
//!
//! The store never creates or migrates schema; populating the table is the
//! job of the ingestion pipeline. Similarity is brute-force cosine over all
//! rows, which is adequate for documentation-sized corpora.

use std::path::Path;
use std::str::FromStr;

use anyhow::bail;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::debug;

use crate::embedding::{blob_to_vec, cosine_similarity};
use crate::error::{RagError, Result, Upstream};

use super::{rank, ScoredChunk, VectorStore};

pub struct SqliteStore {
    pool: SqlitePool,
    table: String,
}

impl SqliteStore {
    /// Wrap an existing pool. `table` must be a plain SQL identifier.
    pub fn new(pool: SqlitePool, table: &str) -> anyhow::Result<Self> {
        if !is_identifier(table) {
            bail!("store.table '{}' is not a valid table name", table);
        }
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    /// Open the database file at `path`. The file must already exist.
    pub async fn connect(path: &Path, table: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(false)
            .read_only(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::new(pool, table)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn classify_sqlx(err: sqlx::Error) -> RagError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            RagError::transient(Upstream::VectorStore, err.to_string())
        }
        other => RagError::terminal(Upstream::VectorStore, None, other.to_string()),
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        let sql = format!("SELECT content, embedding FROM {}", self.table);
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(classify_sqlx)?;

        let scored: Vec<ScoredChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                ScoredChunk {
                    content: row.get("content"),
                    score: cosine_similarity(embedding, &blob_to_vec(&blob)) as f64,
                }
            })
            .collect();

        debug!(table = %self.table, scanned = scored.len(), top_k, "sqlite similarity scan");
        Ok(rank(scored, top_k))
    }
}
