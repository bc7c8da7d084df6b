//! Query pipeline: embed → retrieve → prompt → generate.
//!
//! [`AnswerOrchestrator`] runs the stages strictly in sequence and makes
//! exactly one call to each dependency per query. It holds no per-query
//! state, so one instance serves any number of concurrent queries.
//!
//! Failures are returned unchanged; each dependency has already applied
//! its own retry policy. Use [`RagError::class`](crate::error::RagError::class)
//! to decide how to report them.

use std::sync::Arc;

use tracing::{debug, debug_span, Instrument};

use crate::chat::{ChatMessage, ChatModel, CompletionOptions, OpenAIChat};
use crate::config::Config;
use crate::embedding::{Embedder, OpenAIEmbedder};
use crate::error::{RagError, Result};
use crate::openai::OpenAITransport;
use crate::prompt::build_messages;
use crate::retriever::ContextRetriever;
use crate::retry::RetryPolicy;
use crate::store;
use crate::stream::FragmentStream;

/// Cache hint for the shared system-prompt prefix.
const PROMPT_CACHE_KEY: &str = "mimir-answer-v1";

pub struct AnswerOrchestrator {
    embedder: Arc<dyn Embedder>,
    retriever: ContextRetriever,
    chat: Arc<dyn ChatModel>,
    options: CompletionOptions,
    top_k: usize,
}

impl AnswerOrchestrator {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        retriever: ContextRetriever,
        chat: Arc<dyn ChatModel>,
        options: CompletionOptions,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            retriever,
            chat,
            options,
            top_k: top_k.max(1),
        }
    }

    /// Production wiring: OpenAI embedder and chat sharing one transport,
    /// plus the configured vector store.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let policy = RetryPolicy::from_config(&config.retry);
        let transport = OpenAITransport::new(&config.provider, policy)?;

        let embedder = Arc::new(OpenAIEmbedder::new(transport.clone(), &config.provider));
        let chat = Arc::new(OpenAIChat::new(transport, &config.provider));
        let store = store::connect(&config.store).await?;

        let options =
            CompletionOptions::from_config(&config.provider).with_cache_prefix_key(PROMPT_CACHE_KEY);

        Ok(Self::new(
            embedder,
            ContextRetriever::new(store, config.retrieval.separator.clone()),
            chat,
            options,
            config.retrieval.top_k,
        ))
    }

    /// Answer `query` as a stream of fragments, passed through from the
    /// chat model untouched.
    ///
    /// # Errors
    ///
    /// - [`RagError::Validation`] for an empty or whitespace-only query,
    ///   before any outbound call.
    /// - Whatever the embedder, store or chat model returned, unchanged.
    pub async fn answer_query(&self, query: &str) -> Result<FragmentStream> {
        let span = debug_span!("answer_query", query_chars = query.len(), stream = true);
        async {
            let messages = self.prepare(query).await?;
            let fragments = self.chat.complete_streaming(&messages, &self.options).await?;
            debug!("completion stream handed to caller");
            Ok(fragments)
        }
        .instrument(span)
        .await
    }

    /// Same pipeline as [`answer_query`](Self::answer_query) but waits for
    /// the whole answer in a single completion call.
    pub async fn answer_query_complete(&self, query: &str) -> Result<String> {
        let span = debug_span!("answer_query", query_chars = query.len(), stream = false);
        async {
            let messages = self.prepare(query).await?;
            self.chat.complete(&messages, &self.options).await
        }
        .instrument(span)
        .await
    }

    async fn prepare(&self, query: &str) -> Result<Vec<ChatMessage>> {
        if query.trim().is_empty() {
            return Err(RagError::validation("query must not be empty"));
        }

        let embedding = self.embedder.embed(query).await?;
        debug!(dims = embedding.len(), "query embedded");

        let context = self
            .retriever
            .retrieve_context(&embedding, self.top_k)
            .await?;

        Ok(build_messages(query, &context))
    }
}
