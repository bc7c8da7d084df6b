//! In-process fakes shared by the pipeline and HTTP tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mimir::chat::{ChatMessage, ChatModel, CompletionOptions};
use mimir::embedding::{EmbeddingVector, Embedder};
use mimir::error::{RagError, Result};
use mimir::orchestrator::AnswerOrchestrator;
use mimir::retriever::ContextRetriever;
use mimir::store::{ScoredChunk, VectorStore};
use mimir::stream::FragmentStream;
use tokio_util::sync::CancellationToken;

/// Names of the dependency calls, in the order they happened.
pub type CallLog = Arc<Mutex<Vec<&'static str>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn calls(log: &CallLog) -> Vec<&'static str> {
    log.lock().unwrap().clone()
}

pub struct FakeEmbedder {
    pub log: CallLog,
    pub failure: Option<fn() -> RagError>,
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn model_name(&self) -> &str {
        "fake-embedding"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>> {
        self.log.lock().unwrap().push("embed");
        if let Some(failure) = self.failure {
            return Err(failure());
        }
        Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
    }
}

pub struct FakeStore {
    pub log: CallLog,
    pub chunks: Vec<ScoredChunk>,
    pub failure: Option<fn() -> RagError>,
}

#[async_trait]
impl VectorStore for FakeStore {
    async fn query(&self, _embedding: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        self.log.lock().unwrap().push("retrieve");
        if let Some(failure) = self.failure {
            return Err(failure());
        }
        Ok(self.chunks.iter().take(top_k).cloned().collect())
    }
}

/// Chat model that replays fixed fragments and counts how many the
/// consumer actually pulled.
pub struct ScriptedChat {
    pub log: CallLog,
    pub fragments: Vec<String>,
    pub pulled: Arc<AtomicUsize>,
    pub prompts: Mutex<Vec<Vec<ChatMessage>>>,
    pub failure: Option<fn() -> RagError>,
    /// Yield a mid-stream error in place of the fragment at this index.
    pub fail_at: Option<usize>,
}

impl ScriptedChat {
    pub fn new(log: CallLog, fragments: &[&str]) -> Self {
        Self {
            log,
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            pulled: Arc::new(AtomicUsize::new(0)),
            prompts: Mutex::new(Vec::new()),
            failure: None,
            fail_at: None,
        }
    }

    pub fn pulled(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Vec<ChatMessage> {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> Result<String> {
        self.log.lock().unwrap().push("complete");
        self.prompts.lock().unwrap().push(messages.to_vec());
        if let Some(failure) = self.failure {
            return Err(failure());
        }
        Ok(self.fragments.concat())
    }

    async fn complete_streaming(
        &self,
        messages: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> Result<FragmentStream> {
        self.log.lock().unwrap().push("complete");
        self.prompts.lock().unwrap().push(messages.to_vec());
        if let Some(failure) = self.failure {
            return Err(failure());
        }

        let fragments = self.fragments.clone();
        let pulled = self.pulled.clone();
        let fail_at = self.fail_at;

        let stream = async_stream::stream! {
            for (i, fragment) in fragments.into_iter().enumerate() {
                if fail_at == Some(i) {
                    // Let the consumer flush what it has before the failure lands.
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    yield Err(RagError::mid_stream("connection reset by provider"));
                    return;
                }
                pulled.fetch_add(1, Ordering::SeqCst);
                yield Ok(fragment);
            }
        };
        Ok(FragmentStream::new(stream, CancellationToken::new()))
    }
}

pub fn chunk(content: &str, score: f64) -> ScoredChunk {
    ScoredChunk {
        content: content.to_string(),
        score,
    }
}

pub fn orchestrator(
    embedder: FakeEmbedder,
    store: FakeStore,
    chat: Arc<ScriptedChat>,
) -> AnswerOrchestrator {
    AnswerOrchestrator::new(
        Arc::new(embedder),
        ContextRetriever::new(Arc::new(store), "\n\n"),
        chat,
        CompletionOptions::default(),
        5,
    )
}

/// A pipeline whose fakes all succeed, retrieving two chunks.
pub fn happy_pipeline(fragments: &[&str]) -> (AnswerOrchestrator, Arc<ScriptedChat>, CallLog) {
    let log = call_log();
    let chat = Arc::new(ScriptedChat::new(log.clone(), fragments));
    let orchestrator = orchestrator(
        FakeEmbedder {
            log: log.clone(),
            failure: None,
        },
        FakeStore {
            log: log.clone(),
            chunks: vec![
                chunk("Transaction builders assemble UTxOs...", 0.91),
                chunk("They support multi-asset outputs...", 0.87),
            ],
            failure: None,
        },
        chat.clone(),
    );
    (orchestrator, chat, log)
}
