//! Provider client tests against a local mock of the OpenAI and Supabase
//! HTTP APIs.

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use futures_util::StreamExt;
use mimir::chat::{ChatMessage, ChatModel, CompletionOptions, OpenAIChat};
use mimir::config::{Config, ProviderConfig};
use mimir::embedding::{Embedder, OpenAIEmbedder};
use mimir::error::{RagError, Upstream};
use mimir::openai::OpenAITransport;
use mimir::orchestrator::AnswerOrchestrator;
use mimir::retriever::ContextRetriever;
use mimir::retry::RetryPolicy;
use mimir::store::{SupabaseStore, VectorStore};
use serde_json::{json, Value};

const ANSWER: [&str; 4] = ["Transaction", " builders", " assemble", " UTxOs..."];

// ─── Mock provider ──────────────────────────────────────────────────

#[derive(Clone, Copy, Default)]
enum ChatMode {
    #[default]
    Answer,
    /// One fragment every 20ms, fifty in total.
    Slow,
    /// One fragment, then the connection ends without `[DONE]`.
    Truncated,
}

#[derive(Clone, Default)]
struct Mock {
    embed_calls: Arc<AtomicUsize>,
    chat_calls: Arc<AtomicUsize>,
    rpc_calls: Arc<AtomicUsize>,
    produced: Arc<AtomicUsize>,
    /// The first `fail_first` calls to any endpoint fail with `fail_status`.
    fail_first: usize,
    fail_status: u16,
    fail_body: &'static str,
    chat_mode: ChatMode,
    /// Hold every RPC response this long before answering.
    rpc_delay: Option<Duration>,
}

impl Mock {
    fn failing(fail_first: usize, fail_status: u16, fail_body: &'static str) -> Self {
        Self {
            fail_first,
            fail_status,
            fail_body,
            ..Self::default()
        }
    }

    fn failure(&self) -> Response {
        let status = StatusCode::from_u16(self.fail_status).unwrap();
        (status, self.fail_body.to_string()).into_response()
    }
}

fn authorized(headers: &HeaderMap, key: &str) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {}", key))
        .unwrap_or(false)
}

fn delta_event(text: &str) -> String {
    format!(
        "data: {}\n\n",
        json!({"choices": [{"index": 0, "delta": {"content": text}}]})
    )
}

async fn embeddings(State(m): State<Mock>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let n = m.embed_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if !authorized(&headers, "sk-test") {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if n <= m.fail_first {
        return m.failure();
    }
    assert_eq!(body["encoding_format"], "float");

    let inputs = body["input"].as_array().cloned().unwrap_or_default();
    // Answer in reverse order; clients must place items by index.
    let data: Vec<Value> = (0..inputs.len())
        .rev()
        .map(|i| json!({"object": "embedding", "index": i, "embedding": [i as f32, 1.0]}))
        .collect();
    Json(json!({"object": "list", "data": data})).into_response()
}

async fn chat(State(m): State<Mock>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let n = m.chat_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if !authorized(&headers, "sk-test") {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if n <= m.fail_first {
        return m.failure();
    }

    if body["stream"] != true {
        return Json(json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": ANSWER.concat()}}]
        }))
        .into_response();
    }

    let body = match m.chat_mode {
        ChatMode::Answer => {
            let mut text = String::from(": keep-alive\n\n");
            text.push_str("data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n");
            for fragment in ANSWER {
                text.push_str(&delta_event(fragment));
            }
            text.push_str("data: [DONE]\n\n");
            // Five-byte pieces so event lines straddle chunk boundaries.
            let chunks: Vec<Result<Vec<u8>, Infallible>> =
                text.as_bytes().chunks(5).map(|c| Ok(c.to_vec())).collect();
            Body::from_stream(futures_util::stream::iter(chunks))
        }
        ChatMode::Slow => {
            let produced = m.produced.clone();
            Body::from_stream(async_stream::stream! {
                for i in 0..50 {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    produced.fetch_add(1, Ordering::SeqCst);
                    yield Ok::<_, Infallible>(delta_event(&format!("word{} ", i)));
                }
                yield Ok("data: [DONE]\n\n".to_string());
            })
        }
        ChatMode::Truncated => Body::from(delta_event("Transaction")),
    };

    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

async fn match_documents(
    State(m): State<Mock>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let n = m.rpc_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if let Some(delay) = m.rpc_delay {
        tokio::time::sleep(delay).await;
    }
    let apikey = headers.get("apikey").and_then(|v| v.to_str().ok());
    if apikey != Some("service-key") || !authorized(&headers, "service-key") {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if n <= m.fail_first {
        return m.failure();
    }
    if body["query_embedding"].as_array().map(|a| a.len()) != Some(2) {
        return StatusCode::BAD_REQUEST.into_response();
    }

    if body["match_count"].as_u64().is_none() {
        return StatusCode::BAD_REQUEST.into_response();
    }

    // Not sorted by similarity; the order is the server's to decide.
    let rows = vec![
        json!({"id": 7, "content": "Wallets sign transactions.", "similarity": 0.41}),
        json!({"id": 3, "content": "MeshTxBuilder assembles transactions.", "similarity": 0.93}),
        json!({"id": 9, "content": "Minting uses a native script.", "similarity": 0.62}),
    ];
    Json(Value::Array(rows)).into_response()
}

async fn spawn_mock(mock: Mock) -> String {
    let app = Router::new()
        .route("/v1/embeddings", post(embeddings))
        .route("/v1/chat/completions", post(chat))
        .route("/rest/v1/rpc/match_documents", post(match_documents))
        .with_state(mock);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{}", addr)
}

fn test_config(base: &str) -> Config {
    toml::from_str(&format!(
        r#"
[provider]
api_key = "sk-test"
base_url = "{}/v1"
request_timeout_secs = 5
stream_idle_timeout_secs = 5

[retry]
max_attempts = 4
base_delay_ms = 1
max_delay_ms = 5
"#,
        base
    ))
    .unwrap()
}

fn provider(base: &str) -> ProviderConfig {
    test_config(base).provider
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

fn embedder(base: &str, max_attempts: u32) -> OpenAIEmbedder {
    let config = provider(base);
    let transport = OpenAITransport::new(&config, fast_retry(max_attempts)).unwrap();
    OpenAIEmbedder::new(transport, &config)
}

fn chat_client(base: &str, max_attempts: u32) -> OpenAIChat {
    let config = provider(base);
    let transport = OpenAITransport::new(&config, fast_retry(max_attempts)).unwrap();
    OpenAIChat::new(transport, &config)
}

fn question() -> Vec<ChatMessage> {
    vec![
        ChatMessage::system("Answer from the documentation."),
        ChatMessage::user("What is a transaction builder?"),
    ]
}

// ─── Embeddings ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_embeddings_recover_after_rate_limit() {
    let mock = Mock::failing(2, 429, r#"{"error":{"message":"Rate limit reached"}}"#);
    let calls = mock.embed_calls.clone();
    let base = spawn_mock(mock).await;

    let vectors = embedder(&base, 6)
        .embed_batch(&["first".to_string(), "second".to_string()])
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(vectors, vec![vec![0.0, 1.0], vec![1.0, 1.0]]);
}

#[tokio::test]
async fn test_embeddings_auth_failure_is_not_retried() {
    let mock = Mock::failing(usize::MAX, 401, r#"{"error":{"message":"Incorrect API key provided"}}"#);
    let calls = mock.embed_calls.clone();
    let base = spawn_mock(mock).await;

    let err = embedder(&base, 6).embed("utxo").await.unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(
        err,
        RagError::Terminal {
            upstream: Upstream::Embedding,
            status: Some(401),
            ..
        }
    ));
    assert!(err.to_string().contains("Incorrect API key provided"));
}

#[tokio::test]
async fn test_embeddings_quota_exhaustion_is_not_retried() {
    let mock = Mock::failing(
        usize::MAX,
        429,
        r#"{"error":{"message":"You exceeded your current quota","code":"insufficient_quota"}}"#,
    );
    let calls = mock.embed_calls.clone();
    let base = spawn_mock(mock).await;

    let err = embedder(&base, 6).embed("utxo").await.unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_embeddings_give_up_at_attempt_cap() {
    let mock = Mock::failing(usize::MAX, 503, "upstream overloaded");
    let calls = mock.embed_calls.clone();
    let base = spawn_mock(mock).await;

    let err = embedder(&base, 4).embed("utxo").await.unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert!(err.is_transient());
    assert_eq!(err.upstream(), Some(Upstream::Embedding));
}

#[tokio::test]
async fn test_embeddings_reject_empty_input_without_calling() {
    let mock = Mock::default();
    let calls = mock.embed_calls.clone();
    let base = spawn_mock(mock).await;

    let err = embedder(&base, 6).embed("  ").await.unwrap_err();
    assert!(matches!(err, RagError::Validation(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unreachable_provider_is_transient() {
    // Bind then drop to get a port nothing listens on.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let base = format!("http://127.0.0.1:{}", port);

    let err = embedder(&base, 2).embed("utxo").await.unwrap_err();
    assert!(err.is_transient());
}

// ─── Chat ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_streamed_fragments_arrive_in_order() {
    let base = spawn_mock(Mock::default()).await;

    let stream = chat_client(&base, 6)
        .complete_streaming(&question(), &CompletionOptions::default())
        .await
        .unwrap();
    let fragments: Vec<String> = stream.map(|f| f.unwrap()).collect().await;

    assert_eq!(fragments, ANSWER);
}

#[tokio::test]
async fn test_single_shot_completion() {
    let base = spawn_mock(Mock::default()).await;

    let answer = chat_client(&base, 6)
        .complete(&question(), &CompletionOptions::default())
        .await
        .unwrap();

    assert_eq!(answer, "Transaction builders assemble UTxOs...");
}

#[tokio::test]
async fn test_stream_setup_retries_server_errors() {
    let mock = Mock::failing(1, 502, "bad gateway");
    let calls = mock.chat_calls.clone();
    let base = spawn_mock(mock).await;

    let text = chat_client(&base, 6)
        .complete_streaming(&question(), &CompletionOptions::default())
        .await
        .unwrap()
        .collect_text()
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(text, ANSWER.concat());
}

#[tokio::test]
async fn test_truncated_stream_is_mid_stream_error() {
    let mock = Mock {
        chat_mode: ChatMode::Truncated,
        ..Mock::default()
    };
    let calls = mock.chat_calls.clone();
    let base = spawn_mock(mock).await;

    let items: Vec<_> = chat_client(&base, 6)
        .complete_streaming(&question(), &CompletionOptions::default())
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap(), "Transaction");
    assert!(matches!(items[1], Err(RagError::MidStream(_))));
    // Mid-stream failures are never retried.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancelled_stream_stops_provider_reads() {
    let mock = Mock {
        chat_mode: ChatMode::Slow,
        ..Mock::default()
    };
    let produced = mock.produced.clone();
    let calls = mock.chat_calls.clone();
    let base = spawn_mock(mock).await;

    let mut stream = chat_client(&base, 6)
        .complete_streaming(&question(), &CompletionOptions::default())
        .await
        .unwrap();

    assert_eq!(stream.next().await.unwrap().unwrap(), "word0 ");
    assert_eq!(stream.next().await.unwrap().unwrap(), "word1 ");
    stream.cancel();
    assert!(stream.next().await.is_none());
    drop(stream);

    // Give the server time to notice the closed connection.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let settled = produced.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(produced.load(Ordering::SeqCst), settled);
    assert!(settled < 50);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ─── Supabase store ─────────────────────────────────────────────────

fn supabase(base: &str, key: &str, timeout: Duration) -> SupabaseStore {
    SupabaseStore::new(base, key, "match_documents", timeout, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_supabase_rpc_keeps_server_order() {
    let base = spawn_mock(Mock::default()).await;
    let store = supabase(&base, "service-key", Duration::from_secs(5));

    let matches = store.query(&[0.1, 0.2], 2).await.unwrap();

    let contents: Vec<&str> = matches.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        contents,
        vec!["Wallets sign transactions.", "MeshTxBuilder assembles transactions."]
    );
    assert!((matches[0].score - 0.41).abs() < 1e-9);

    let retriever = ContextRetriever::new(Arc::new(store), "\n\n");
    let context = retriever.retrieve_context(&[0.1, 0.2], 3).await.unwrap();
    assert_eq!(
        context.text,
        "Wallets sign transactions.\n\nMeshTxBuilder assembles transactions.\n\nMinting uses a native script."
    );
}

#[tokio::test]
async fn test_supabase_slow_rpc_times_out_as_transient() {
    let mock = Mock {
        rpc_delay: Some(Duration::from_secs(30)),
        ..Mock::default()
    };
    let calls = mock.rpc_calls.clone();
    let base = spawn_mock(mock).await;
    let store = supabase(&base, "service-key", Duration::from_millis(200));

    let started = std::time::Instant::now();
    let result = tokio::time::timeout(Duration::from_secs(10), store.query(&[0.1, 0.2], 2))
        .await
        .expect("store call must not hang past its timeout");

    let err = result.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(err.upstream(), Some(Upstream::VectorStore));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_supabase_errors_are_classified() {
    let base = spawn_mock(Mock::failing(usize::MAX, 503, "pool exhausted")).await;
    let store = supabase(&base, "service-key", Duration::from_secs(5));
    let err = store.query(&[0.1, 0.2], 2).await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(err.upstream(), Some(Upstream::VectorStore));

    let base = spawn_mock(Mock::default()).await;
    let store = supabase(&base, "wrong-key", Duration::from_secs(5));
    let err = store.query(&[0.1, 0.2], 2).await.unwrap_err();
    assert!(matches!(err, RagError::Terminal { status: Some(401), .. }));
}

// ─── Full pipeline ──────────────────────────────────────────────────

#[tokio::test]
async fn test_configured_pipeline_end_to_end() {
    let mock = Mock::default();
    let embed_calls = mock.embed_calls.clone();
    let chat_calls = mock.chat_calls.clone();
    let base = spawn_mock(mock).await;

    // Default store backend is an empty in-memory store: zero matches.
    let orchestrator = AnswerOrchestrator::from_config(&test_config(&base))
        .await
        .unwrap();

    let fragments: Vec<String> = orchestrator
        .answer_query("What is a transaction builder?")
        .await
        .unwrap()
        .map(|f| f.unwrap())
        .collect()
        .await;

    assert_eq!(fragments, ANSWER);
    assert_eq!(embed_calls.load(Ordering::SeqCst), 1);
    assert_eq!(chat_calls.load(Ordering::SeqCst), 1);
}
