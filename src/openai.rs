//! HTTP transport for OpenAI-compatible provider APIs.
//!
//! [`OpenAITransport`] owns the shared `reqwest::Client` (connection pool),
//! the bearer credential and the [`RetryPolicy`]. Both the embedding client
//! and the chat client go through it so that failure classification is
//! identical for every provider call.
//!
//! # Classification
//!
//! | Condition | Error |
//! |-----------|-------|
//! | HTTP 429 with `insufficient_quota` | terminal |
//! | HTTP 408, 409, 429, 5xx | transient |
//! | HTTP 401, 403, other 4xx | terminal |
//! | timeout, connect or send failure | transient |
//! | undecodable response body | terminal |

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;

use crate::config::ProviderConfig;
use crate::error::{RagError, Result, Upstream};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct OpenAITransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    policy: RetryPolicy,
    request_timeout: Duration,
}

impl OpenAITransport {
    /// Build a transport from provider settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential was never resolved or the HTTP
    /// client cannot be constructed.
    pub fn new(config: &ProviderConfig, policy: RetryPolicy) -> anyhow::Result<Self> {
        let api_key = config
            .api_key()
            .ok_or_else(|| anyhow::anyhow!("provider API key not resolved"))?
            .to_string();

        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            policy,
            request_timeout: config.request_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// POST a JSON body and decode a JSON response, retrying transient
    /// failures. Each attempt is bounded by the request timeout.
    pub async fn post_json(&self, path: &str, body: &Value, upstream: Upstream) -> Result<Value> {
        let url = self.url(path);
        let url = url.as_str();

        self.policy
            .run(path, |_| async move {
                let response = self
                    .client
                    .post(url)
                    .bearer_auth(&self.api_key)
                    .timeout(self.request_timeout)
                    .json(body)
                    .send()
                    .await
                    .map_err(|e| classify_transport(upstream, &e))?;

                let status = response.status();
                if !status.is_success() {
                    let text = response.text().await.unwrap_or_default();
                    return Err(classify_status(upstream, status, &text));
                }

                response
                    .json::<Value>()
                    .await
                    .map_err(|e| classify_transport(upstream, &e))
            })
            .await
    }

    /// POST a JSON body and return the response once a 2xx status line has
    /// arrived. Only connection setup is retried; the body is left for the
    /// caller to stream.
    pub async fn open_stream(
        &self,
        path: &str,
        body: &Value,
        upstream: Upstream,
    ) -> Result<reqwest::Response> {
        let url = self.url(path);
        let url = url.as_str();

        self.policy
            .run(path, |_| async move {
                let send = self
                    .client
                    .post(url)
                    .bearer_auth(&self.api_key)
                    .header("Accept", "text/event-stream")
                    .json(body)
                    .send();

                let response = tokio::time::timeout(self.request_timeout, send)
                    .await
                    .map_err(|_| {
                        RagError::transient(
                            upstream,
                            format!(
                                "no response within {}s",
                                self.request_timeout.as_secs_f32()
                            ),
                        )
                    })?
                    .map_err(|e| classify_transport(upstream, &e))?;

                let status = response.status();
                if !status.is_success() {
                    let text = response.text().await.unwrap_or_default();
                    return Err(classify_status(upstream, status, &text));
                }

                Ok(response)
            })
            .await
    }
}

/// Map a non-success HTTP status to a transient or terminal error.
pub fn classify_status(upstream: Upstream, status: StatusCode, body: &str) -> RagError {
    let message = format!("{}: {}", status, extract_error_message(body));

    if status == StatusCode::TOO_MANY_REQUESTS && body.contains("insufficient_quota") {
        return RagError::terminal(upstream, Some(status.as_u16()), message);
    }

    let code = status.as_u16();
    if matches!(code, 408 | 409 | 429) || status.is_server_error() {
        RagError::transient(upstream, message)
    } else {
        RagError::terminal(upstream, Some(code), message)
    }
}

/// Map a `reqwest` failure (no usable HTTP status) to an error kind.
pub fn classify_transport(upstream: Upstream, err: &reqwest::Error) -> RagError {
    if err.is_decode() || err.is_builder() {
        RagError::terminal(upstream, None, format!("malformed exchange: {}", err))
    } else {
        RagError::transient(upstream, format!("transport failure: {}", err))
    }
}

/// Pull `error.message` out of an OpenAI-style error body, falling back to
/// the raw text.
pub fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(|m| m.as_str().map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string())
}
