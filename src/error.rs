//! Error taxonomy for the answer pipeline.
//!
//! Every failure that crosses a component boundary is a [`RagError`]. The
//! variant alone decides whether a call may be retried
//! ([`RagError::is_transient`]) and how the HTTP boundary reports it
//! ([`RagError::class`]).
//!
//! | Variant | Retried | Class |
//! |---------|---------|-------|
//! | [`Validation`](RagError::Validation) | never | [`ErrorClass::Validation`] |
//! | [`Transient`](RagError::Transient) | up to the attempt cap | [`ErrorClass::UpstreamUnavailable`] |
//! | [`Terminal`](RagError::Terminal) | never | [`ErrorClass::UpstreamUnavailable`] |
//! | [`MidStream`](RagError::MidStream) | never | [`ErrorClass::UpstreamUnavailable`] |
//! | [`Internal`](RagError::Internal) | never | [`ErrorClass::Internal`] |

use std::fmt;

use thiserror::Error;

/// The outbound dependency a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    Embedding,
    Completion,
    VectorStore,
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Upstream::Embedding => "embedding provider",
            Upstream::Completion => "completion provider",
            Upstream::VectorStore => "vector store",
        };
        f.write_str(name)
    }
}

/// Main error type for the retrieval and generation pipeline.
#[derive(Error, Debug)]
pub enum RagError {
    /// Caller input was empty or malformed. Reported before any outbound call.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Rate limiting, network failure or 5xx from an upstream.
    #[error("{upstream} temporarily unavailable: {message}")]
    Transient { upstream: Upstream, message: String },

    /// Authentication failure, quota exhaustion or a rejected request.
    #[error("{upstream} rejected the request{}: {message}", status_suffix(.status))]
    Terminal {
        upstream: Upstream,
        status: Option<u16>,
        message: String,
    },

    /// Failure after answer fragments were already delivered.
    #[error("answer stream interrupted: {0}")]
    MidStream(String),

    /// Anything unclassified.
    #[error("internal error: {0}")]
    Internal(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, RagError>;

/// How a failure is surfaced to the caller of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    UpstreamUnavailable,
    Internal,
}

impl RagError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transient(upstream: Upstream, msg: impl Into<String>) -> Self {
        Self::Transient {
            upstream,
            message: msg.into(),
        }
    }

    pub fn terminal(upstream: Upstream, status: Option<u16>, msg: impl Into<String>) -> Self {
        Self::Terminal {
            upstream,
            status,
            message: msg.into(),
        }
    }

    pub fn mid_stream(msg: impl Into<String>) -> Self {
        Self::MidStream(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether a retry could plausibly succeed. The retry loop consults
    /// nothing else.
    pub fn is_transient(&self) -> bool {
        matches!(self, RagError::Transient { .. })
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            RagError::Validation(_) => ErrorClass::Validation,
            RagError::Transient { .. } | RagError::Terminal { .. } | RagError::MidStream(_) => {
                ErrorClass::UpstreamUnavailable
            }
            RagError::Internal(_) => ErrorClass::Internal,
        }
    }

    pub fn upstream(&self) -> Option<Upstream> {
        match self {
            RagError::Transient { upstream, .. } | RagError::Terminal { upstream, .. } => {
                Some(*upstream)
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for RagError {
    fn from(err: serde_json::Error) -> Self {
        RagError::Internal(format!("serialization failed: {}", err))
    }
}
