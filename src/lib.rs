//! # Mimir
//!
//! A retrieval-augmented answer service for technical documentation.
//!
//! A question is embedded, the nearest documentation chunks are fetched from
//! a vector store, and a chat model streams an answer grounded in those
//! chunks back to the caller fragment by fragment.
//!
//! ## Architecture
//!
//! ```text
//!            ┌────────────┐   ┌────────────┐   ┌────────────┐
//! query ───▶ │  Embedder  │──▶│ Retriever  │──▶│ Chat model │──▶ fragments
//!            │  (OpenAI)  │   │  (store)   │   │  (OpenAI)  │
//!            └────────────┘   └────────────┘   └────────────┘
//!                  ▲                                 ▲
//!                  └──── OpenAITransport + retry ────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export OPENAI_KEY=sk-...
//! mimir --config ./config/mimir.toml ask "What is a transaction builder?"
//! mimir --config ./config/mimir.toml serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy and classification |
//! | [`retry`] | Randomized exponential backoff |
//! | [`openai`] | Shared provider HTTP transport |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`chat`] | Chat completion client and SSE decoding |
//! | [`stream`] | Cancellable answer fragment stream |
//! | [`store`] | Vector store backends |
//! | [`retriever`] | Context retrieval |
//! | [`prompt`] | Prompt assembly |
//! | [`orchestrator`] | Query pipeline |
//! | [`server`] | HTTP server |

pub mod chat;
pub mod config;
pub mod embedding;
pub mod error;
pub mod openai;
pub mod orchestrator;
pub mod prompt;
pub mod retriever;
pub mod retry;
pub mod server;
pub mod store;
pub mod stream;
