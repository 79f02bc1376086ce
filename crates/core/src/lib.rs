//! # Promptweave Core
//!
//! Domain types, traits, and error definitions for the Promptweave workflow
//! dispatch engine. This crate has **zero framework dependencies** — it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is defined as a trait here: language-model
//! and embedding backends ([`provider`]), ANN backends ([`index`]), and the
//! persistence/billing seam ([`record`]). Implementations live in their
//! respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod event;
pub mod index;
pub mod message;
pub mod node;
pub mod provider;
pub mod quote;
pub mod record;

// Re-export key types at crate root for ergonomics
pub use error::{DispatchError, Error, IndexError, NodeError, ProviderError, Result};
pub use event::FlowStreamEvent;
pub use index::VectorIndex;
pub use message::{ChatTurn, ConversationId, PromptMessage, PromptRole};
pub use node::{FlowGraph, InputPort, NodeKind, NodeTemplate, OutputPort, Target};
pub use provider::{
    CompletionChunk, CompletionProvider, CompletionRequest, CompletionResponse,
    EmbeddingProvider, EmbeddingResponse, Usage,
};
pub use quote::{QuoteHit, QuoteItem};
pub use record::{FlowRunRecord, LogSink, NodeResponse, NodeUsage, RunSink};
