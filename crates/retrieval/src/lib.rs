//! # Promptweave Retrieval
//!
//! The retrieval context-assembly pipeline: token estimation, the in-memory
//! vector index backend, and the [`ContextAssembler`] that turns a user
//! question into a prompt-ready, deduplicated, token-budget-constrained
//! quote block.

pub mod assembler;
pub mod index;
pub mod token;

pub use assembler::{
    AssembledQuotes, AssemblyRequest, ContextAssembler, DEFAULT_QUOTE_LABEL,
};
pub use index::{cosine_similarity, InMemoryIndex, IndexEntry};
pub use token::{estimate_message_tokens, estimate_messages_tokens, estimate_tokens};
