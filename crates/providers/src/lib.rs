//! # Promptweave Providers
//!
//! Backend implementations of the core provider traits. The
//! OpenAI-compatible client covers the vast majority of hosted and local
//! LLM endpoints for both completions and embeddings.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;
