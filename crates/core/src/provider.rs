//! Provider traits — the abstractions over LLM and embedding backends.
//!
//! A [`CompletionProvider`] sends an ordered prompt to a language model and
//! returns the response, complete or as a stream of chunks. An
//! [`EmbeddingProvider`] turns text into fixed-length vectors and is billed
//! per call. The executors call these traits without knowing which backend
//! is behind them.

use crate::error::ProviderError;
use crate::message::PromptMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The model to use (e.g., "gpt-4o-mini").
    pub model: String,

    /// Ordered prompt messages. Ordering is the caller's invariant.
    pub messages: Vec<PromptMessage>,

    /// Temperature (0.0 = deterministic).
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Whether to stream the response.
    #[serde(default)]
    pub stream: bool,
}

fn default_temperature() -> f32 {
    0.0
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A complete (non-streaming) completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// The generated text.
    pub content: String,

    /// Why generation stopped ("stop", "length", ...).
    pub finish_reason: String,

    /// Which model actually responded.
    pub model: String,

    pub usage: Option<Usage>,
}

/// A single chunk in a streaming completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionChunk {
    /// Partial content delta.
    #[serde(default)]
    pub content: Option<String>,

    /// Present on the final chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,

    /// Whether this is the final chunk.
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only on the final chunk).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// The language-model backend trait.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// A human-readable name for this provider.
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<CompletionResponse, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and wraps the result as a
    /// single final chunk.
    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<CompletionChunk, ProviderError>>,
        ProviderError,
    > {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx
            .send(Ok(CompletionChunk {
                content: Some(response.content),
                finish_reason: Some(response.finish_reason),
                done: true,
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }
}

/// An embedding response: one vector per input text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub vectors: Vec<Vec<f32>>,

    /// Billed token count reported by the provider.
    pub tokens: u32,
}

/// The embedding backend trait.
///
/// Implementations must fail with [`ProviderError::EmptyEmbedding`] when the
/// backend reports zero usable tokens or returns no vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Embed a batch of texts. One call per batch — never one per text.
    async fn embed(
        &self,
        texts: &[String],
    ) -> std::result::Result<EmbeddingResponse, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider;

    #[async_trait]
    impl CompletionProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> std::result::Result<CompletionResponse, ProviderError> {
            Ok(CompletionResponse {
                content: "ok".into(),
                finish_reason: "stop".into(),
                model: "fixed-1".into(),
                usage: Some(Usage {
                    prompt_tokens: 2,
                    completion_tokens: 1,
                    total_tokens: 3,
                }),
            })
        }
    }

    #[tokio::test]
    async fn default_stream_wraps_complete() {
        let provider = FixedProvider;
        let mut rx = provider
            .stream(CompletionRequest {
                model: "fixed-1".into(),
                messages: vec![PromptMessage::human("hi")],
                temperature: 0.0,
                max_tokens: None,
                stream: true,
            })
            .await
            .unwrap();

        let chunk = rx.recv().await.unwrap().unwrap();
        assert!(chunk.done);
        assert_eq!(chunk.content.as_deref(), Some("ok"));
        assert_eq!(chunk.finish_reason.as_deref(), Some("stop"));
        assert!(rx.recv().await.is_none());
    }
}
