//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, and any
//! endpoint exposing the `/v1/chat/completions` and `/v1/embeddings`
//! wire format.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Embeddings (batched, one request per batch)

use async_trait::async_trait;
use futures::StreamExt;
use promptweave_core::error::ProviderError;
use promptweave_core::message::{PromptMessage, PromptRole};
use promptweave_core::provider::{
    CompletionChunk, CompletionProvider, CompletionRequest, CompletionResponse,
    EmbeddingProvider, EmbeddingResponse, Usage,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// An OpenAI-compatible backend for both completions and embeddings.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    embedding_model: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        embedding_model: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            embedding_model: embedding_model.into(),
            client,
        }
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new(
            "openai",
            "https://api.openai.com/v1",
            api_key,
            "text-embedding-3-small",
        )
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
            "nomic-embed-text",
        )
    }

    /// Convert prompt messages to the OpenAI API format.
    fn to_api_messages(messages: &[PromptMessage]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    PromptRole::System => "system".into(),
                    PromptRole::Human => "user".into(),
                    PromptRole::Assistant => "assistant".into(),
                },
                content: m.content.clone(),
            })
            .collect()
    }

    /// Map a non-200 status to the provider error taxonomy.
    fn error_for_status(status: u16, body: String) -> ProviderError {
        match status {
            429 => ProviderError::RateLimited {
                retry_after_secs: 5,
            },
            401 | 403 => ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ),
            _ => {
                warn!(status, body = %body, "Provider returned error");
                ProviderError::ApiError {
                    status_code: status,
                    message: body,
                }
            }
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<CompletionResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": false,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            return Err(Self::error_for_status(status, error_body));
        }

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let choice =
            api_response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::ApiError {
                    status_code: 200,
                    message: "No choices in response".into(),
                })?;

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".into()),
            model: api_response.model,
            usage,
        })
    }

    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<CompletionChunk, ProviderError>>,
        ProviderError,
    > {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            return Err(Self::error_for_status(status, error_body));
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Read the SSE byte stream and parse chunks line by line.
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut finish_reason: Option<String> = None;

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end_matches('\r').to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    // Skip empty lines and SSE comments
                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let data = data.trim();

                    // "[DONE]" signals end of stream
                    if data == "[DONE]" {
                        let _ = tx
                            .send(Ok(CompletionChunk {
                                content: None,
                                finish_reason: finish_reason.take(),
                                done: true,
                                usage: None,
                            }))
                            .await;
                        return;
                    }

                    match serde_json::from_str::<StreamResponse>(data) {
                        Ok(stream_resp) => {
                            if let Some(choice) = stream_resp.choices.first() {
                                if let Some(reason) = &choice.finish_reason {
                                    finish_reason = Some(reason.clone());
                                }
                                let has_content =
                                    choice.delta.content.as_ref().is_some_and(|c| !c.is_empty());
                                if has_content {
                                    let chunk = CompletionChunk {
                                        content: choice.delta.content.clone(),
                                        finish_reason: None,
                                        done: false,
                                        usage: None,
                                    };
                                    if tx.send(Ok(chunk)).await.is_err() {
                                        return; // receiver dropped
                                    }
                                }
                            }

                            // Usage arrives in the final chunk (stream_options)
                            if let Some(usage) = stream_resp.usage {
                                let _ = tx
                                    .send(Ok(CompletionChunk {
                                        content: None,
                                        finish_reason: finish_reason.take(),
                                        done: true,
                                        usage: Some(Usage {
                                            prompt_tokens: usage.prompt_tokens,
                                            completion_tokens: usage.completion_tokens,
                                            total_tokens: usage.total_tokens,
                                        }),
                                    }))
                                    .await;
                                return;
                            }
                        }
                        Err(e) => {
                            trace!(
                                provider = %provider_name,
                                data = %data,
                                error = %e,
                                "Ignoring unparseable SSE chunk"
                            );
                        }
                    }
                }
            }

            // Stream ended without [DONE]
            let _ = tx
                .send(Ok(CompletionChunk {
                    content: None,
                    finish_reason,
                    done: true,
                    usage: None,
                }))
                .await;
        });

        Ok(rx)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn embed(
        &self,
        texts: &[String],
    ) -> std::result::Result<EmbeddingResponse, ProviderError> {
        let url = format!("{}/embeddings", self.base_url);

        let body = serde_json::json!({
            "model": self.embedding_model,
            "input": texts,
            "encoding_format": "float",
        });

        debug!(
            provider = %self.name,
            model = %self.embedding_model,
            count = texts.len(),
            "Sending embedding request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            return Err(Self::error_for_status(status, error_body));
        }

        let api_resp: EmbeddingApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse embedding response: {e}"),
            })?;

        let tokens = api_resp.usage.map(|u| u.total_tokens).unwrap_or_default();
        if api_resp.data.is_empty() || tokens == 0 {
            return Err(ProviderError::EmptyEmbedding(format!(
                "provider reported {} vectors and {} tokens",
                api_resp.data.len(),
                tokens
            )));
        }

        let vectors = api_resp.data.into_iter().map(|d| d.embedding).collect();
        Ok(EmbeddingResponse { vectors, tokens })
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingDatum>,
    usage: Option<EmbeddingUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingUsage {
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let provider = OpenAiCompatProvider::new(
            "test",
            "https://api.example.com/v1/",
            "key",
            "embed-model",
        );
        assert_eq!(provider.base_url, "https://api.example.com/v1");
    }

    #[test]
    fn roles_map_to_api_names() {
        let messages = vec![
            PromptMessage::system("s"),
            PromptMessage::human("h"),
            PromptMessage::assistant("a"),
        ];
        let api = OpenAiCompatProvider::to_api_messages(&messages);
        let roles: Vec<&str> = api.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["system", "user", "assistant"]);
    }

    #[test]
    fn stream_chunk_parses_delta() {
        let data = r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}],"usage":null}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.choices[0].delta.content.as_deref(), Some("Hel"));
    }

    #[test]
    fn stream_chunk_parses_usage_frame() {
        let data = r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            OpenAiCompatProvider::error_for_status(429, String::new()),
            ProviderError::RateLimited { .. }
        ));
        assert!(matches!(
            OpenAiCompatProvider::error_for_status(401, String::new()),
            ProviderError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            OpenAiCompatProvider::error_for_status(500, "boom".into()),
            ProviderError::ApiError {
                status_code: 500,
                ..
            }
        ));
    }
}
