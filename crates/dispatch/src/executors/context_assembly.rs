//! Context-assembly executor — wraps the retrieval pipeline as a node.

use super::{ExecutorContext, ExecutorOutput, NodeExecutor, UsageReport};
use async_trait::async_trait;
use promptweave_core::error::NodeError;
use promptweave_core::quote::QuoteItem;
use promptweave_retrieval::{AssemblyRequest, ContextAssembler};
use serde_json::{Value, json};
use tracing::info;

const DEFAULT_SIMILARITY: f32 = 0.5;
const DEFAULT_LIMIT: usize = 5;
const DEFAULT_MAX_CONTEXT_TOKENS: usize = 3000;

/// Runs the retrieval pipeline for the incoming question and fans out the
/// quote prompt, the surrounding system/limit prompts, and the cited quote
/// list. When the search comes up empty and the node declares an
/// `emptyText` fallback, the whole run short-circuits with that text.
pub struct ContextAssemblyExecutor;

#[async_trait]
impl NodeExecutor for ContextAssemblyExecutor {
    fn kind(&self) -> &str {
        "contextAssembly"
    }

    async fn run(&self, ctx: ExecutorContext) -> Result<ExecutorOutput, NodeError> {
        let question = ctx.string("userChatInput")?;

        let embedder = ctx
            .deps
            .embedder
            .clone()
            .ok_or_else(|| NodeError::ExecutionFailed {
                node_id: ctx.node_id.clone(),
                reason: "no embedding provider configured".into(),
            })?;
        let index = ctx
            .deps
            .index
            .clone()
            .ok_or_else(|| NodeError::ExecutionFailed {
                node_id: ctx.node_id.clone(),
                reason: "no vector index configured".into(),
            })?;

        let partitions: Vec<String> =
            ctx.config_as("partitions")
                .ok_or_else(|| NodeError::InvalidInput {
                    node_id: ctx.node_id.clone(),
                    reason: "contextAssembly node has no 'partitions' config".into(),
                })?;

        let similarity = ctx
            .config
            .get("similarity")
            .and_then(|v| v.as_f64())
            .map(|v| v as f32)
            .unwrap_or(DEFAULT_SIMILARITY);
        let limit = ctx
            .config
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_LIMIT);
        let max_context_tokens = ctx
            .config
            .get("maxContextTokens")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_MAX_CONTEXT_TOKENS);

        let fixed_quotes: Vec<QuoteItem> = ctx
            .params
            .get("fixedQuotes")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| NodeError::InvalidInput {
                node_id: ctx.node_id.clone(),
                reason: format!("fixedQuotes is not a quote list: {e}"),
            })?
            .unwrap_or_default();

        let system_prompt = ctx.string_opt("systemPrompt").unwrap_or_default();
        let limit_prompt = ctx.string_opt("limitPrompt").unwrap_or_default();
        let quote_label = ctx
            .string_opt("quoteLabel")
            .unwrap_or_else(|| ctx.deps.quote_label.clone());

        let assembler = ContextAssembler::new(embedder.clone(), index);
        let assembled = assembler
            .assemble(AssemblyRequest {
                question: &question,
                partitions: &partitions,
                similarity,
                limit,
                fixed_quotes: &fixed_quotes,
                max_context_tokens,
                system_prompt: &system_prompt,
                limit_prompt: &limit_prompt,
                quote_label: &quote_label,
            })
            .await
            .map_err(|e| NodeError::ExecutionFailed {
                node_id: ctx.node_id.clone(),
                reason: e.to_string(),
            })?;

        info!(
            node_id = %ctx.node_id,
            fresh_hits = assembled.fresh_hits,
            cited = assembled.cited.len(),
            "Context assembly finished"
        );

        let usage = Some(UsageReport {
            model: Some(embedder.name().to_string()),
            total_tokens: assembled.embedding_tokens,
        });

        // Empty search + declared fallback: stop the run, answer verbatim.
        if assembled.cited.is_empty() {
            if let Some(empty_text) = ctx
                .config
                .get("emptyText")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
            {
                return Ok(ExecutorOutput {
                    usage,
                    short_circuit: Some(empty_text.to_string()),
                    ..Default::default()
                });
            }
        }

        let quote_prompt = assembled
            .quote_message
            .as_ref()
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let mut result = serde_json::Map::new();
        result.insert("quotePrompt".into(), Value::String(quote_prompt));
        result.insert("systemPrompt".into(), Value::String(system_prompt));
        result.insert("limitPrompt".into(), Value::String(limit_prompt));
        result.insert("quoteList".into(), json!(assembled.cited));
        result.insert("quoteCount".into(), json!(assembled.cited.len()));
        // Question pass-through for downstream nodes wired to it.
        result.insert("userChatInput".into(), Value::String(question));

        Ok(ExecutorOutput {
            result,
            usage,
            cited_quotes: assembled.cited,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::StreamEmitter;
    use crate::executors::RunDeps;
    use promptweave_core::error::{IndexError, ProviderError};
    use promptweave_core::index::VectorIndex;
    use promptweave_core::provider::{EmbeddingProvider, EmbeddingResponse};
    use promptweave_core::quote::QuoteHit;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    struct UnitEmbedder;

    #[async_trait]
    impl EmbeddingProvider for UnitEmbedder {
        fn name(&self) -> &str {
            "unit-embed"
        }

        async fn embed(
            &self,
            texts: &[String],
        ) -> std::result::Result<EmbeddingResponse, ProviderError> {
            Ok(EmbeddingResponse {
                vectors: texts.iter().map(|_| vec![1.0, 0.0]).collect(),
                tokens: 3,
            })
        }
    }

    struct FixedHits(Vec<QuoteHit>);

    #[async_trait]
    impl VectorIndex for FixedHits {
        async fn search(
            &self,
            _vector: &[f32],
            _partitions: &[String],
            _limit: usize,
            _threshold: f32,
        ) -> std::result::Result<Vec<QuoteHit>, IndexError> {
            Ok(self.0.clone())
        }
    }

    fn deps(hits: Vec<QuoteHit>) -> Arc<RunDeps> {
        Arc::new(RunDeps {
            completion: None,
            embedder: Some(Arc::new(UnitEmbedder)),
            index: Some(Arc::new(FixedHits(hits))),
            http: reqwest::Client::new(),
            default_model: "gpt-4o-mini".into(),
            quote_label: "knowledge base:".into(),
        })
    }

    fn ctx(deps: Arc<RunDeps>, config: serde_json::Map<String, Value>) -> ExecutorContext {
        let mut params = serde_json::Map::new();
        params.insert("userChatInput".into(), json!("what is promptweave?"));
        ExecutorContext {
            node_id: "kb".into(),
            node_name: "KB search".into(),
            config,
            params,
            history: Arc::new(Vec::new()),
            streaming: false,
            emitter: StreamEmitter::disabled(),
            cancel: CancellationToken::new(),
            deps,
        }
    }

    fn hit(id: &str) -> QuoteHit {
        QuoteHit {
            quote: QuoteItem::new(id, format!("Q {id}"), format!("A {id}"), "kb"),
            score: 0.9,
        }
    }

    fn base_config() -> serde_json::Map<String, Value> {
        let mut config = serde_json::Map::new();
        config.insert("partitions".into(), json!(["kb1"]));
        config
    }

    #[tokio::test]
    async fn fans_out_quote_prompt_and_list() {
        let out = ContextAssemblyExecutor
            .run(ctx(deps(vec![hit("a"), hit("b")]), base_config()))
            .await
            .unwrap();

        let prompt = out.result.get("quotePrompt").unwrap().as_str().unwrap();
        assert!(prompt.starts_with("knowledge base:"));
        assert_eq!(out.result.get("quoteCount"), Some(&json!(2)));
        assert_eq!(out.cited_quotes.len(), 2);
        assert!(out.short_circuit.is_none());
        assert_eq!(out.usage.as_ref().unwrap().total_tokens, 3);
    }

    #[tokio::test]
    async fn empty_search_with_fallback_short_circuits() {
        let mut config = base_config();
        config.insert("emptyText".into(), json!("I don't know that yet."));

        let out = ContextAssemblyExecutor
            .run(ctx(deps(vec![]), config))
            .await
            .unwrap();

        assert_eq!(out.short_circuit.as_deref(), Some("I don't know that yet."));
        assert!(out.result.is_empty());
    }

    #[tokio::test]
    async fn empty_search_without_fallback_fans_out_empty_prompt() {
        let out = ContextAssemblyExecutor
            .run(ctx(deps(vec![]), base_config()))
            .await
            .unwrap();

        assert!(out.short_circuit.is_none());
        assert_eq!(out.result.get("quotePrompt"), Some(&json!("")));
        assert_eq!(out.result.get("quoteCount"), Some(&json!(0)));
    }

    #[tokio::test]
    async fn missing_partitions_config_is_invalid() {
        let err = ContextAssemblyExecutor
            .run(ctx(deps(vec![]), serde_json::Map::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::InvalidInput { .. }));
    }
}
