//! Model-completion executor — sends the assembled prompt to the language
//! model and streams tokens back as answer fragments.

use super::{ExecutorContext, ExecutorOutput, NodeExecutor, UsageReport};
use async_trait::async_trait;
use promptweave_core::error::NodeError;
use promptweave_core::event::FlowStreamEvent;
use promptweave_core::message::{ChatTurn, PromptMessage};
use promptweave_core::provider::{CompletionRequest, Usage};
use promptweave_retrieval::{estimate_messages_tokens, estimate_tokens};
use serde_json::{Value, json};
use tracing::debug;

const DEFAULT_TEMPERATURE: f32 = 0.0;
const DEFAULT_MAX_HISTORY: usize = 6;

/// Builds the five-part prompt — quote block, system prompt, prior turns,
/// limit prompt, current question — and runs the completion. In streaming
/// mode every token delta goes straight to the emitter; the full text,
/// finish reason, and token count fan out on completion.
pub struct ModelCompletionExecutor;

#[async_trait]
impl NodeExecutor for ModelCompletionExecutor {
    fn kind(&self) -> &str {
        "modelCompletion"
    }

    async fn run(&self, ctx: ExecutorContext) -> Result<ExecutorOutput, NodeError> {
        let question = ctx.string("userChatInput")?;

        let provider = ctx
            .deps
            .completion
            .clone()
            .ok_or_else(|| NodeError::ExecutionFailed {
                node_id: ctx.node_id.clone(),
                reason: "no completion provider configured".into(),
            })?;

        let model = ctx
            .string_opt("model")
            .unwrap_or_else(|| ctx.deps.default_model.clone());
        let temperature = ctx
            .config
            .get("temperature")
            .and_then(|v| v.as_f64())
            .map(|v| v as f32)
            .unwrap_or(DEFAULT_TEMPERATURE);
        let max_tokens = ctx
            .config
            .get("maxTokens")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32);
        let max_history = ctx
            .config
            .get("maxHistory")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_MAX_HISTORY);

        let messages = build_prompt(&ctx, &question, max_history);
        let prompt_tokens_estimate = estimate_messages_tokens(&messages) as u32;

        debug!(
            node_id = %ctx.node_id,
            model = %model,
            messages = messages.len(),
            streaming = ctx.streaming,
            "Dispatching model completion"
        );

        let request = CompletionRequest {
            model: model.clone(),
            messages,
            temperature,
            max_tokens,
            stream: ctx.streaming,
        };

        let node_err = |reason: String| NodeError::ExecutionFailed {
            node_id: ctx.node_id.clone(),
            reason,
        };

        let (text, finish_reason, usage, streamed) = if ctx.streaming {
            let mut rx = provider
                .stream(request)
                .await
                .map_err(|e| node_err(e.to_string()))?;

            let mut text = String::new();
            let mut finish_reason = String::from("stop");
            let mut usage: Option<Usage> = None;

            while let Some(chunk) = rx.recv().await {
                let chunk = chunk.map_err(|e| node_err(e.to_string()))?;
                if let Some(delta) = chunk.content {
                    if !delta.is_empty() {
                        text.push_str(&delta);
                        ctx.emitter
                            .send(FlowStreamEvent::Answer { content: delta })
                            .await;
                    }
                }
                if let Some(reason) = chunk.finish_reason {
                    finish_reason = reason;
                }
                if chunk.usage.is_some() {
                    usage = chunk.usage;
                }
            }

            (text, finish_reason, usage, true)
        } else {
            let response = provider
                .complete(request)
                .await
                .map_err(|e| node_err(e.to_string()))?;
            (
                response.content,
                response.finish_reason,
                response.usage,
                false,
            )
        };

        // Providers that omit usage still get billed on the estimate.
        let total_tokens = usage
            .map(|u| u.total_tokens)
            .unwrap_or_else(|| prompt_tokens_estimate + estimate_tokens(&text) as u32);

        let mut result = serde_json::Map::new();
        result.insert("answerText".into(), Value::String(text));
        result.insert("finishReason".into(), Value::String(finish_reason));
        result.insert("totalTokens".into(), json!(total_tokens));

        Ok(ExecutorOutput {
            result,
            usage: Some(UsageReport {
                model: Some(model),
                total_tokens,
            }),
            streamed,
            ..Default::default()
        })
    }
}

/// Assemble the prompt in the fixed five-part order.
fn build_prompt(ctx: &ExecutorContext, question: &str, max_history: usize) -> Vec<PromptMessage> {
    let mut messages = Vec::new();

    // 1. Quote block
    if let Some(quote_prompt) = ctx
        .params
        .get("quotePrompt")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
    {
        messages.push(PromptMessage::system(quote_prompt));
    }

    // 2. System prompt
    if let Some(system_prompt) = ctx.string_opt("systemPrompt").filter(|s| !s.is_empty()) {
        messages.push(PromptMessage::system(system_prompt));
    }

    // 3. Prior turns, most recent `max_history`, oldest first. Turns fed
    // through the `history` port take precedence over the request seed.
    let port_history: Option<Vec<ChatTurn>> = ctx
        .params
        .get("history")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok());
    let history = port_history.as_deref().unwrap_or(&ctx.history);
    let skip = history.len().saturating_sub(max_history);
    for turn in &history[skip..] {
        messages.extend(turn.to_messages());
    }

    // 4. Limit prompt
    if let Some(limit_prompt) = ctx.string_opt("limitPrompt").filter(|s| !s.is_empty()) {
        messages.push(PromptMessage::system(limit_prompt));
    }

    // 5. Current question
    messages.push(PromptMessage::human(question));

    messages
}
