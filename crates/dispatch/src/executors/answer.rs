//! Answer executor — emits a literal text fragment.

use super::{ExecutorContext, ExecutorOutput, NodeExecutor};
use async_trait::async_trait;
use promptweave_core::error::NodeError;
use serde_json::Value;

/// Emits its `text` input as the node's `answerText` output. The template
/// marks that output as an answer fragment, so fan-out appends it to the
/// run's answer text and streams it.
pub struct AnswerExecutor;

#[async_trait]
impl NodeExecutor for AnswerExecutor {
    fn kind(&self) -> &str {
        "answer"
    }

    async fn run(&self, ctx: ExecutorContext) -> Result<ExecutorOutput, NodeError> {
        let text = match ctx.params.get("text").or_else(|| ctx.config.get("text")) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => {
                return Err(NodeError::MissingInput {
                    node_id: ctx.node_id.clone(),
                    key: "text".into(),
                });
            }
        };

        let mut result = serde_json::Map::new();
        result.insert("answerText".into(), Value::String(text));
        Ok(ExecutorOutput::with_result(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::StreamEmitter;
    use crate::executors::RunDeps;
    use serde_json::json;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn ctx(params: serde_json::Map<String, Value>) -> ExecutorContext {
        ExecutorContext {
            node_id: "a1".into(),
            node_name: "Answer".into(),
            config: serde_json::Map::new(),
            params,
            history: Arc::new(Vec::new()),
            streaming: false,
            emitter: StreamEmitter::disabled(),
            cancel: CancellationToken::new(),
            deps: Arc::new(RunDeps::minimal()),
        }
    }

    #[tokio::test]
    async fn returns_text_as_answer_output() {
        let mut params = serde_json::Map::new();
        params.insert("text".into(), json!("Hello there"));

        let out = AnswerExecutor.run(ctx(params)).await.unwrap();
        assert_eq!(out.result.get("answerText"), Some(&json!("Hello there")));
    }

    #[tokio::test]
    async fn non_string_input_is_stringified() {
        let mut params = serde_json::Map::new();
        params.insert("text".into(), json!(42));

        let out = AnswerExecutor.run(ctx(params)).await.unwrap();
        assert_eq!(out.result.get("answerText"), Some(&json!("42")));
    }

    #[tokio::test]
    async fn missing_text_is_an_error() {
        let err = AnswerExecutor
            .run(ctx(serde_json::Map::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::MissingInput { .. }));
    }
}
