//! HTTP tool executor — calls a caller-declared external endpoint.

use super::{ExecutorContext, ExecutorOutput, NodeExecutor};
use async_trait::async_trait;
use promptweave_core::error::NodeError;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Posts a JSON body merging the streaming flag, the node's static body
/// config, and the resolved input values to the configured URL. The
/// response object's fields become this node's result map and fan out
/// through its declared outputs.
pub struct HttpToolExecutor;

#[async_trait]
impl NodeExecutor for HttpToolExecutor {
    fn kind(&self) -> &str {
        "httpTool"
    }

    async fn run(&self, ctx: ExecutorContext) -> Result<ExecutorOutput, NodeError> {
        let url = ctx
            .config
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| NodeError::InvalidInput {
                node_id: ctx.node_id.clone(),
                reason: "httpTool node has no 'url' config".into(),
            })?;

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(NodeError::InvalidInput {
                node_id: ctx.node_id.clone(),
                reason: format!("URL must start with http:// or https://, got '{url}'"),
            });
        }

        let timeout_secs = ctx
            .config
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        // stream flag first, then static body config, then dynamic inputs —
        // later entries win on key collision.
        let mut body = serde_json::Map::new();
        body.insert("stream".into(), Value::Bool(ctx.streaming));
        if let Some(Value::Object(static_body)) = ctx.config.get("body") {
            for (k, v) in static_body {
                body.insert(k.clone(), v.clone());
            }
        }
        for (k, v) in &ctx.params {
            body.insert(k.clone(), v.clone());
        }

        debug!(node_id = %ctx.node_id, url, keys = body.len(), "Calling HTTP tool");

        let response = ctx
            .deps
            .http
            .post(url)
            .timeout(Duration::from_secs(timeout_secs))
            .json(&Value::Object(body))
            .send()
            .await
            .map_err(|e| NodeError::ExecutionFailed {
                node_id: ctx.node_id.clone(),
                reason: format!("request to {url} failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(NodeError::ToolStatus {
                node_id: ctx.node_id.clone(),
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let payload: Value =
            response
                .json()
                .await
                .map_err(|e| NodeError::ToolResponseShape {
                    node_id: ctx.node_id.clone(),
                    reason: format!("invalid JSON: {e}"),
                })?;

        match payload {
            Value::Object(result) => Ok(ExecutorOutput::with_result(result)),
            other => Err(NodeError::ToolResponseShape {
                node_id: ctx.node_id.clone(),
                reason: format!("expected object, got {other}"),
            }),
        }
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

    fn ctx(config: serde_json::Map<String, Value>) -> ExecutorContext {
        ExecutorContext {
            node_id: "h1".into(),
            node_name: "Tool".into(),
            config,
            params: serde_json::Map::new(),
            history: Arc::new(Vec::new()),
            streaming: false,
            emitter: StreamEmitter::disabled(),
            cancel: CancellationToken::new(),
            deps: Arc::new(RunDeps::minimal()),
        }
    }

    #[tokio::test]
    async fn missing_url_is_invalid() {
        let err = HttpToolExecutor
            .run(ctx(serde_json::Map::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn non_http_scheme_is_invalid() {
        let mut config = serde_json::Map::new();
        config.insert("url".into(), json!("ftp://files.example.com"));
        let err = HttpToolExecutor.run(ctx(config)).await.unwrap_err();
        assert!(matches!(err, NodeError::InvalidInput { .. }));
    }
}
