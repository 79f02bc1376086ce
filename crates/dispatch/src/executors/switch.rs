//! Switch executor — boolean branch selection.

use super::{ExecutorContext, ExecutorOutput, NodeExecutor};
use async_trait::async_trait;
use promptweave_core::error::NodeError;
use serde_json::{Value, json};

/// Fires exactly one of the `true`/`false` outputs with value `1`. The
/// other output is left permanently unset, so its branch of the graph
/// never becomes runnable.
pub struct SwitchExecutor;

/// Truthiness for a boolean-ish port value: null, false, 0, "" and empty
/// arrays are falsy; everything else is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

#[async_trait]
impl NodeExecutor for SwitchExecutor {
    fn kind(&self) -> &str {
        "switch"
    }

    async fn run(&self, ctx: ExecutorContext) -> Result<ExecutorOutput, NodeError> {
        let condition = ctx
            .params
            .get("condition")
            .ok_or_else(|| NodeError::MissingInput {
                node_id: ctx.node_id.clone(),
                key: "condition".into(),
            })?;

        let key = if is_truthy(condition) { "true" } else { "false" };

        let mut result = serde_json::Map::new();
        result.insert(key.into(), json!(1));
        Ok(ExecutorOutput::with_result(result))
    }
}
