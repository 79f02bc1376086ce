//! Execution trace records and the persistence/billing collaborator seam.
//!
//! After a run reaches quiescence, the dispatcher hands a [`FlowRunRecord`]
//! to every configured [`RunSink`]. Chat-history persistence and billing
//! ledgers live behind this trait; the core never talks to storage directly.

use crate::message::ConversationId;
use crate::node::NodeKind;
use crate::quote::QuoteItem;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The response-visible output snapshot of one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResponse {
    pub node_id: String,
    pub node_name: String,
    pub kind: NodeKind,

    /// Wall-clock time between the previous snapshot and this one.
    pub running_time_ms: u64,

    /// The response-visible key/value pairs this node produced.
    pub values: serde_json::Map<String, Value>,
}

/// Per-node token usage, for the billing collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeUsage {
    pub node_id: String,
    pub node_name: String,

    /// Which model was billed, when the node called one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    pub total_tokens: u32,
}

/// Everything that survives a run into collaborator calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRunRecord {
    pub conversation_id: ConversationId,

    /// Concatenation of all answer fragments, in completion order.
    pub answer_text: String,

    /// Ordered response-visible snapshots.
    pub response_data: Vec<NodeResponse>,

    /// The quotes actually cited by the retrieval step.
    pub cited_quotes: Vec<QuoteItem>,

    pub usages: Vec<NodeUsage>,

    /// Sum over `usages`.
    pub total_tokens: u32,

    /// When the run reached quiescence.
    pub finished_at: DateTime<Utc>,
}

/// A collaborator notified after quiescence.
#[async_trait]
pub trait RunSink: Send + Sync {
    async fn record(&self, record: &FlowRunRecord);
}

/// Default sink: logs a summary via `tracing`.
pub struct LogSink;

#[async_trait]
impl RunSink for LogSink {
    async fn record(&self, record: &FlowRunRecord) {
        tracing::info!(
            conversation_id = %record.conversation_id,
            answer_chars = record.answer_text.len(),
            nodes = record.response_data.len(),
            cited_quotes = record.cited_quotes.len(),
            total_tokens = record.total_tokens,
            "Flow run recorded"
        );
    }
}
