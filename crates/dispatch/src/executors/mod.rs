//! Node executors — per-node-kind behavior.
//!
//! Each node kind (answer, switch, httpTool, contextAssembly,
//! modelCompletion) implements [`NodeExecutor`]. Executors are registered in
//! the [`ExecutorRegistry`] by kind tag, so new kinds can be added without
//! modifying the dispatcher loop.

pub mod answer;
pub mod context_assembly;
pub mod http_tool;
pub mod model_completion;
pub mod switch;

use crate::emitter::StreamEmitter;
use async_trait::async_trait;
use promptweave_core::error::NodeError;
use promptweave_core::index::VectorIndex;
use promptweave_core::message::ChatTurn;
use promptweave_core::provider::{CompletionProvider, EmbeddingProvider};
use promptweave_core::quote::QuoteItem;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared backends every run hands to its executors.
pub struct RunDeps {
    pub completion: Option<Arc<dyn CompletionProvider>>,
    pub embedder: Option<Arc<dyn EmbeddingProvider>>,
    pub index: Option<Arc<dyn VectorIndex>>,
    pub http: reqwest::Client,

    /// Model used when a node's config does not name one.
    pub default_model: String,

    /// Localized label prefixed to quote blocks.
    pub quote_label: String,
}

impl RunDeps {
    /// Deps with no backends — enough for answer/switch/httpTool graphs.
    pub fn minimal() -> Self {
        Self {
            completion: None,
            embedder: None,
            index: None,
            http: reqwest::Client::new(),
            default_model: "gpt-4o-mini".into(),
            quote_label: promptweave_retrieval::DEFAULT_QUOTE_LABEL.into(),
        }
    }
}

/// Everything one executor invocation sees.
pub struct ExecutorContext {
    pub node_id: String,
    pub node_name: String,

    /// Static per-node configuration from the template.
    pub config: serde_json::Map<String, Value>,

    /// Snapshot of the node's resolved input values at trigger time.
    pub params: serde_json::Map<String, Value>,

    /// Conversation history seeded from the request.
    pub history: Arc<Vec<ChatTurn>>,

    pub streaming: bool,
    pub emitter: StreamEmitter,
    pub cancel: CancellationToken,
    pub deps: Arc<RunDeps>,
}

impl ExecutorContext {
    /// A string param, falling back to the node config.
    pub fn string_opt(&self, key: &str) -> Option<String> {
        self.params
            .get(key)
            .or_else(|| self.config.get(key))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    /// A required string param.
    pub fn string(&self, key: &str) -> Result<String, NodeError> {
        self.string_opt(key).ok_or_else(|| NodeError::MissingInput {
            node_id: self.node_id.clone(),
            key: key.to_string(),
        })
    }

    /// A config value deserialized into `T`.
    pub fn config_as<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.config
            .get(key)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }
}

/// Token usage one executor wants billed.
#[derive(Debug, Clone)]
pub struct UsageReport {
    pub model: Option<String>,
    pub total_tokens: u32,
}

/// What an executor produced.
///
/// `result` is fanned out through the node's declared output ports. The
/// remaining fields are side channels the dispatcher folds into the run
/// trace, mirroring the response/usage bookkeeping of the output contract.
#[derive(Debug, Default)]
pub struct ExecutorOutput {
    pub result: serde_json::Map<String, Value>,

    pub usage: Option<UsageReport>,

    /// Quotes cited by a retrieval node, for the audit record.
    pub cited_quotes: Vec<QuoteItem>,

    /// Set when the node already wrote its answer fragments to the
    /// emitter itself (token streaming); fan-out then skips re-emitting.
    pub streamed: bool,

    /// Set by a retrieval node whose search came up empty and whose config
    /// declares a fallback: the run stops and returns this text verbatim.
    pub short_circuit: Option<String>,
}

impl ExecutorOutput {
    pub fn with_result(result: serde_json::Map<String, Value>) -> Self {
        Self {
            result,
            ..Default::default()
        }
    }
}

/// The executor trait, one implementation per node kind.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// The kind tag this executor handles.
    fn kind(&self) -> &str;

    async fn run(&self, ctx: ExecutorContext) -> Result<ExecutorOutput, NodeError>;
}

/// A registry of executors, keyed by node kind tag.
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// A registry with all built-in kinds registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(answer::AnswerExecutor));
        registry.register(Arc::new(switch::SwitchExecutor));
        registry.register(Arc::new(http_tool::HttpToolExecutor));
        registry.register(Arc::new(context_assembly::ContextAssemblyExecutor));
        registry.register(Arc::new(model_completion::ModelCompletionExecutor));
        registry
    }

    /// Register an executor. Replaces any existing executor for the tag.
    pub fn register(&mut self, executor: Arc<dyn NodeExecutor>) {
        self.executors
            .insert(executor.kind().to_string(), executor);
    }

    /// Look up the executor for a kind tag.
    pub fn get(&self, kind: &str) -> Result<Arc<dyn NodeExecutor>, NodeError> {
        self.executors
            .get(kind)
            .cloned()
            .ok_or_else(|| NodeError::UnknownKind(kind.to_string()))
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.executors.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
