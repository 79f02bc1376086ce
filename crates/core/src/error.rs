//! Error types for the Promptweave domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Promptweave operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors (embedding / completion backends) ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Vector index errors ---
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    // --- Node executor errors ---
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    // --- Dispatch errors (graph-level) ---
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Embedding produced no usable result: {0}")]
    EmptyEmbedding(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum IndexError {
    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Vector dimension mismatch: index has {expected}, query has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Error)]
pub enum NodeError {
    #[error("Node {node_id}: missing input '{key}'")]
    MissingInput { node_id: String, key: String },

    #[error("Node {node_id}: invalid input — {reason}")]
    InvalidInput { node_id: String, reason: String },

    #[error("Node {node_id}: tool call to {url} returned status {status}")]
    ToolStatus {
        node_id: String,
        url: String,
        status: u16,
    },

    #[error("Node {node_id}: tool response is not a JSON object — {reason}")]
    ToolResponseShape { node_id: String, reason: String },

    #[error("Node {node_id}: execution failed — {reason}")]
    ExecutionFailed { node_id: String, reason: String },

    #[error("No executor registered for node kind '{0}'")]
    UnknownKind(String),
}

#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("Missing required request parameter: {0}")]
    MissingParam(String),

    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    #[error("Node run budget exhausted (max {max} executor runs)")]
    RunBudgetExhausted { max: usize },

    #[error("Run was cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn node_error_displays_correctly() {
        let err = Error::Node(NodeError::MissingInput {
            node_id: "kb_search".into(),
            key: "userChatInput".into(),
        });
        assert!(err.to_string().contains("kb_search"));
        assert!(err.to_string().contains("userChatInput"));
    }

    #[test]
    fn dispatch_error_from_conversion() {
        let err: Error = DispatchError::MissingParam("userChatInput".into()).into();
        assert!(matches!(err, Error::Dispatch(_)));
    }
}
