//! Configuration loading, validation, and management for Promptweave.
//!
//! Loads configuration from a TOML file with environment variable
//! overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// The root configuration structure.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Provider backend settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Retrieval defaults
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Dispatch policy
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Gateway settings
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// LLM / embedding backend settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider name, for logs and usage records.
    #[serde(default = "default_provider_name")]
    pub name: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key; prefer the PROMPTWEAVE_API_KEY env var.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

fn default_provider_name() -> String {
    "openai".into()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            embedding_model: default_embedding_model(),
        }
    }
}

// Keep the API key out of debug output.
impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("model", &self.model)
            .field("embedding_model", &self.embedding_model)
            .finish()
    }
}

/// Retrieval defaults applied when node templates omit them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Minimum similarity score for fresh hits.
    #[serde(default = "default_similarity")]
    pub similarity: f32,

    /// Maximum fresh hits per search.
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Model context budget for the quote block, in tokens.
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Localized label prefixed to the quote block.
    #[serde(default = "default_quote_label")]
    pub quote_label: String,

    /// Verbatim reply when a search with this fallback set finds nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_text: Option<String>,
}

fn default_similarity() -> f32 {
    0.5
}

fn default_limit() -> usize {
    5
}

fn default_max_context_tokens() -> usize {
    3000
}

fn default_quote_label() -> String {
    "knowledge base:".into()
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity: default_similarity(),
            limit: default_limit(),
            max_context_tokens: default_max_context_tokens(),
            quote_label: default_quote_label(),
            empty_text: None,
        }
    }
}

/// Dispatch policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// "abort" stops the run on the first node failure; "isolate" lets
    /// sibling branches finish.
    #[serde(default = "default_branch_failure")]
    pub branch_failure: String,

    /// Upper bound on executor invocations per request.
    #[serde(default = "default_max_node_runs")]
    pub max_node_runs: usize,
}

fn default_branch_failure() -> String {
    "abort".into()
}

fn default_max_node_runs() -> usize {
    64
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            branch_failure: default_branch_failure(),
            max_node_runs: default_max_node_runs(),
        }
    }
}

/// Gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8080
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `path` with env var overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;

        // Environment variable overrides (highest priority)
        if config.provider.api_key.is_none() {
            config.provider.api_key = std::env::var("PROMPTWEAVE_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }
        if let Ok(base_url) = std::env::var("PROMPTWEAVE_BASE_URL") {
            config.provider.base_url = base_url;
        }
        if let Ok(model) = std::env::var("PROMPTWEAVE_MODEL") {
            config.provider.model = model;
        }

        Ok(config)
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.retrieval.similarity) {
            return Err(ConfigError::Invalid(format!(
                "retrieval.similarity must be in [0, 1], got {}",
                self.retrieval.similarity
            )));
        }
        if self.retrieval.limit == 0 {
            return Err(ConfigError::Invalid("retrieval.limit must be > 0".into()));
        }
        if self.dispatch.max_node_runs == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.max_node_runs must be > 0".into(),
            ));
        }
        if !matches!(self.dispatch.branch_failure.as_str(), "abort" | "isolate") {
            return Err(ConfigError::Invalid(format!(
                "dispatch.branch_failure must be 'abort' or 'isolate', got '{}'",
                self.dispatch.branch_failure
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn missing_file_uses_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.provider.model, "gpt-4o-mini");
    }

    #[test]
    fn parses_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[retrieval]
similarity = 0.8
limit = 3

[dispatch]
branch_failure = "isolate"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.retrieval.similarity, 0.8);
        assert_eq!(config.retrieval.limit, 3);
        assert_eq!(config.dispatch.branch_failure, "isolate");
        // Untouched sections fall back to defaults
        assert_eq!(config.gateway.host, "127.0.0.1");
    }

    #[test]
    fn invalid_similarity_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[retrieval]\nsimilarity = 1.5\n").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }

    #[test]
    fn invalid_branch_failure_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[dispatch]\nbranch_failure = \"retry\"\n").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }

    #[test]
    fn api_key_hidden_in_debug() {
        let mut config = AppConfig::default();
        config.provider.api_key = Some("sk-secret".into());
        let debug = format!("{:?}", config.provider);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("***"));
    }
}
