mod compaction;
mod llm;
mod retrieval;
mod retry;
mod session;
mod storage;

pub use compaction::*;
pub use llm::*;
pub use retrieval::*;
pub use retry::*;
pub use session::*;
pub use storage::*;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::SessionKey;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Every tunable of the memory manager. Built once (TOML + defaults) and
/// handed to each component's constructor.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub compaction: CompactionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut push = |severity, field: &str, message: String| {
            errors.push(ConfigError {
                severity,
                field: field.into(),
                message,
            })
        };

        if let Err(e) = SessionKey::new(&self.session.user_id, &self.session.chat_id) {
            push(ConfigSeverity::Error, "session", e.to_string());
        }

        if self.window.cost_budget == 0 {
            push(
                ConfigSeverity::Error,
                "window.cost_budget",
                "cost budget must be greater than 0".into(),
            );
        }

        if self.llm.base_url.is_empty() {
            push(
                ConfigSeverity::Error,
                "llm.base_url",
                "base_url must not be empty".into(),
            );
        }
        if self.llm.model.is_empty() {
            push(ConfigSeverity::Error, "llm.model", "model must not be empty".into());
        }

        if self.embedding.dimension == 0 {
            push(
                ConfigSeverity::Error,
                "embedding.dimension",
                "dimension must be greater than 0".into(),
            );
        }

        if self.retrieval.top_k == 0 {
            push(
                ConfigSeverity::Warning,
                "retrieval.top_k",
                "top_k = 0 disables memory retrieval".into(),
            );
        }
        if self.retrieval.max_injected > MAX_INJECTED_MEMORIES {
            push(
                ConfigSeverity::Error,
                "retrieval.max_injected",
                format!(
                    "max_injected ({}) exceeds the limit of {MAX_INJECTED_MEMORIES}",
                    self.retrieval.max_injected
                ),
            );
        } else if self.retrieval.max_injected > self.retrieval.top_k {
            push(
                ConfigSeverity::Warning,
                "retrieval.max_injected",
                format!(
                    "max_injected ({}) exceeds top_k ({}); at most top_k memories are injected",
                    self.retrieval.max_injected, self.retrieval.top_k
                ),
            );
        }

        if self.retry.max_attempts == 0 {
            push(
                ConfigSeverity::Warning,
                "retry.max_attempts",
                "0 attempts is treated as 1".into(),
            );
        }

        if self.storage.backend == StorageBackend::Milvus && self.storage.milvus.uri.is_empty() {
            push(
                ConfigSeverity::Error,
                "storage.milvus.uri",
                "uri must not be empty when backend = \"milvus\"".into(),
            );
        }
        if self.storage.backend == StorageBackend::Memory {
            push(
                ConfigSeverity::Warning,
                "storage.backend",
                "in-memory storage is lost on exit".into(),
            );
        }

        errors
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
