use serde::{Deserialize, Serialize};

use super::AuthConfig;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query augmentation & retrieval
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Hard cap on memories injected into one augmented context.
pub const MAX_INJECTED_MEMORIES: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Memories requested from the vector search.
    #[serde(default = "d_5")]
    pub top_k: usize,
    /// Memories actually injected into the prompt (never more than `top_k`
    /// or [`MAX_INJECTED_MEMORIES`]).
    #[serde(default = "d_3")]
    pub max_injected: usize,
    /// Most recent window messages carried into the augmented context.
    #[serde(default = "d_8")]
    pub recent_messages: usize,
    /// Per-message character cap in the rendered context.
    #[serde(default = "d_2000")]
    pub max_message_chars: usize,
    /// Cap on each aggregated signal list (prefs, constraints, open questions).
    #[serde(default = "d_8")]
    pub max_signal_items: usize,
    #[serde(default)]
    pub scope: RetrievalScope,
    /// Classify and rewrite ambiguous queries before retrieval.
    #[serde(default = "super::d_true")]
    pub rewrite_queries: bool,
    /// Ask for clarifying questions when a rewrite is still ambiguous.
    #[serde(default = "super::d_true")]
    pub clarifying_questions: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_injected: 3,
            recent_messages: 8,
            max_message_chars: 2000,
            max_signal_items: 8,
            scope: RetrievalScope::User,
            rewrite_queries: true,
            clarifying_questions: true,
        }
    }
}

/// Which memories a similarity search may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalScope {
    /// Any chat of the current user.
    #[default]
    User,
    /// Only the current chat.
    Chat,
    /// Every record in the store.
    Global,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Embedding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub kind: EmbeddingKind,
    /// Vector length. Must match the store's indexed vector field.
    #[serde(default = "d_1536")]
    pub dimension: usize,
    #[serde(default = "d_model")]
    pub model: String,
    /// Embedding endpoint; defaults to `llm.base_url`.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Embedding credentials; default to `llm.auth`.
    #[serde(default)]
    pub auth: Option<AuthConfig>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            kind: EmbeddingKind::Provider,
            dimension: 1536,
            model: d_model(),
            base_url: None,
            auth: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingKind {
    /// OpenAI-compatible `/embeddings` endpoint.
    #[default]
    Provider,
    /// Local feature-hashing embedder; no network.
    Hash,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_3() -> usize {
    3
}
fn d_5() -> usize {
    5
}
fn d_8() -> usize {
    8
}
fn d_2000() -> usize {
    2000
}
fn d_1536() -> usize {
    1536
}
fn d_model() -> String {
    "text-embedding-3-small".into()
}
