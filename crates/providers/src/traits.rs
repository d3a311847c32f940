use cm_domain::capability::LlmCapabilities;
use cm_domain::error::Result;
use cm_domain::message::{Message, Usage};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How the model is asked to shape its output.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ResponseFormat {
    /// Free text.
    #[default]
    Text,
    /// Any JSON object (`response_format: {"type": "json_object"}`).
    JsonObject,
    /// A closed JSON schema the endpoint enforces server-side.
    JsonSchema {
        name: String,
        schema: Value,
        strict: bool,
    },
}

/// One generation call: the answer turn or a structured step.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// System prompt first, then the conversation.
    pub messages: Vec<Message>,
    /// `None` keeps the endpoint default.
    pub temperature: Option<f32>,
    /// Sent as `max_completion_tokens`.
    pub max_tokens: Option<u32>,
    pub response_format: ResponseFormat,
    /// Overrides the configured model for this call only.
    pub model: Option<String>,
}

/// What came back from one generation call.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Raw text; JSON for structured calls.
    pub content: String,
    /// `None` when the endpoint omits `usage`; callers then estimate.
    pub usage: Option<Usage>,
    pub model: String,
    pub finish_reason: Option<String>,
}

/// Texts to embed in one batch.
#[derive(Debug, Clone)]
pub struct EmbeddingsRequest {
    pub input: Vec<String>,
    /// `None` uses the configured embedding model.
    pub model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EmbeddingsResponse {
    /// One vector per input, in input order.
    pub embeddings: Vec<Vec<f32>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The Structured Generation Port, plus embeddings for endpoints that
/// serve both.
///
/// Requests are borrowed so the retry combinator can resend them.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse>;

    async fn embeddings(&self, req: &EmbeddingsRequest) -> Result<EmbeddingsResponse>;

    /// Decides whether strict `json_schema` output is attempted.
    fn capabilities(&self) -> &LlmCapabilities;

    /// Name used in logs and trace events.
    fn provider_id(&self) -> &str;

    fn default_model(&self) -> &str;
}
