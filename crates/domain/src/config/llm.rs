use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Generation provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The OpenAI-compatible endpoint that answers queries and produces
/// structured output (summaries, ambiguity verdicts, rewrites).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "d_provider_id")]
    pub provider_id: String,
    #[serde(default = "d_base_url")]
    pub base_url: String,
    #[serde(default = "d_model")]
    pub model: String,
    #[serde(default = "d_auth")]
    pub auth: AuthConfig,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    #[serde(default = "d_512")]
    pub max_completion_tokens: u32,
    #[serde(default = "d_60000")]
    pub timeout_ms: u64,
    #[serde(default = "d_system_prompt")]
    pub system_prompt: String,
    /// Whether the endpoint honours `response_format: json_schema`. When
    /// false, structured calls go straight to the `json_object` fallback.
    #[serde(default = "super::d_true")]
    pub supports_json_schema: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider_id: d_provider_id(),
            base_url: d_base_url(),
            model: d_model(),
            auth: d_auth(),
            temperature: d_temperature(),
            max_completion_tokens: 512,
            timeout_ms: 60_000,
            system_prompt: d_system_prompt(),
            supports_json_schema: true,
        }
    }
}

/// Where the API key comes from.
///
/// Precedence: plaintext `key`, then keychain `service` + `account`,
/// then the `env` variable.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Header name (default `Authorization`).
    #[serde(default)]
    pub header: Option<String>,
    /// Header value prefix (default `Bearer `).
    #[serde(default)]
    pub prefix: Option<String>,
    /// Plaintext key. Discouraged; logged as a warning.
    #[serde(default)]
    pub key: Option<String>,
    /// Environment variable holding the key.
    #[serde(default)]
    pub env: Option<String>,
    /// OS keychain service name.
    #[serde(default)]
    pub service: Option<String>,
    /// OS keychain account name.
    #[serde(default)]
    pub account: Option<String>,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_provider_id() -> String {
    "groq".into()
}
fn d_base_url() -> String {
    "https://api.groq.com/openai/v1".into()
}
fn d_model() -> String {
    "allam-2-7b".into()
}
fn d_auth() -> AuthConfig {
    AuthConfig {
        env: Some("GROQ_API_KEY".into()),
        ..Default::default()
    }
}
fn d_temperature() -> f32 {
    0.7
}
fn d_512() -> u32 {
    512
}
fn d_60000() -> u64 {
    60_000
}
fn d_system_prompt() -> String {
    "You are a helpful assistant.".into()
}
