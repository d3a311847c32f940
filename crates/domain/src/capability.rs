use serde::{Deserialize, Serialize};

/// What a {provider, model} pair advertises.
///
/// The structured client consults these before choosing between the strict
/// `json_schema` path and the loose `json_object` fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCapabilities {
    pub supports_json_schema: bool,
    pub supports_json_mode: bool,
    pub supports_embeddings: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_window_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl Default for LlmCapabilities {
    fn default() -> Self {
        Self {
            supports_json_schema: false,
            supports_json_mode: false,
            supports_embeddings: false,
            context_window_tokens: None,
            max_output_tokens: None,
        }
    }
}
