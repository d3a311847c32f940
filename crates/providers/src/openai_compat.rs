//! OpenAI-compatible adapter.
//!
//! Works with Groq, OpenAI, Ollama, vLLM, LM Studio, Together and any other
//! endpoint that follows the OpenAI chat completions contract. Structured
//! output uses `response_format` (`json_schema` when supported, otherwise
//! `json_object`).

use crate::traits::{
    ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, LlmProvider, ResponseFormat,
};
use crate::util::{from_reqwest, resolve_api_key, status_error};
use cm_domain::capability::LlmCapabilities;
use cm_domain::config::{AuthConfig, EmbeddingConfig, LlmConfig};
use cm_domain::error::{Error, Result};
use cm_domain::message::{Message, Usage};
use cm_domain::trace::TraceEvent;
use serde_json::Value;
use std::time::{Duration, Instant};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An LLM provider adapter for any OpenAI-compatible API endpoint.
pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: String,
    auth_header: String,
    auth_prefix: String,
    default_model: String,
    embedding_model: String,
    capabilities: LlmCapabilities,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Chat/structured-generation provider from the `[llm]` section.
    pub fn from_config(cfg: &LlmConfig) -> Result<Self> {
        Self::build(
            &cfg.provider_id,
            &cfg.base_url,
            &cfg.auth,
            &cfg.model,
            "text-embedding-3-small",
            cfg.timeout_ms,
            cfg.supports_json_schema,
        )
    }

    /// Embedding provider: `[embedding]` endpoint and credentials, falling
    /// back to the `[llm]` ones.
    pub fn for_embeddings(llm: &LlmConfig, emb: &EmbeddingConfig) -> Result<Self> {
        let base_url = emb.base_url.as_deref().unwrap_or(&llm.base_url);
        let auth = emb.auth.as_ref().unwrap_or(&llm.auth);
        Self::build(
            &llm.provider_id,
            base_url,
            auth,
            &llm.model,
            &emb.model,
            llm.timeout_ms,
            false,
        )
    }

    fn build(
        id: &str,
        base_url: &str,
        auth: &AuthConfig,
        model: &str,
        embedding_model: &str,
        timeout_ms: u64,
        supports_json_schema: bool,
    ) -> Result<Self> {
        let api_key = resolve_api_key(auth)?;
        let auth_header = auth
            .header
            .clone()
            .unwrap_or_else(|| "Authorization".into());
        let auth_prefix = auth.prefix.clone().unwrap_or_else(|| "Bearer ".into());

        let capabilities = LlmCapabilities {
            supports_json_schema,
            supports_json_mode: true,
            supports_embeddings: true,
            context_window_tokens: None,
            max_output_tokens: None,
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: id.to_owned(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            auth_header,
            auth_prefix,
            default_model: model.to_owned(),
            embedding_model: embedding_model.to_owned(),
            capabilities,
            client,
        })
    }

    // ── Internal: build authenticated request builder ──────────────

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        let header_value = format!("{}{}", self.auth_prefix, self.api_key);
        self.client
            .post(url)
            .header(&self.auth_header, &header_value)
            .header("Content-Type", "application/json")
    }

    /// POST `body` to `{base_url}/{path}` and return the parsed JSON reply.
    /// Non-2xx statuses become [`status_error`]s.
    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}/{path}", self.base_url);
        tracing::debug!(provider = %self.id, url = %url, "openai_compat request");

        let resp = self
            .authed_post(&url)
            .json(body)
            .send()
            .await
            .map_err(from_reqwest)?;
        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(status_error(&self.id, status, &text));
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn effective_model(&self, req: &ChatRequest) -> String {
        req.model
            .clone()
            .unwrap_or_else(|| self.default_model.clone())
    }

    fn build_chat_body(&self, req: &ChatRequest) -> Value {
        build_chat_body(&self.effective_model(req), req)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn msg_to_openai(msg: &Message) -> Value {
    serde_json::json!({
        "role": msg.role.as_str(),
        "content": msg.content,
    })
}

fn build_chat_body(model: &str, req: &ChatRequest) -> Value {
    let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();

    let mut body = serde_json::json!({
        "model": model,
        "messages": messages,
    });

    if let Some(temp) = req.temperature {
        body["temperature"] = serde_json::json!(temp);
    }
    if let Some(max) = req.max_tokens {
        body["max_completion_tokens"] = serde_json::json!(max);
    }
    match &req.response_format {
        ResponseFormat::Text => {}
        ResponseFormat::JsonObject => {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        ResponseFormat::JsonSchema {
            name,
            schema,
            strict,
        } => {
            body["response_format"] = serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                    "name": name,
                    "schema": schema,
                    "strict": strict,
                }
            });
        }
    }
    body
}

fn schema_name(format: &ResponseFormat) -> Option<String> {
    match format {
        ResponseFormat::Text => None,
        ResponseFormat::JsonObject => Some("json_object".into()),
        ResponseFormat::JsonSchema { name, .. } => Some(name.clone()),
    }
}

fn malformed(provider: &str, what: &str) -> Error {
    Error::Generation {
        provider: provider.into(),
        status: None,
        message: format!("malformed response: {what}"),
    }
}

fn parse_chat_response(provider: &str, body: &Value) -> Result<ChatResponse> {
    let choice = body["choices"]
        .as_array()
        .and_then(|choices| choices.first())
        .ok_or_else(|| malformed(provider, "no choices"))?;
    let message = choice
        .get("message")
        .ok_or_else(|| malformed(provider, "choice without message"))?;

    Ok(ChatResponse {
        // Some servers send `"content": null` for empty completions.
        content: message["content"].as_str().unwrap_or_default().to_owned(),
        usage: body.get("usage").and_then(parse_openai_usage),
        model: body["model"].as_str().unwrap_or("unknown").to_owned(),
        finish_reason: choice["finish_reason"].as_str().map(str::to_owned),
    })
}

fn parse_openai_usage(v: &Value) -> Option<Usage> {
    let prompt_tokens = v.get("prompt_tokens")?.as_u64()? as u32;
    let completion_tokens = v.get("completion_tokens")?.as_u64()? as u32;
    let total_tokens = v
        .get("total_tokens")
        .and_then(|t| t.as_u64())
        .map(|t| t as u32)
        .unwrap_or(prompt_tokens + completion_tokens);
    Some(Usage {
        prompt_tokens,
        completion_tokens,
        total_tokens,
    })
}

fn parse_embeddings(provider: &str, body: &Value) -> Result<Vec<Vec<f32>>> {
    let data = body["data"]
        .as_array()
        .ok_or_else(|| malformed(provider, "no data array"))?;

    Ok(data
        .iter()
        .filter_map(|item| item["embedding"].as_array())
        .map(|vector| {
            vector
                .iter()
                .filter_map(|v| v.as_f64())
                .map(|f| f as f32)
                .collect()
        })
        .collect())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let started = Instant::now();
        let body = self.post_json("chat/completions", &self.build_chat_body(req)).await?;
        let parsed = parse_chat_response(&self.id, &body)?;

        TraceEvent::LlmRequest {
            provider: self.id.clone(),
            model: parsed.model.clone(),
            schema: schema_name(&req.response_format),
            duration_ms: started.elapsed().as_millis() as u64,
            prompt_tokens: parsed.usage.as_ref().map(|u| u.prompt_tokens),
            completion_tokens: parsed.usage.as_ref().map(|u| u.completion_tokens),
        }
        .emit();

        Ok(parsed)
    }

    async fn embeddings(&self, req: &EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        let model = req
            .model
            .clone()
            .unwrap_or_else(|| self.embedding_model.clone());
        let body = serde_json::json!({ "model": model, "input": req.input });
        let body = self.post_json("embeddings", &body).await?;
        let embeddings = parse_embeddings(&self.id, &body)?;
        Ok(EmbeddingsResponse { embeddings })
    }

    fn capabilities(&self) -> &LlmCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        &self.id
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_body_carries_strict_schema() {
        let req = ChatRequest {
            messages: vec![Message::system("sys"), Message::user("hi")],
            temperature: Some(0.1),
            max_tokens: Some(64),
            response_format: ResponseFormat::JsonSchema {
                name: "ambiguous_bool".into(),
                schema: serde_json::json!({"type": "object"}),
                strict: true,
            },
            model: None,
        };
        let body = build_chat_body("allam-2-7b", &req);
        assert_eq!(body["model"], "allam-2-7b");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["max_completion_tokens"], 64);
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["name"], "ambiguous_bool");
        assert_eq!(body["response_format"]["json_schema"]["strict"], true);
    }

    #[test]
    fn text_request_has_no_response_format() {
        let req = ChatRequest {
            messages: vec![Message::user("hi")],
            ..Default::default()
        };
        let body = build_chat_body("m", &req);
        assert!(body.get("response_format").is_none());
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn parses_content_and_usage() {
        let body = serde_json::json!({
            "model": "allam-2-7b",
            "choices": [{
                "message": {"role": "assistant", "content": "Paris"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        });
        let resp = parse_chat_response("groq", &body).unwrap();
        assert_eq!(resp.content, "Paris");
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
        assert_eq!(resp.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn usage_total_is_derived_when_missing() {
        let usage =
            parse_openai_usage(&serde_json::json!({"prompt_tokens": 4, "completion_tokens": 6}))
                .unwrap();
        assert_eq!(usage.total_tokens, 10);
    }

    #[test]
    fn empty_choices_is_a_generation_error() {
        let err = parse_chat_response("groq", &serde_json::json!({"choices": []})).unwrap_err();
        assert!(matches!(err, Error::Generation { .. }));
    }

    #[test]
    fn parses_embedding_vectors() {
        let body = serde_json::json!({
            "data": [{"embedding": [0.5, -0.25]}, {"embedding": [1.0, 0.0]}]
        });
        let vectors = parse_embeddings("groq", &body).unwrap();
        assert_eq!(vectors, vec![vec![0.5, -0.25], vec![1.0, 0.0]]);
    }
}
