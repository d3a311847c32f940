//! Structured Generation Port: free-text generation and schema-validated
//! generation on top of any [`LlmProvider`].
//!
//! Structured calls try the strict `json_schema` response format up to the
//! configured attempt budget, then make one loose `json_object` attempt
//! with the schema spelled out in the prompt and validate the result
//! after parsing. Both paths run through [`cm_domain::retry`].

use std::sync::Arc;

use cm_domain::config::{LlmConfig, RetryConfig};
use cm_domain::error::{Error, Result};
use cm_domain::message::{Message, Role, Usage};
use cm_domain::retry::{retry, retry_with_fallback, RetryPolicy};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::schema::{extract_json_object, SchemaSpec};
use crate::traits::{ChatRequest, LlmProvider, ResponseFormat};

/// Output of [`StructuredClient::generate`].
#[derive(Debug, Clone)]
pub struct Generated {
    pub role: Role,
    pub content: String,
    /// Reported by the endpoint, or estimated from text length.
    pub usage: Usage,
}

/// A schema-validated value plus the usage of the call that produced it.
#[derive(Debug, Clone)]
pub struct Structured<T> {
    pub value: T,
    pub usage: Usage,
}

/// Per-call sampling overrides.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerationParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

pub struct StructuredClient {
    provider: Arc<dyn LlmProvider>,
    system_prompt: String,
    defaults: GenerationParams,
    policy: RetryPolicy,
    structured_policy: RetryPolicy,
}

impl StructuredClient {
    pub fn new(provider: Arc<dyn LlmProvider>, llm: &LlmConfig, retry_cfg: &RetryConfig) -> Self {
        let policy = RetryPolicy::from_config(retry_cfg);
        let structured_policy = policy.with_attempts(retry_cfg.structured_attempts);
        Self {
            provider,
            system_prompt: llm.system_prompt.clone(),
            defaults: GenerationParams {
                temperature: Some(llm.temperature),
                max_tokens: Some(llm.max_completion_tokens),
            },
            policy,
            structured_policy,
        }
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Answer a single prompt under the configured system prompt.
    pub async fn generate(&self, prompt: &str) -> Result<Generated> {
        let messages = vec![Message::system(&self.system_prompt), Message::user(prompt)];
        self.generate_messages(messages).await
    }

    /// Answer an arbitrary message list (used for augmented-context turns).
    pub async fn generate_messages(&self, messages: Vec<Message>) -> Result<Generated> {
        let req = ChatRequest {
            messages,
            temperature: self.defaults.temperature,
            max_tokens: self.defaults.max_tokens,
            response_format: ResponseFormat::Text,
            model: None,
        };
        let provider = self.provider.as_ref();
        let resp = retry(&self.policy, "generate", Error::is_transient, |_| {
            provider.chat(&req)
        })
        .await?;

        let prompt_text: String = req.messages.iter().map(|m| m.content.as_str()).collect();
        let usage = resp
            .usage
            .unwrap_or_else(|| Usage::estimate(&prompt_text, &resp.content));
        Ok(Generated {
            role: Role::Assistant,
            content: resp.content,
            usage,
        })
    }

    /// Produce a value matching `schema`, deserialized into `T`.
    ///
    /// Fails with [`Error::StructuredGeneration`] when neither the strict
    /// attempts nor the loose fallback yield a valid object. Permanent
    /// upstream errors (bad request, auth) are returned unchanged.
    pub async fn generate_structured<T: DeserializeOwned>(
        &self,
        messages: Vec<Message>,
        schema: &SchemaSpec,
        params: GenerationParams,
    ) -> Result<Structured<T>> {
        let params = GenerationParams {
            temperature: params.temperature.or(self.defaults.temperature),
            max_tokens: params.max_tokens.or(self.defaults.max_tokens),
        };
        let operation = format!("structured:{}", schema.name);
        let loose_req = loose_request(&messages, schema, params);

        let outcome = if self.provider.capabilities().supports_json_schema {
            let strict_req = ChatRequest {
                messages,
                temperature: params.temperature,
                max_tokens: params.max_tokens,
                response_format: ResponseFormat::JsonSchema {
                    name: schema.name.clone(),
                    schema: schema.schema.clone(),
                    strict: true,
                },
                model: None,
            };
            retry_with_fallback(
                &self.structured_policy,
                &operation,
                Error::is_transient,
                |_| self.attempt::<T>(&strict_req, schema),
                || self.attempt::<T>(&loose_req, schema),
            )
            .await
        } else {
            retry(&self.structured_policy, &operation, Error::is_transient, |_| {
                self.attempt::<T>(&loose_req, schema)
            })
            .await
        };

        outcome.map_err(|e| match e {
            Error::StructuredGeneration { .. }
            | Error::Auth(_)
            | Error::Config(_)
            | Error::ContractViolation(_) => e,
            Error::Generation {
                status: Some(code), ..
            } if (400..500).contains(&code) && code != 429 => e,
            other => Error::StructuredGeneration {
                schema: schema.name.clone(),
                message: other.to_string(),
            },
        })
    }

    async fn attempt<T: DeserializeOwned>(
        &self,
        req: &ChatRequest,
        schema: &SchemaSpec,
    ) -> Result<Structured<T>> {
        let resp = self.provider.chat(req).await?;
        let value = parse_structured::<T>(&resp.content, schema)?;
        let prompt_text: String = req.messages.iter().map(|m| m.content.as_str()).collect();
        let usage = resp
            .usage
            .unwrap_or_else(|| Usage::estimate(&prompt_text, &resp.content));
        Ok(Structured { value, usage })
    }
}

fn loose_request(messages: &[Message], schema: &SchemaSpec, params: GenerationParams) -> ChatRequest {
    let instruction = format!(
        "Respond with a single JSON object and nothing else. It must match this JSON schema \
         exactly, with no additional properties:\n{}",
        schema.schema
    );
    let mut loose = Vec::with_capacity(messages.len() + 1);
    loose.push(Message::system(instruction));
    loose.extend(messages.iter().cloned());
    ChatRequest {
        messages: loose,
        temperature: params.temperature,
        max_tokens: params.max_tokens,
        response_format: ResponseFormat::JsonObject,
        model: None,
    }
}

/// Parse, validate against the closed schema, then deserialize.
pub fn parse_structured<T: DeserializeOwned>(content: &str, schema: &SchemaSpec) -> Result<T> {
    let fail = |message: String| Error::StructuredGeneration {
        schema: schema.name.clone(),
        message,
    };
    let raw = extract_json_object(content)
        .ok_or_else(|| fail(format!("no JSON object in output: {content:.120}")))?;
    let value: Value = serde_json::from_str(raw).map_err(|e| fail(e.to_string()))?;
    schema.validate(&value).map_err(fail)?;
    serde_json::from_value(value).map_err(|e| fail(e.to_string()))
}
