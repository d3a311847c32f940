//! Closed JSON-schema contracts for structured generation, plus a small
//! validator used to check loose (`json_object`) output after the fact.
//!
//! Every object schema sets `additionalProperties: false` and lists every
//! property in `required`, so a strict endpoint cannot drift from the
//! shape the deserializers expect.

use serde_json::{json, Value};

/// A named schema handed to the endpoint's `json_schema` response format.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaSpec {
    pub name: String,
    pub schema: Value,
}

impl SchemaSpec {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }

    /// Validate a parsed value against this schema.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        validate(value, &self.schema, "$")
    }

    /// Summary fields produced by compaction.
    pub fn session_summary() -> Self {
        let strings = |description: &str| {
            json!({"type": "array", "items": {"type": "string"}, "description": description})
        };
        Self::new(
            "session_summary_content",
            json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "user_profile": {
                        "type": "object",
                        "additionalProperties": false,
                        "properties": {
                            "prefs": strings("Stable user preferences about response style, format or language."),
                            "constraints": strings("Conditions, limitations or restrictions of the user.")
                        },
                        "required": ["prefs", "constraints"]
                    },
                    "key_facts": strings("Important facts: what the user asked about and what information was given."),
                    "decisions": strings("Explicit decisions or choices made."),
                    "open_questions": strings("Unresolved questions asked or implied by the user."),
                    "todos": strings("Actionable tasks explicitly requested or implied.")
                },
                "required": ["user_profile", "key_facts", "decisions", "open_questions", "todos"]
            }),
        )
    }

    pub fn ambiguous_bool() -> Self {
        Self::new(
            "ambiguous_bool",
            json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "is_ambiguous": {"type": "boolean"}
                },
                "required": ["is_ambiguous"]
            }),
        )
    }

    pub fn rewritten_query() -> Self {
        Self::new(
            "rewritten_query",
            json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "rewritten_query": {
                        "type": "string",
                        "description": "A clearer and more specific version of the original query."
                    }
                },
                "required": ["rewritten_query"]
            }),
        )
    }

    pub fn clarifying_questions() -> Self {
        Self::new(
            "clarifying_questions",
            json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "questions": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "additionalProperties": false,
                            "properties": {
                                "question": {"type": "string"},
                                "type": {
                                    "type": "string",
                                    "enum": ["scope", "constraints", "context", "goal", "format"]
                                }
                            },
                            "required": ["question", "type"]
                        }
                    }
                },
                "required": ["questions"]
            }),
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Check `value` against the subset of JSON Schema the contracts above
/// use: `type`, `properties`, `required`, `additionalProperties`, `items`,
/// `enum`, `maxItems`. Errors carry a `$.path` to the offending node.
pub fn validate(value: &Value, schema: &Value, path: &str) -> Result<(), String> {
    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(format!("{path}: {value} is not one of {allowed:?}"));
        }
    }

    let Some(ty) = schema.get("type").and_then(Value::as_str) else {
        return Ok(());
    };

    match ty {
        "object" => {
            let obj = value
                .as_object()
                .ok_or_else(|| format!("{path}: expected object"))?;
            let props = schema.get("properties").and_then(Value::as_object);

            if let Some(required) = schema.get("required").and_then(Value::as_array) {
                for field in required.iter().filter_map(Value::as_str) {
                    if !obj.contains_key(field) {
                        return Err(format!("{path}: missing required field '{field}'"));
                    }
                }
            }

            let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));
            for (key, child) in obj {
                match props.and_then(|p| p.get(key)) {
                    Some(child_schema) => validate(child, child_schema, &format!("{path}.{key}"))?,
                    None if closed => {
                        return Err(format!("{path}: unexpected field '{key}'"));
                    }
                    None => {}
                }
            }
            Ok(())
        }
        "array" => {
            let items = value
                .as_array()
                .ok_or_else(|| format!("{path}: expected array"))?;
            if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
                if items.len() as u64 > max {
                    return Err(format!("{path}: {} items exceeds maxItems {max}", items.len()));
                }
            }
            if let Some(item_schema) = schema.get("items") {
                for (i, item) in items.iter().enumerate() {
                    validate(item, item_schema, &format!("{path}[{i}]"))?;
                }
            }
            Ok(())
        }
        "string" if value.is_string() => Ok(()),
        "boolean" if value.is_boolean() => Ok(()),
        "integer" if value.is_i64() || value.is_u64() => Ok(()),
        "number" if value.is_number() => Ok(()),
        "null" if value.is_null() => Ok(()),
        other => Err(format!("{path}: expected {other}, got {value}")),
    }
}

/// Pull the JSON object out of a loose completion: strips code fences and
/// any prose around the outermost `{ ... }`.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
