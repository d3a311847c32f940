//! Milvus adapter (REST v2, `/v2/vectordb/...`).
//!
//! Memory records live in a Milvus collection with an indexed `embedding`
//! field. Window state and chat logs are not similarity-searched, so they
//! stay in the local [`FileStore`].
//!
//! Milvus answers with several hit shapes depending on version and
//! endpoint (flat fields, a nested `entity`, `distance` or `score`). They
//! are normalized into [`MemoryRecord`] here and nowhere else.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use cm_domain::config::{MilvusConfig, RetryConfig};
use cm_domain::error::{Error, Result};
use cm_domain::model::{ChatLogRecord, MemoryRecord, SessionKey, WindowState, MAX_ID_LENGTH};
use cm_domain::retry::{retry, RetryPolicy};
use cm_domain::trace::TraceEvent;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio::sync::OnceCell;

use crate::file::FileStore;
use crate::traits::{MemoryFilter, MemoryStore};

const OUTPUT_FIELDS: [&str; 6] = [
    "primary_key",
    "user_id",
    "chat_id",
    "session_id",
    "digest_text",
    "full_summary_json",
];

/// Upper bound for `full_summary_json` / `digest_text` VARCHAR fields.
const MAX_TEXT_LENGTH: usize = 65_535;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct MilvusStore {
    http: Client,
    base_url: String,
    token: Option<String>,
    cfg: MilvusConfig,
    dimension: usize,
    policy: RetryPolicy,
    ready: OnceCell<()>,
    local: FileStore,
}

impl MilvusStore {
    pub fn new(
        cfg: &MilvusConfig,
        dimension: usize,
        retry_cfg: &RetryConfig,
        local: FileStore,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            http,
            base_url: cfg.uri.trim_end_matches('/').to_owned(),
            token: cfg.token.clone(),
            cfg: cfg.clone(),
            dimension,
            policy: RetryPolicy::from_config(retry_cfg),
            ready: OnceCell::new(),
            local,
        })
    }

    // ── request helpers ──────────────────────────────────────────────

    /// POST `body` to `/v2/vectordb/{path}` and return the `data` member.
    ///
    /// Transport errors and 5xx are retried; 4xx and non-zero Milvus
    /// `code`s are not.
    async fn call(&self, path: &str, body: Value) -> Result<Value> {
        let url = format!("{}/v2/vectordb/{path}", self.base_url);
        retry(&self.policy, path, Error::is_transient, |_| {
            self.call_once(path, &url, &body)
        })
        .await
    }

    async fn call_once(&self, path: &str, url: &str, body: &Value) -> Result<Value> {
        let start = Instant::now();
        let mut rb = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .header("Request-Id", uuid::Uuid::new_v4().to_string());
        if let Some(ref token) = self.token {
            rb = rb.bearer_auth(token);
        }

        let result = rb.json(body).send().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                TraceEvent::StoreCall {
                    backend: "milvus".into(),
                    operation: path.to_owned(),
                    status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                    duration_ms,
                }
                .emit();
                return Err(cm_providers::util::from_reqwest(e));
            }
        };

        let status = resp.status();
        TraceEvent::StoreCall {
            backend: "milvus".into(),
            operation: path.to_owned(),
            status: status.as_u16(),
            duration_ms,
        }
        .emit();

        let text = resp
            .text()
            .await
            .map_err(cm_providers::util::from_reqwest)?;

        if status.is_server_error() {
            return Err(Error::Storage(format!("milvus {path} returned {status}: {text}")));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::Auth(format!("milvus {path} auth failed ({status}): {text}")));
        }
        if status.is_client_error() {
            return Err(Error::ContractViolation(format!(
                "milvus {path} rejected request ({status}): {text}"
            )));
        }

        let parsed: Value = serde_json::from_str(&text)
            .map_err(|e| Error::Storage(format!("milvus {path}: unparseable response: {e}")))?;
        let code = parsed.get("code").and_then(Value::as_i64).unwrap_or(0);
        if code != 0 {
            let message = parsed
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(Error::ContractViolation(format!(
                "milvus {path} failed (code {code}): {message}"
            )));
        }
        Ok(parsed.get("data").cloned().unwrap_or(Value::Null))
    }

    // ── collection bootstrap ─────────────────────────────────────────

    /// Create and load the collection on first use.
    pub async fn ensure_collection(&self) -> Result<()> {
        self.ready
            .get_or_try_init(|| async {
                let has = self
                    .call(
                        "collections/has",
                        json!({"dbName": self.cfg.db_name, "collectionName": self.cfg.collection_name}),
                    )
                    .await?;
                let exists = has.get("has").and_then(Value::as_bool).unwrap_or(false);
                if !exists {
                    self.call("collections/create", self.create_collection_body())
                        .await?;
                    tracing::info!(
                        collection = %self.cfg.collection_name,
                        dimension = self.dimension,
                        "milvus collection created"
                    );
                }
                self.call(
                    "collections/load",
                    json!({"dbName": self.cfg.db_name, "collectionName": self.cfg.collection_name}),
                )
                .await?;
                Ok::<(), Error>(())
            })
            .await?;
        Ok(())
    }

    fn create_collection_body(&self) -> Value {
        let varchar = |name: &str, max: usize| {
            json!({
                "fieldName": name,
                "dataType": "VarChar",
                "elementTypeParams": {"max_length": max}
            })
        };
        json!({
            "dbName": self.cfg.db_name,
            "collectionName": self.cfg.collection_name,
            "schema": {
                "autoId": false,
                "enableDynamicField": false,
                "fields": [
                    {
                        "fieldName": "primary_key",
                        "dataType": "VarChar",
                        "isPrimary": true,
                        "elementTypeParams": {"max_length": MAX_ID_LENGTH * 2 + 64}
                    },
                    varchar("user_id", MAX_ID_LENGTH),
                    varchar("chat_id", MAX_ID_LENGTH),
                    {"fieldName": "session_id", "dataType": "Int64"},
                    varchar("digest_text", MAX_TEXT_LENGTH),
                    varchar("full_summary_json", MAX_TEXT_LENGTH),
                    {
                        "fieldName": "embedding",
                        "dataType": "FloatVector",
                        "elementTypeParams": {"dim": self.dimension}
                    }
                ]
            },
            "indexParams": [{
                "fieldName": "embedding",
                "indexName": "embedding_idx",
                "metricType": self.cfg.metric_type,
                "params": {"index_type": self.cfg.index_type, "nlist": self.cfg.nlist}
            }]
        })
    }

    fn record_to_row(record: &MemoryRecord) -> Value {
        json!({
            "primary_key": record.primary_key,
            "user_id": record.user_id,
            "chat_id": record.chat_id,
            "session_id": record.session_id,
            "digest_text": record.digest_text,
            "full_summary_json": record.full_summary_json,
            "embedding": record.embedding,
        })
    }

    async fn query(&self, filter: String, limit: usize) -> Result<Vec<MemoryRecord>> {
        self.ensure_collection().await?;
        let mut fields: Vec<&str> = OUTPUT_FIELDS.to_vec();
        fields.push("embedding");
        let data = self
            .call(
                "entities/query",
                json!({
                    "dbName": self.cfg.db_name,
                    "collectionName": self.cfg.collection_name,
                    "filter": filter,
                    "outputFields": fields,
                    "limit": limit,
                }),
            )
            .await?;
        Ok(normalize_hits(&data))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Filters & hit normalization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Quote a string literal for a Milvus boolean expression.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Boolean filter expression for a [`MemoryFilter`]; `None` matches all.
pub fn filter_expr(filter: &MemoryFilter) -> Option<String> {
    match filter {
        MemoryFilter::User(user_id) => Some(format!("user_id == {}", quote(user_id))),
        MemoryFilter::Chat(key) => Some(format!(
            "user_id == {} && chat_id == {}",
            quote(&key.user_id),
            quote(&key.chat_id)
        )),
        MemoryFilter::All => None,
    }
}

/// Flatten whatever Milvus returned (`data` array, possibly nested one
/// level per query vector) into records.
pub fn normalize_hits(data: &Value) -> Vec<MemoryRecord> {
    let Some(rows) = data.as_array() else {
        return Vec::new();
    };
    rows.iter()
        .flat_map(|row| match row.as_array() {
            Some(inner) => inner.iter().filter_map(normalize_hit).collect::<Vec<_>>(),
            None => normalize_hit(row).into_iter().collect(),
        })
        .collect()
}

/// One hit → [`MemoryRecord`]. Fields may sit at the top level or under
/// `entity`; similarity comes from `distance` or `score`.
pub fn normalize_hit(hit: &Value) -> Option<MemoryRecord> {
    let entity = hit.get("entity").filter(|e| e.is_object()).unwrap_or(hit);
    let field = |name: &str| entity.get(name).or_else(|| hit.get(name));
    let text = |name: &str| field(name).and_then(Value::as_str).map(str::to_owned);

    let primary_key = text("primary_key").or_else(|| hit.get("id").and_then(Value::as_str).map(str::to_owned))?;
    let embedding = field("embedding")
        .and_then(Value::as_array)
        .map(|v| v.iter().filter_map(|x| x.as_f64().map(|f| f as f32)).collect())
        .unwrap_or_default();
    let score = hit
        .get("distance")
        .or_else(|| hit.get("score"))
        .and_then(Value::as_f64)
        .map(|s| s as f32);

    Some(MemoryRecord {
        primary_key,
        user_id: text("user_id").unwrap_or_default(),
        chat_id: text("chat_id").unwrap_or_default(),
        session_id: field("session_id").and_then(Value::as_u64).unwrap_or(0),
        digest_text: text("digest_text").unwrap_or_default(),
        embedding,
        full_summary_json: text("full_summary_json").unwrap_or_default(),
        score,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
impl MemoryStore for MilvusStore {
    async fn get_window_state(&self, key: &SessionKey) -> Result<Option<WindowState>> {
        self.local.get_window_state(key).await
    }

    async fn put_window_state(&self, state: &WindowState) -> Result<()> {
        self.local.put_window_state(state).await
    }

    async fn append_chat_log(&self, records: &[ChatLogRecord]) -> Result<()> {
        self.local.append_chat_log(records).await
    }

    async fn read_chat_log(&self, key: &SessionKey) -> Result<Vec<ChatLogRecord>> {
        self.local.read_chat_log(key).await
    }

    async fn upsert_memory(&self, record: &MemoryRecord) -> Result<()> {
        cm_providers::embedder::check_dimension(&record.embedding, self.dimension)?;
        self.ensure_collection().await?;
        self.call(
            "entities/upsert",
            json!({
                "dbName": self.cfg.db_name,
                "collectionName": self.cfg.collection_name,
                "data": [Self::record_to_row(record)],
            }),
        )
        .await?;
        Ok(())
    }

    async fn get_memory(&self, primary_key: &str) -> Result<Option<MemoryRecord>> {
        let hits = self
            .query(format!("primary_key == {}", quote(primary_key)), 1)
            .await?;
        Ok(hits.into_iter().next())
    }

    async fn list_memories(&self, key: &SessionKey) -> Result<Vec<MemoryRecord>> {
        let filter = filter_expr(&MemoryFilter::Chat(key.clone())).unwrap_or_default();
        let mut hits = self.query(filter, 16_384).await?;
        hits.sort_by_key(|r| r.session_id);
        Ok(hits)
    }

    async fn search_memories(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: &MemoryFilter,
    ) -> Result<Vec<MemoryRecord>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        cm_providers::embedder::check_dimension(embedding, self.dimension)?;
        self.ensure_collection().await?;

        let mut body = json!({
            "dbName": self.cfg.db_name,
            "collectionName": self.cfg.collection_name,
            "data": [embedding],
            "annsField": "embedding",
            "limit": top_k,
            "outputFields": OUTPUT_FIELDS,
            "searchParams": {
                "metricType": self.cfg.metric_type,
                "params": {"nprobe": self.cfg.nprobe}
            }
        });
        if let Some(expr) = filter_expr(filter) {
            body["filter"] = Value::String(expr);
        }

        let data = self.call("entities/search", body).await?;
        let mut hits = normalize_hits(&data);
        hits.truncate(top_k);
        Ok(hits)
    }

    fn backend(&self) -> &str {
        "milvus"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_flat_hit() {
        let hit = json!({
            "primary_key": "alice::c1::2",
            "user_id": "alice",
            "chat_id": "c1",
            "session_id": 2,
            "digest_text": "likes tea",
            "full_summary_json": "{}",
            "distance": 0.87
        });
        let r = normalize_hit(&hit).unwrap();
        assert_eq!(r.primary_key, "alice::c1::2");
        assert_eq!(r.session_id, 2);
        assert_eq!(r.score, Some(0.87));
        assert!(r.embedding.is_empty());
    }

    #[test]
    fn normalizes_nested_entity_hit() {
        let hit = json!({
            "id": "alice::c1::3",
            "score": 0.5,
            "entity": {"user_id": "alice", "chat_id": "c1", "session_id": 3, "digest_text": "x"}
        });
        let r = normalize_hit(&hit).unwrap();
        assert_eq!(r.primary_key, "alice::c1::3");
        assert_eq!(r.chat_id, "c1");
        assert_eq!(r.score, Some(0.5));
    }

    #[test]
    fn hit_without_key_is_dropped() {
        assert!(normalize_hit(&json!({"distance": 0.1})).is_none());
    }

    #[test]
    fn nested_result_lists_are_flattened() {
        let data = json!([[{"primary_key": "a::b::1"}, {"primary_key": "a::b::2"}]]);
        assert_eq!(normalize_hits(&data).len(), 2);
        assert!(normalize_hits(&Value::Null).is_empty());
    }

    #[test]
    fn filter_expressions_quote_values() {
        let key = SessionKey::new("o\"brien", "c1").unwrap();
        assert_eq!(
            filter_expr(&MemoryFilter::Chat(key)).unwrap(),
            r#"user_id == "o\"brien" && chat_id == "c1""#
        );
        assert_eq!(filter_expr(&MemoryFilter::All), None);
    }
}
