//! JSON-document store for standalone/offline mode.
//!
//! Layout under the configured root:
//!
//! ```text
//! {root}/windows/{user_id}/{chat_id}.json      window state, replaced atomically
//! {root}/chat_logs/{user_id}/{chat_id}.jsonl   chat log, append-only
//! {root}/memory_records.json                   every memory record, keyed by primary key
//! ```
//!
//! Ids are path segments here, so every path goes through
//! [`validate_id`] even when the key was built without [`SessionKey::new`].
//!
//! Memory records are cached in memory after the first load; search is a
//! linear cosine scan, which is fine at the scale of one user's summaries.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use cm_domain::error::{Error, Result};
use cm_domain::model::{
    sort_chat_log, validate_id, ChatLogRecord, MemoryRecord, SessionKey, WindowState,
};
use cm_domain::trace::TraceEvent;
use parking_lot::RwLock;

use crate::fsutil::{append_lines, read_optional, write_atomic};
use crate::traits::{rank_by_similarity, MemoryFilter, MemoryStore};

const MEMORY_RECORDS_FILE: &str = "memory_records.json";
const WINDOWS_DIR: &str = "windows";
const CHAT_LOGS_DIR: &str = "chat_logs";

pub struct FileStore {
    root: PathBuf,
    memories: RwLock<HashMap<String, MemoryRecord>>,
    /// Serializes snapshot-and-write of `memory_records.json`.
    records_write: tokio::sync::Mutex<()>,
}

impl FileStore {
    /// Open (or create) the store rooted at `root`.
    pub async fn open(root: &Path) -> Result<Self> {
        let root = root.to_path_buf();
        tokio::fs::create_dir_all(&root).await?;

        let records_path = root.join(MEMORY_RECORDS_FILE);
        let memories: HashMap<String, MemoryRecord> = match read_optional(records_path).await? {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                Error::Storage(format!("corrupt {MEMORY_RECORDS_FILE}: {e}"))
            })?,
            None => HashMap::new(),
        };

        tracing::info!(
            memories = memories.len(),
            path = %root.display(),
            "file store opened"
        );

        Ok(Self {
            root,
            memories: RwLock::new(memories),
            records_write: tokio::sync::Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn window_path(&self, key: &SessionKey) -> Result<PathBuf> {
        self.session_path(WINDOWS_DIR, key, "json")
    }

    pub fn chat_log_path(&self, key: &SessionKey) -> Result<PathBuf> {
        self.session_path(CHAT_LOGS_DIR, key, "jsonl")
    }

    fn session_path(&self, dir: &str, key: &SessionKey, ext: &str) -> Result<PathBuf> {
        validate_id("user_id", &key.user_id)?;
        validate_id("chat_id", &key.chat_id)?;
        Ok(self
            .root
            .join(dir)
            .join(&key.user_id)
            .join(format!("{}.{ext}", key.chat_id)))
    }

    async fn flush_memories(&self) -> Result<()> {
        let _guard = self.records_write.lock().await;
        let snapshot: BTreeMap<String, MemoryRecord> = self
            .memories
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        write_atomic(self.root.join(MEMORY_RECORDS_FILE), bytes).await
    }

    fn trace(&self, operation: &str, started: Instant) {
        TraceEvent::StoreCall {
            backend: "file".into(),
            operation: operation.into(),
            status: 0,
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();
    }
}

#[async_trait]
impl MemoryStore for FileStore {
    async fn get_window_state(&self, key: &SessionKey) -> Result<Option<WindowState>> {
        let Some(raw) = read_optional(self.window_path(key)?).await? else {
            return Ok(None);
        };
        let state: WindowState = serde_json::from_str(&raw).map_err(|e| {
            Error::Storage(format!("corrupt window state for {key}: {e}"))
        })?;
        Ok(Some(state))
    }

    async fn put_window_state(&self, state: &WindowState) -> Result<()> {
        let started = Instant::now();
        let bytes = serde_json::to_vec_pretty(state)?;
        write_atomic(self.window_path(&state.key())?, bytes).await?;
        self.trace("put_window_state", started);
        Ok(())
    }

    async fn append_chat_log(&self, records: &[ChatLogRecord]) -> Result<()> {
        let Some(first) = records.first() else {
            return Ok(());
        };
        let started = Instant::now();
        let key = SessionKey {
            user_id: first.user_id.clone(),
            chat_id: first.chat_id.clone(),
        };
        if records
            .iter()
            .any(|r| r.user_id != key.user_id || r.chat_id != key.chat_id)
        {
            return Err(Error::ContractViolation(
                "chat-log batch spans more than one chat".into(),
            ));
        }

        let mut buf = String::new();
        for r in records {
            buf.push_str(&serde_json::to_string(r)?);
            buf.push('\n');
        }
        append_lines(self.chat_log_path(&key)?, buf).await?;
        self.trace("append_chat_log", started);
        Ok(())
    }

    async fn read_chat_log(&self, key: &SessionKey) -> Result<Vec<ChatLogRecord>> {
        let Some(raw) = read_optional(self.chat_log_path(key)?).await? else {
            return Ok(Vec::new());
        };

        // Later lines win: a retried append rewrites the same primary key.
        let mut by_key: HashMap<String, ChatLogRecord> = HashMap::new();
        for (lineno, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ChatLogRecord>(line) {
                Ok(r) if r.user_id == key.user_id && r.chat_id == key.chat_id => {
                    by_key.insert(r.primary_key.clone(), r);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        chat_id = %key.chat_id,
                        line = lineno + 1,
                        error = %e,
                        "skipping unreadable chat-log line"
                    );
                }
            }
        }
        let mut rows: Vec<ChatLogRecord> = by_key.into_values().collect();
        sort_chat_log(&mut rows);
        Ok(rows)
    }

    async fn upsert_memory(&self, record: &MemoryRecord) -> Result<()> {
        let started = Instant::now();
        let mut stored = record.clone();
        stored.score = None;
        let previous = self
            .memories
            .write()
            .insert(record.primary_key.clone(), stored);

        if let Err(e) = self.flush_memories().await {
            // Keep the cache in step with the file.
            let mut memories = self.memories.write();
            match previous {
                Some(prev) => memories.insert(record.primary_key.clone(), prev),
                None => memories.remove(&record.primary_key),
            };
            return Err(e);
        }
        self.trace("upsert_memory", started);
        Ok(())
    }

    async fn get_memory(&self, primary_key: &str) -> Result<Option<MemoryRecord>> {
        Ok(self.memories.read().get(primary_key).cloned())
    }

    async fn list_memories(&self, key: &SessionKey) -> Result<Vec<MemoryRecord>> {
        let filter = MemoryFilter::Chat(key.clone());
        let mut out: Vec<MemoryRecord> = self
            .memories
            .read()
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        out.sort_by_key(|r| r.session_id);
        Ok(out)
    }

    async fn search_memories(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: &MemoryFilter,
    ) -> Result<Vec<MemoryRecord>> {
        let memories = self.memories.read();
        Ok(rank_by_similarity(memories.values(), embedding, top_k, filter))
    }

    fn backend(&self) -> &str {
        "file"
    }
}
