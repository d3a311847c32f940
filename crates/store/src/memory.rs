//! Process-local store. Nothing survives a restart; used by tests and by
//! `backend = "memory"`.

use std::collections::HashMap;

use async_trait::async_trait;
use cm_domain::error::Result;
use cm_domain::model::{sort_chat_log, ChatLogRecord, MemoryRecord, SessionKey, WindowState};
use parking_lot::RwLock;

use crate::traits::{rank_by_similarity, MemoryFilter, MemoryStore};

#[derive(Default)]
pub struct InMemoryStore {
    windows: RwLock<HashMap<String, WindowState>>,
    chat_log: RwLock<HashMap<String, ChatLogRecord>>,
    memories: RwLock<HashMap<String, MemoryRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory_count(&self) -> usize {
        self.memories.read().len()
    }

    pub fn chat_log_count(&self) -> usize {
        self.chat_log.read().len()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn get_window_state(&self, key: &SessionKey) -> Result<Option<WindowState>> {
        Ok(self.windows.read().get(&key.window_key()).cloned())
    }

    async fn put_window_state(&self, state: &WindowState) -> Result<()> {
        self.windows
            .write()
            .insert(state.key().window_key(), state.clone());
        Ok(())
    }

    async fn append_chat_log(&self, records: &[ChatLogRecord]) -> Result<()> {
        let mut log = self.chat_log.write();
        for r in records {
            log.insert(r.primary_key.clone(), r.clone());
        }
        Ok(())
    }

    async fn read_chat_log(&self, key: &SessionKey) -> Result<Vec<ChatLogRecord>> {
        let mut rows: Vec<ChatLogRecord> = self
            .chat_log
            .read()
            .values()
            .filter(|r| r.user_id == key.user_id && r.chat_id == key.chat_id)
            .cloned()
            .collect();
        sort_chat_log(&mut rows);
        Ok(rows)
    }

    async fn upsert_memory(&self, record: &MemoryRecord) -> Result<()> {
        let mut stored = record.clone();
        stored.score = None;
        self.memories
            .write()
            .insert(record.primary_key.clone(), stored);
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
        "memory"
    }
}
