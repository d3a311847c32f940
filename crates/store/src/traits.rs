use async_trait::async_trait;
use cm_domain::config::RetrievalScope;
use cm_domain::error::Result;
use cm_domain::model::{ChatLogRecord, MemoryRecord, SessionKey, WindowState};

/// Which memory records a similarity search may return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryFilter {
    User(String),
    Chat(SessionKey),
    All,
}

impl MemoryFilter {
    pub fn from_scope(scope: RetrievalScope, key: &SessionKey) -> Self {
        match scope {
            RetrievalScope::User => MemoryFilter::User(key.user_id.clone()),
            RetrievalScope::Chat => MemoryFilter::Chat(key.clone()),
            RetrievalScope::Global => MemoryFilter::All,
        }
    }

    pub fn matches(&self, record: &MemoryRecord) -> bool {
        match self {
            MemoryFilter::User(user_id) => &record.user_id == user_id,
            MemoryFilter::Chat(key) => record.user_id == key.user_id && record.chat_id == key.chat_id,
            MemoryFilter::All => true,
        }
    }
}

/// The Memory Store port.
///
/// Implementations may talk to a vector database, local JSON documents, or
/// process memory. Every write is an upsert by primary key; repeating one
/// never duplicates a row.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Window-State table lookup by `user_id::chat_id`.
    async fn get_window_state(&self, key: &SessionKey) -> Result<Option<WindowState>>;

    /// Overwrite the window state in place.
    async fn put_window_state(&self, state: &WindowState) -> Result<()>;

    /// Write chat-log rows. Rows whose primary key already exists are
    /// replaced, so a retried write is harmless.
    async fn append_chat_log(&self, records: &[ChatLogRecord]) -> Result<()>;

    /// Every chat-log row of one chat, sorted by index (user half first).
    async fn read_chat_log(&self, key: &SessionKey) -> Result<Vec<ChatLogRecord>>;

    async fn upsert_memory(&self, record: &MemoryRecord) -> Result<()>;

    async fn get_memory(&self, primary_key: &str) -> Result<Option<MemoryRecord>>;

    /// Memory records of one chat, ordered by session id.
    async fn list_memories(&self, key: &SessionKey) -> Result<Vec<MemoryRecord>>;

    /// Up to `top_k` records most similar to `embedding`, best first, with
    /// `score` set. An empty store yields an empty vec.
    async fn search_memories(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: &MemoryFilter,
    ) -> Result<Vec<MemoryRecord>>;

    /// Short backend name for logs and trace events.
    fn backend(&self) -> &str;
}

/// Rank `candidates` by cosine similarity to `embedding` and keep `top_k`.
/// Shared by the local backends.
pub(crate) fn rank_by_similarity<'a>(
    candidates: impl Iterator<Item = &'a MemoryRecord>,
    embedding: &[f32],
    top_k: usize,
    filter: &MemoryFilter,
) -> Vec<MemoryRecord> {
    let mut scored: Vec<MemoryRecord> = candidates
        .filter(|r| filter.matches(r))
        .map(|r| {
            let mut hit = r.clone();
            hit.score = Some(cm_providers::similarity::cosine_similarity(embedding, &r.embedding));
            hit
        })
        .collect();
    scored.sort_by(|a, b| {
        b.score
            .unwrap_or(0.0)
            .total_cmp(&a.score.unwrap_or(0.0))
            .then_with(|| a.primary_key.cmp(&b.primary_key))
    });
    scored.truncate(top_k);
    scored
}
