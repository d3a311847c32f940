//! Durable summary sinks.
//!
//! The file sink writes one JSON document per summary at
//! `{root}/summaries/{user_id}/{chat_id}/{summary_index}_summary.json`:
//!
//! ```json
//! {
//!   "session_summary": {
//!     "session_id": "...", "summary_idx": 3,
//!     "user_profile": {"prefs": [], "constraints": []},
//!     "key_facts": [], "decisions": [], "open_questions": [], "todos": []
//!   },
//!   "message_range_summarized": {"from": 12, "to": 17}
//! }
//! ```
//!
//! Re-persisting the same `(user_id, chat_id, summary_index)` replaces the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cm_domain::error::{Error, Result};
use cm_domain::model::{validate_id, IndexRange, SessionKey, Summary, UserProfile};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::fsutil::{read_optional, write_atomic};

const SUMMARIES_DIR: &str = "summaries";

#[async_trait]
pub trait SummarySink: Send + Sync {
    /// Persist idempotently under `(session, summary_index)`.
    async fn persist(&self, summary: &Summary) -> Result<()>;

    /// All summaries of one chat, ordered by index.
    async fn list(&self, key: &SessionKey) -> Result<Vec<Summary>>;

    fn name(&self) -> &str;
}

// ── on-disk document ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryDocument {
    pub session_summary: SessionSummaryBody,
    pub message_range_summarized: IndexRange,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummaryBody {
    pub session_id: String,
    #[serde(default)]
    pub user_id: String,
    pub summary_idx: u64,
    pub user_profile: UserProfile,
    pub key_facts: Vec<String>,
    pub decisions: Vec<String>,
    pub open_questions: Vec<String>,
    pub todos: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl From<&Summary> for SummaryDocument {
    fn from(s: &Summary) -> Self {
        Self {
            session_summary: SessionSummaryBody {
                session_id: s.session_id.clone(),
                user_id: s.user_id.clone(),
                summary_idx: s.summary_index,
                user_profile: s.user_profile.clone(),
                key_facts: s.key_facts.clone(),
                decisions: s.decisions.clone(),
                open_questions: s.open_questions.clone(),
                todos: s.todos.clone(),
                created_at: s.created_at,
            },
            message_range_summarized: s.range_summarized,
        }
    }
}

impl From<SummaryDocument> for Summary {
    fn from(doc: SummaryDocument) -> Self {
        let body = doc.session_summary;
        Summary {
            session_id: body.session_id,
            user_id: body.user_id,
            summary_index: body.summary_idx,
            user_profile: body.user_profile,
            key_facts: body.key_facts,
            decisions: body.decisions,
            open_questions: body.open_questions,
            todos: body.todos,
            range_summarized: doc.message_range_summarized,
            created_at: body.created_at,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// File sink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct FileSummarySink {
    root: PathBuf,
}

impl FileSummarySink {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// `{root}/summaries/{user_id}/{chat_id}/`
    pub fn summary_dir(&self, key: &SessionKey) -> Result<PathBuf> {
        validate_id("user_id", &key.user_id)?;
        validate_id("chat_id", &key.chat_id)?;
        Ok(self
            .root
            .join(SUMMARIES_DIR)
            .join(&key.user_id)
            .join(&key.chat_id))
    }

    pub fn summary_path(&self, key: &SessionKey, summary_index: u64) -> Result<PathBuf> {
        Ok(self
            .summary_dir(key)?
            .join(format!("{summary_index}_summary.json")))
    }
}

#[async_trait]
impl SummarySink for FileSummarySink {
    async fn persist(&self, summary: &Summary) -> Result<()> {
        let path = self.summary_path(&summary.key(), summary.summary_index)?;
        let bytes = serde_json::to_vec_pretty(&SummaryDocument::from(summary))?;
        write_atomic(path.clone(), bytes).await?;
        tracing::debug!(path = %path.display(), "summary written");
        Ok(())
    }

    async fn list(&self, key: &SessionKey) -> Result<Vec<Summary>> {
        let dir = self.summary_dir(key)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io(e)),
        };

        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with("_summary.json") {
                continue;
            }
            let Some(raw) = read_optional(entry.path()).await? else {
                continue;
            };
            match serde_json::from_str::<SummaryDocument>(&raw) {
                Ok(doc) => {
                    let summary = Summary::from(doc);
                    if summary.user_id.is_empty() || summary.user_id == key.user_id {
                        out.push(summary);
                    }
                }
                Err(e) => tracing::warn!(file = %name, error = %e, "skipping unreadable summary"),
            }
        }
        out.sort_by_key(|s| s.summary_index);
        Ok(out)
    }

    fn name(&self) -> &str {
        "file"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Other sinks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Discards summaries; they still live inside memory records.
pub struct NullSummarySink;

#[async_trait]
impl SummarySink for NullSummarySink {
    async fn persist(&self, _summary: &Summary) -> Result<()> {
        Ok(())
    }

    async fn list(&self, _key: &SessionKey) -> Result<Vec<Summary>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// Keeps summaries in a map keyed by `(window key, summary index)`.
#[derive(Default)]
pub struct InMemorySummarySink {
    summaries: RwLock<BTreeMap<(String, u64), Summary>>,
}

impl InMemorySummarySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.summaries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.read().is_empty()
    }
}

#[async_trait]
impl SummarySink for InMemorySummarySink {
    async fn persist(&self, summary: &Summary) -> Result<()> {
        self.summaries.write().insert(
            (summary.key().window_key(), summary.summary_index),
            summary.clone(),
        );
        Ok(())
    }

    async fn list(&self, key: &SessionKey) -> Result<Vec<Summary>> {
        let window_key = key.window_key();
        Ok(self
            .summaries
            .read()
            .iter()
            .filter(|((k, _), _)| *k == window_key)
            .map(|(_, s)| s.clone())
            .collect())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
