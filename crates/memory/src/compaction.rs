//! Compaction Engine: overflowed window → structured summary → durable
//! summary artifact → embedded memory record.
//!
//! Nothing here touches the live window. The session stages the reset and
//! commits it only after every step below has succeeded.

use std::sync::Arc;

use cm_domain::config::CompactionConfig;
use cm_domain::error::{Error, Result};
use cm_domain::message::Message;
use cm_domain::model::{IndexRange, MemoryRecord, SessionKey, Summary, SummaryContent, Turn};
use cm_domain::retry::{retry, RetryPolicy};
use cm_domain::trace::TraceEvent;
use cm_providers::structured::GenerationParams;
use cm_providers::{Embedder, SchemaSpec, StructuredClient};
use cm_store::{MemoryStore, SummarySink};

use crate::prompts;

pub struct Compactor {
    client: Arc<StructuredClient>,
    embedder: Arc<dyn Embedder>,
    sink: Arc<dyn SummarySink>,
    store: Arc<dyn MemoryStore>,
    cfg: CompactionConfig,
    write_policy: RetryPolicy,
}

impl Compactor {
    pub fn new(
        client: Arc<StructuredClient>,
        embedder: Arc<dyn Embedder>,
        sink: Arc<dyn SummarySink>,
        store: Arc<dyn MemoryStore>,
        cfg: CompactionConfig,
        write_policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            embedder,
            sink,
            store,
            cfg,
            write_policy,
        }
    }

    /// Summarize `window` into summary number `summary_index`.
    ///
    /// `range_summarized` spans the first to the last turn index. Fails with
    /// [`Error::Compaction`] on an empty window or when structured
    /// generation gives up.
    pub async fn compact(
        &self,
        key: &SessionKey,
        window: &[Turn],
        summary_index: u64,
    ) -> Result<Summary> {
        let (Some(first), Some(last)) = (window.first(), window.last()) else {
            return Err(Error::Compaction(format!(
                "nothing to summarize for {key}: window is empty"
            )));
        };
        let range = IndexRange {
            from: first.index,
            to: last.index,
        };

        let messages = vec![
            Message::system(prompts::SUMMARIZER_SYSTEM),
            Message::user(prompts::summarization(
                window,
                self.cfg.max_message_chars,
                self.cfg.max_items_per_field,
            )),
        ];
        let params = GenerationParams {
            temperature: Some(self.cfg.temperature),
            max_tokens: Some(self.cfg.max_tokens),
        };

        let content = self
            .client
            .generate_structured::<SummaryContent>(messages, &SchemaSpec::session_summary(), params)
            .await
            .map_err(|e| match e {
                Error::ContractViolation(_) => e,
                other => Error::Compaction(format!("summary generation failed: {other}")),
            })?
            .value
            .normalized(self.cfg.max_items_per_field);

        Ok(Summary::from_content(key, summary_index, range, content))
    }

    /// Write the summary to the configured sink under
    /// `(session, summary_index)`; repeated calls overwrite.
    pub async fn persist(&self, summary: &Summary) -> Result<()> {
        retry(&self.write_policy, "persist_summary", Error::is_transient, |_| {
            self.sink.persist(summary)
        })
        .await?;

        TraceEvent::SummaryPersisted {
            session_key: summary.key().to_string(),
            summary_index: summary.summary_index,
            sink: self.sink.name().to_owned(),
        }
        .emit();
        Ok(())
    }

    /// Embed the digest and build the record keyed
    /// `user_id::chat_id::summary_index`. Does not write it.
    pub async fn index_for_retrieval(&self, summary: &Summary) -> Result<MemoryRecord> {
        let key = summary.key();
        let mut digest_text = summary.digest();
        if digest_text.is_empty() {
            digest_text = format!(
                "conversation turns {}-{}",
                summary.range_summarized.from, summary.range_summarized.to
            );
        }
        let embedding = self.embedder.embed(&digest_text).await?;
        cm_providers::embedder::check_dimension(&embedding, self.embedder.dimension())?;

        Ok(MemoryRecord {
            primary_key: key.memory_key(summary.summary_index),
            user_id: key.user_id.clone(),
            chat_id: key.chat_id.clone(),
            session_id: summary.summary_index,
            digest_text,
            embedding,
            full_summary_json: serde_json::to_string(summary)?,
            score: None,
        })
    }

    /// Upsert the record into the store under bounded retry.
    pub async fn store_record(&self, record: &MemoryRecord) -> Result<()> {
        retry(&self.write_policy, "upsert_memory", Error::is_transient, |_| {
            self.store.upsert_memory(record)
        })
        .await?;

        TraceEvent::MemoryIndexed {
            primary_key: record.primary_key.clone(),
            digest_chars: record.digest_text.chars().count(),
            dimension: record.embedding.len(),
        }
        .emit();
        Ok(())
    }

    /// compact → persist → index → store. Returns the summary once every
    /// artifact is durable.
    pub async fn run(
        &self,
        key: &SessionKey,
        window: &[Turn],
        summary_index: u64,
    ) -> Result<(Summary, MemoryRecord)> {
        let summary = self.compact(key, window, summary_index).await?;
        self.persist(&summary).await?;
        let record = self.index_for_retrieval(&summary).await?;
        self.store_record(&record).await?;
        Ok((summary, record))
    }
}
