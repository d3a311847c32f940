//! One conversation's turn loop.
//!
//! A turn holds the session lock from start to finish: flush whatever the
//! previous turn could not write, analyze and augment the query, answer
//! it, append the exchange, persist, and compact on overflow. Sessions are
//! independent of each other; only the store is shared.

use std::sync::Arc;

use cm_domain::error::{Error, Result};
use cm_domain::message::Usage;
use cm_domain::model::{ChatLogRecord, Exchange, IndexRange, SessionKey, Summary, Turn, WindowState};
use cm_domain::retry::{retry, RetryPolicy};
use cm_domain::trace::TraceEvent;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::augment::QueryAnalysis;
use crate::engine::MemoryEngine;
use crate::window::ContextWindow;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcomes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompactionStatus {
    /// The window is within budget.
    NotNeeded,
    /// Over budget but `compaction.auto` is off.
    Disabled,
    /// Over budget, but earlier writes are still pending; retried next turn.
    Deferred,
    Completed {
        summary_index: u64,
        range: IndexRange,
    },
    /// State is unchanged; the next overflow check tries again.
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub index: u64,
    pub response: String,
    pub analysis: QueryAnalysis,
    pub memories_used: usize,
    pub usage: Usage,
    pub cost_delta: u64,
    pub current_cost: u64,
    pub cost_budget: u64,
    /// Writes that failed and wait in the outbox.
    pub pending_writes: usize,
    pub compaction: CompactionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub session_key: String,
    pub current_cost: u64,
    pub cost_budget: u64,
    pub window_len: usize,
    pub next_turn_index: u64,
    pub latest_summary_index: u64,
    pub pending_writes: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Writes that exhausted their retries and must land before the window
/// may be compacted.
#[derive(Debug, Default)]
struct Outbox {
    window_dirty: bool,
    chat_log: Vec<ChatLogRecord>,
}

impl Outbox {
    fn len(&self) -> usize {
        usize::from(self.window_dirty) + self.chat_log.len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Inner {
    window: ContextWindow,
    outbox: Outbox,
}

pub struct ChatSession {
    key: SessionKey,
    engine: Arc<MemoryEngine>,
    inner: Mutex<Inner>,
}

impl ChatSession {
    /// Restore the session through the state reconciler.
    pub async fn load(engine: Arc<MemoryEngine>, key: SessionKey) -> Result<Self> {
        let window = engine.reconciler().load(&key).await?;
        Ok(Self::with_window(engine, window))
    }

    /// Start from `window` without touching the store.
    pub fn with_window(engine: Arc<MemoryEngine>, window: ContextWindow) -> Self {
        Self {
            key: window.key(),
            engine,
            inner: Mutex::new(Inner {
                window,
                outbox: Outbox::default(),
            }),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Run one full turn for `query`.
    ///
    /// Fails (with the window untouched) when the answer cannot be
    /// generated. Persistence and compaction failures do not fail the turn:
    /// they are reported in the outcome and retried later.
    pub async fn run_turn(&self, query: &str) -> Result<TurnOutcome> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::ContractViolation("empty query".into()));
        }

        let mut inner = self.inner.lock().await;
        let engine = &self.engine;
        let config = engine.config();

        self.flush_outbox(&mut inner).await;

        let analysis = engine.augmenter().analyze(query).await;
        let retrieved = engine
            .augmenter()
            .retrieve_for(&self.key, &analysis.rewritten_query)
            .await;
        let context = engine
            .augmenter()
            .augment(inner.window.tail(config.retrieval.recent_messages), &retrieved);

        let answer = engine
            .client()
            .generate_messages(context.to_messages(&config.llm.system_prompt, &analysis.rewritten_query))
            .await?;

        let mut cost_delta = u64::from(answer.usage.total_tokens);
        if config.window.count_rewrite_cost {
            cost_delta += u64::from(analysis.rewrite_usage.total_tokens);
        }
        let exchange = inner.window.append_turn(
            query,
            &answer.content,
            i64::try_from(cost_delta).unwrap_or(i64::MAX),
        )?;

        self.persist_exchange(&mut inner, &exchange).await;

        let compaction = if inner.window.is_overflowing() {
            let state = inner.window.state();
            TraceEvent::OverflowDetected {
                session_key: self.key.to_string(),
                current_cost: state.current_cost,
                cost_budget: state.cost_budget,
            }
            .emit();

            if !config.compaction.auto {
                CompactionStatus::Disabled
            } else if !inner.outbox.is_empty() {
                tracing::warn!(
                    session_key = %self.key,
                    pending = inner.outbox.len(),
                    "deferring compaction until pending writes land"
                );
                CompactionStatus::Deferred
            } else {
                self.compact_locked(&mut inner).await
            }
        } else {
            CompactionStatus::NotNeeded
        };

        let state = inner.window.state();
        Ok(TurnOutcome {
            index: exchange.index(),
            response: answer.content,
            analysis,
            memories_used: context.retrieved_memories.len(),
            usage: answer.usage,
            cost_delta,
            current_cost: state.current_cost,
            cost_budget: state.cost_budget,
            pending_writes: inner.outbox.len(),
            compaction,
        })
    }

    /// Compact the current window regardless of budget. An empty window is
    /// reported as [`CompactionStatus::NotNeeded`].
    pub async fn compact_now(&self) -> CompactionStatus {
        let mut inner = self.inner.lock().await;
        if inner.window.turns().is_empty() {
            return CompactionStatus::NotNeeded;
        }
        self.flush_outbox(&mut inner).await;
        if !inner.outbox.is_empty() {
            return CompactionStatus::Deferred;
        }
        self.compact_locked(&mut inner).await
    }

    pub async fn status(&self) -> SessionStatus {
        let inner = self.inner.lock().await;
        let state = inner.window.state();
        SessionStatus {
            session_key: self.key.to_string(),
            current_cost: state.current_cost,
            cost_budget: state.cost_budget,
            window_len: state.window.len(),
            next_turn_index: state.next_turn_index,
            latest_summary_index: state.latest_summary_index,
            pending_writes: inner.outbox.len(),
        }
    }

    /// Snapshot of the live window.
    pub async fn window(&self) -> Vec<Turn> {
        self.inner.lock().await.window.turns().to_vec()
    }

    pub async fn state(&self) -> WindowState {
        self.inner.lock().await.window.state().clone()
    }

    /// Full chat log from the store, compacted turns included.
    pub async fn history(&self) -> Result<Vec<ChatLogRecord>> {
        self.engine.store().read_chat_log(&self.key).await
    }

    /// Final flush and persist. Returns the error if the window could not
    /// be made durable.
    pub async fn shutdown(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.flush_outbox(&mut inner).await;
        if !inner.outbox.chat_log.is_empty() {
            tracing::warn!(
                session_key = %self.key,
                rows = inner.outbox.chat_log.len(),
                "chat log rows still pending at shutdown"
            );
        }
        self.engine.reconciler().persist(inner.window.state()).await?;
        inner.outbox.window_dirty = false;
        tracing::info!(session_key = %self.key, "session closed");
        Ok(())
    }

    // ── internals ────────────────────────────────────────────────────

    /// Window state and both chat-log halves are written concurrently;
    /// whatever still fails goes to the outbox.
    async fn persist_exchange(&self, inner: &mut Inner, exchange: &Exchange) {
        let reconciler = self.engine.reconciler();
        let rows = exchange.chat_log(&self.key);
        let (window_res, log_res) = tokio::join!(
            reconciler.persist(inner.window.state()),
            self.append_chat_log(&rows),
        );

        if let Err(e) = window_res {
            tracing::warn!(session_key = %self.key, error = %e, "window persist failed, queued");
            inner.outbox.window_dirty = true;
        }
        if let Err(e) = log_res {
            tracing::warn!(session_key = %self.key, error = %e, "chat log write failed, queued");
            inner.outbox.chat_log.extend(rows);
        }
    }

    async fn append_chat_log(&self, rows: &[ChatLogRecord]) -> Result<()> {
        let store = self.engine.store();
        retry(
            &RetryPolicy::from_config(&self.engine.config().retry),
            "append_chat_log",
            Error::is_transient,
            |_| store.append_chat_log(rows),
        )
        .await
    }

    async fn flush_outbox(&self, inner: &mut Inner) {
        if inner.outbox.is_empty() {
            return;
        }
        if !inner.outbox.chat_log.is_empty() {
            let rows = std::mem::take(&mut inner.outbox.chat_log);
            if let Err(e) = self.append_chat_log(&rows).await {
                tracing::warn!(session_key = %self.key, error = %e, "pending chat log still not written");
                inner.outbox.chat_log = rows;
            }
        }
        if inner.outbox.window_dirty {
            match self.engine.reconciler().persist(inner.window.state()).await {
                Ok(()) => inner.outbox.window_dirty = false,
                Err(e) => {
                    tracing::warn!(session_key = %self.key, error = %e, "pending window still not written");
                }
            }
        }
    }

    /// Compact a staged copy of the window; commit the reset only once the
    /// summary, the memory record and the reset state are all durable.
    async fn compact_locked(&self, inner: &mut Inner) -> CompactionStatus {
        let summary_index = inner.window.next_summary_index();
        match self.stage_compaction(&inner.window, summary_index).await {
            Ok((staged, summary, turns_compacted)) => {
                let range = summary.range_summarized;
                inner.window = staged;
                TraceEvent::CompactionCompleted {
                    session_key: self.key.to_string(),
                    summary_index,
                    range_from: range.from,
                    range_to: range.to,
                    turns_compacted,
                }
                .emit();
                CompactionStatus::Completed {
                    summary_index,
                    range,
                }
            }
            Err(e) => {
                TraceEvent::CompactionFailed {
                    session_key: self.key.to_string(),
                    summary_index,
                    reason: e.to_string(),
                }
                .emit();
                tracing::warn!(session_key = %self.key, error = %e, "compaction failed, window kept");
                CompactionStatus::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn stage_compaction(
        &self,
        window: &ContextWindow,
        summary_index: u64,
    ) -> Result<(ContextWindow, Summary, usize)> {
        let turns = window.turns();
        let (summary, _record) = self
            .engine
            .compactor()
            .run(&self.key, turns, summary_index)
            .await?;

        let mut staged = window.clone();
        staged.reset_after_compaction(summary.clone())?;
        self.engine.reconciler().persist(staged.state()).await?;
        Ok((staged, summary, turns.len()))
    }
}
