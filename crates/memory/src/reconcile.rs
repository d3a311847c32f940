//! State Reconciler: restores a session's window from the store on start
//! and writes it back after every change.

use std::sync::Arc;

use cm_domain::error::{Error, Result};
use cm_domain::model::{ChatLogRecord, SessionKey, WindowState};
use cm_domain::retry::{retry, RetryPolicy};
use cm_domain::trace::TraceEvent;
use cm_store::MemoryStore;

use crate::window::ContextWindow;

pub struct StateReconciler {
    store: Arc<dyn MemoryStore>,
    cost_budget: u64,
    reload: bool,
    write_policy: RetryPolicy,
}

impl StateReconciler {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        cost_budget: u64,
        reload: bool,
        write_policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            cost_budget,
            reload,
            write_policy,
        }
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    /// The persisted window for `key`, or a fresh one when none exists (or
    /// reload is off). Idempotent: loading twice without writes in between
    /// gives equal states.
    ///
    /// The configured budget always wins over the persisted one. A store
    /// read failure is returned, never papered over with a fresh window.
    pub async fn load(&self, key: &SessionKey) -> Result<ContextWindow> {
        let (state, resumed) = if self.reload {
            match self.store.get_window_state(key).await? {
                Some(persisted) => (self.merge(key, persisted)?, true),
                None => (WindowState::fresh(key, self.cost_budget), false),
            }
        } else {
            (self.fresh_above_history(key).await?, false)
        };

        TraceEvent::StateLoaded {
            session_key: key.to_string(),
            resumed,
            window_len: state.window.len(),
            current_cost: state.current_cost,
            chat_log_rows: 0,
        }
        .emit();

        Ok(ContextWindow::new(state))
    }

    /// [`load`](Self::load) plus the chat log. The log is informational;
    /// failing to read it is logged and yields an empty log.
    pub async fn load_with_log(
        &self,
        key: &SessionKey,
    ) -> Result<(ContextWindow, Vec<ChatLogRecord>)> {
        let window = self.load(key).await?;
        let log = if self.reload {
            self.store.read_chat_log(key).await.unwrap_or_else(|e| {
                tracing::warn!(session_key = %key, error = %e, "chat log unavailable");
                Vec::new()
            })
        } else {
            Vec::new()
        };
        tracing::debug!(session_key = %key, rows = log.len(), "chat log loaded");
        Ok((window, log))
    }

    /// Write the full state back under bounded retry.
    pub async fn persist(&self, state: &WindowState) -> Result<()> {
        retry(&self.write_policy, "persist_window", Error::is_transient, |_| {
            self.store.put_window_state(state)
        })
        .await?;

        TraceEvent::StatePersisted {
            session_key: state.key().to_string(),
            window_len: state.window.len(),
            current_cost: state.current_cost,
        }
        .emit();
        Ok(())
    }

    /// An empty window whose counters start past everything already durable
    /// for `key`, so a fresh start appends to the chat log and adds new
    /// summaries instead of overwriting old ones.
    async fn fresh_above_history(&self, key: &SessionKey) -> Result<WindowState> {
        let mut state = WindowState::fresh(key, self.cost_budget);
        if let Some(persisted) = self.store.get_window_state(key).await? {
            let persisted = self.merge(key, persisted)?;
            state.next_turn_index = persisted.next_turn_index;
            state.latest_summary_index = persisted.latest_summary_index;
        }

        let log = self.store.read_chat_log(key).await?;
        if let Some(after_log) = log.iter().map(|r| r.index + 1).max() {
            state.next_turn_index = state.next_turn_index.max(after_log);
        }
        let memories = self.store.list_memories(key).await?;
        if let Some(last) = memories.iter().map(|m| m.session_id).max() {
            state.latest_summary_index = state.latest_summary_index.max(last);
        }

        if state.next_turn_index > 0 || state.latest_summary_index > 0 {
            tracing::info!(
                session_key = %key,
                next_turn_index = state.next_turn_index,
                latest_summary_index = state.latest_summary_index,
                "starting fresh above existing history"
            );
        }
        Ok(state)
    }

    /// Carry the persisted fields into a state that uses the configured
    /// budget. Documents written before `next_turn_index` existed get it
    /// derived from the window and the last compacted range.
    fn merge(&self, key: &SessionKey, persisted: WindowState) -> Result<WindowState> {
        if persisted.user_id != key.user_id || persisted.chat_id != key.chat_id {
            return Err(Error::ContractViolation(format!(
                "stored window {}::{} does not belong to {key}",
                persisted.user_id, persisted.chat_id
            )));
        }

        let after_window = persisted.window.iter().map(|t| t.index + 1).max();
        let after_summary = persisted
            .latest_summary
            .as_ref()
            .map(|s| s.range_summarized.to + 1);
        let derived = after_window.into_iter().chain(after_summary).max().unwrap_or(0);

        if persisted.cost_budget != self.cost_budget {
            tracing::info!(
                session_key = %key,
                stored = persisted.cost_budget,
                configured = self.cost_budget,
                "cost budget changed since last run"
            );
        }

        Ok(WindowState {
            cost_budget: self.cost_budget,
            next_turn_index: persisted.next_turn_index.max(derived),
            ..persisted
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cm_domain::message::Role;
    use cm_domain::model::{MemoryRecord, Turn};
    use cm_store::InMemoryStore;

    fn reconciler(store: Arc<dyn MemoryStore>, budget: u64) -> StateReconciler {
        StateReconciler::new(store, budget, true, RetryPolicy::once())
    }

    #[tokio::test]
    async fn missing_state_is_fresh() {
        let store: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new());
        let key = SessionKey::new("alice", "c1").unwrap();
        let window = reconciler(store, 100).load(&key).await.unwrap();
        assert_eq!(window.state(), &WindowState::fresh(&key, 100));
    }

    #[tokio::test]
    async fn load_is_idempotent() {
        let store: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new());
        let key = SessionKey::new("alice", "c1").unwrap();
        let rec = reconciler(store, 100);

        let mut window = rec.load(&key).await.unwrap();
        window.append_turn("hi", "hello", 10).unwrap();
        rec.persist(window.state()).await.unwrap();

        let a = rec.load(&key).await.unwrap();
        let b = rec.load(&key).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.state().current_cost, 10);
        assert_eq!(a.state().next_turn_index, 1);
    }

    #[tokio::test]
    async fn configured_budget_wins() {
        let store: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new());
        let key = SessionKey::new("alice", "c1").unwrap();
        reconciler(store.clone(), 100)
            .persist(&WindowState::fresh(&key, 100))
            .await
            .unwrap();
        let window = reconciler(store, 500).load(&key).await.unwrap();
        assert_eq!(window.state().cost_budget, 500);
    }

    #[tokio::test]
    async fn legacy_document_derives_next_index() {
        let store: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new());
        let key = SessionKey::new("alice", "c1").unwrap();
        let mut window = ContextWindow::fresh(&key, 100);
        window.append_turn("a", "b", 1).unwrap();
        window.append_turn("c", "d", 1).unwrap();
        let mut legacy = window.into_state();
        legacy.next_turn_index = 0;
        store.put_window_state(&legacy).await.unwrap();

        let loaded = reconciler(store, 100).load(&key).await.unwrap();
        assert_eq!(loaded.state().next_turn_index, 2);
    }

    #[tokio::test]
    async fn reload_disabled_starts_fresh() {
        let store: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new());
        let key = SessionKey::new("alice", "c1").unwrap();
        let mut state = WindowState::fresh(&key, 100);
        state.current_cost = 42;
        store.put_window_state(&state).await.unwrap();

        let rec = StateReconciler::new(store, 100, false, RetryPolicy::once());
        let window = rec.load(&key).await.unwrap();
        assert_eq!(window.state().current_cost, 0);
    }

    #[tokio::test]
    async fn fresh_start_counts_past_durable_history() {
        let store: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new());
        let key = SessionKey::new("alice", "c1").unwrap();

        let mut window = ContextWindow::fresh(&key, 100);
        window.append_turn("a", "b", 1).unwrap();
        let mut state = window.into_state();
        state.latest_summary_index = 1;
        store.put_window_state(&state).await.unwrap();

        // The log runs ahead of the window when a window write was lost.
        let late = Turn {
            index: 4,
            role: Role::User,
            content: "late".into(),
            created_at: chrono::Utc::now(),
        };
        store.append_chat_log(&[late.to_chat_log(&key)]).await.unwrap();
        store
            .upsert_memory(&MemoryRecord {
                primary_key: key.memory_key(2),
                user_id: key.user_id.clone(),
                chat_id: key.chat_id.clone(),
                session_id: 2,
                digest_text: "fact".into(),
                embedding: vec![1.0],
                full_summary_json: "{}".into(),
                score: None,
            })
            .await
            .unwrap();

        let rec = StateReconciler::new(store, 100, false, RetryPolicy::once());
        let fresh = rec.load(&key).await.unwrap();
        assert!(fresh.state().window.is_empty());
        assert_eq!(fresh.state().current_cost, 0);
        assert_eq!(fresh.state().next_turn_index, 5);
        assert_eq!(fresh.state().latest_summary_index, 2);
    }
}
