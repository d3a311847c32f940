//! Per-key session map.
//!
//! Sessions are loaded lazily on first use and then shared. Turns of one
//! session serialize on that session's own lock; different sessions never
//! wait on each other.

use std::collections::HashMap;
use std::sync::Arc;

use cm_domain::error::Result;
use cm_domain::model::SessionKey;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::engine::MemoryEngine;
use crate::session::ChatSession;

pub struct SessionRegistry {
    engine: Arc<MemoryEngine>,
    sessions: Mutex<HashMap<SessionKey, Arc<OnceCell<Arc<ChatSession>>>>>,
}

impl SessionRegistry {
    pub fn new(engine: Arc<MemoryEngine>) -> Self {
        Self {
            engine,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<MemoryEngine> {
        &self.engine
    }

    /// The live session for `key`, restoring it from the store on first
    /// access. Concurrent callers for the same key share one load. A failed
    /// load is not cached.
    pub async fn get_or_load(&self, key: &SessionKey) -> Result<Arc<ChatSession>> {
        let cell = {
            let mut sessions = self.sessions.lock();
            sessions
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let session = cell
            .get_or_try_init(|| async {
                let session = ChatSession::load(self.engine.clone(), key.clone()).await?;
                tracing::debug!(session_key = %key, "session loaded");
                Ok::<_, cm_domain::error::Error>(Arc::new(session))
            })
            .await?;
        Ok(session.clone())
    }

    /// Number of sessions loaded so far.
    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Final persist of every loaded session. Keeps going past failures and
    /// returns the first one.
    pub async fn shutdown_all(&self) -> Result<()> {
        let sessions: Vec<Arc<ChatSession>> = self
            .sessions
            .lock()
            .values()
            .filter_map(|cell| cell.get().cloned())
            .collect();

        let mut first_err = None;
        for session in sessions {
            if let Err(e) = session.shutdown().await {
                tracing::error!(session_key = %session.key(), error = %e, "final persist failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
