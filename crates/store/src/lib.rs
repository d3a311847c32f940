//! Memory Store port and its adapters.
//!
//! Three logical tables share one trait: window state (by
//! `user_id::chat_id`), chat log (by `user_id::chat_id::index::role`) and
//! memory records (by `user_id::chat_id::session_id`, searchable by
//! embedding). Upserts by primary key are idempotent on every backend.

pub mod file;
pub mod fsutil;
pub mod memory;
pub mod milvus;
pub mod summary_sink;
pub mod traits;

use std::sync::Arc;

use cm_domain::config::{Config, StorageBackend, SummarySinkKind};
use cm_domain::error::Result;

pub use file::FileStore;
pub use memory::InMemoryStore;
pub use milvus::MilvusStore;
pub use summary_sink::{FileSummarySink, InMemorySummarySink, NullSummarySink, SummarySink};
pub use traits::{MemoryFilter, MemoryStore};

/// Build the store selected by `[storage].backend`.
pub async fn create_store(config: &Config) -> Result<Arc<dyn MemoryStore>> {
    let storage = &config.storage;
    match storage.backend {
        StorageBackend::Memory => Ok(Arc::new(InMemoryStore::new())),
        StorageBackend::File => Ok(Arc::new(FileStore::open(&storage.path).await?)),
        StorageBackend::Milvus => {
            let local = FileStore::open(&storage.path).await?;
            let store = MilvusStore::new(
                &storage.milvus,
                config.embedding.dimension,
                &config.retry,
                local,
            )?;
            Ok(Arc::new(store))
        }
    }
}

/// Build the summary sink selected by `[storage].summary_sink`.
pub fn create_summary_sink(config: &Config) -> Arc<dyn SummarySink> {
    match config.storage.summary_sink {
        SummarySinkKind::File => Arc::new(FileSummarySink::new(&config.storage.path)),
        SummarySinkKind::None => Arc::new(NullSummarySink),
    }
}
