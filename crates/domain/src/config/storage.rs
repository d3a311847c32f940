use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Durable storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Root for window-state documents, chat logs and summary files.
    #[serde(default = "d_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub summary_sink: SummarySinkKind,
    #[serde(default)]
    pub milvus: MilvusConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            path: d_path(),
            summary_sink: SummarySinkKind::File,
            milvus: MilvusConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// JSON documents under `path` (standalone/offline mode).
    #[default]
    File,
    /// Process-local maps; nothing survives a restart.
    Memory,
    /// Memory records in Milvus; window state and chat logs under `path`.
    Milvus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SummarySinkKind {
    /// `{path}/summaries/{user_id}/{chat_id}/{summary_index}_summary.json`.
    #[default]
    File,
    /// Summaries only live inside memory records.
    None,
}

/// Milvus REST (v2) connection and index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilvusConfig {
    #[serde(default = "d_uri")]
    pub uri: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "d_db")]
    pub db_name: String,
    #[serde(default = "d_collection")]
    pub collection_name: String,
    #[serde(default = "d_metric")]
    pub metric_type: String,
    #[serde(default = "d_index")]
    pub index_type: String,
    #[serde(default = "d_128")]
    pub nlist: u32,
    #[serde(default = "d_16")]
    pub nprobe: u32,
    #[serde(default = "d_8000")]
    pub timeout_ms: u64,
}

impl Default for MilvusConfig {
    fn default() -> Self {
        Self {
            uri: d_uri(),
            token: None,
            db_name: d_db(),
            collection_name: d_collection(),
            metric_type: d_metric(),
            index_type: d_index(),
            nlist: 128,
            nprobe: 16,
            timeout_ms: 8000,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_path() -> PathBuf {
    PathBuf::from("chat_history")
}
fn d_uri() -> String {
    "http://localhost:19530".into()
}
fn d_db() -> String {
    "chat_memory".into()
}
fn d_collection() -> String {
    "memory_records".into()
}
fn d_metric() -> String {
    "COSINE".into()
}
fn d_index() -> String {
    "IVF_FLAT".into()
}
fn d_128() -> u32 {
    128
}
fn d_16() -> u32 {
    16
}
fn d_8000() -> u64 {
    8000
}
