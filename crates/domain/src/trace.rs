use serde::Serialize;

/// Structured trace events emitted across all chat memory crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    StateLoaded {
        session_key: String,
        resumed: bool,
        window_len: usize,
        current_cost: u64,
        chat_log_rows: usize,
    },
    StatePersisted {
        session_key: String,
        window_len: usize,
        current_cost: u64,
    },
    TurnAppended {
        session_key: String,
        index: u64,
        cost_delta: u64,
        current_cost: u64,
        cost_budget: u64,
    },
    OverflowDetected {
        session_key: String,
        current_cost: u64,
        cost_budget: u64,
    },
    CompactionCompleted {
        session_key: String,
        summary_index: u64,
        range_from: u64,
        range_to: u64,
        turns_compacted: usize,
    },
    CompactionFailed {
        session_key: String,
        summary_index: u64,
        reason: String,
    },
    SummaryPersisted {
        session_key: String,
        summary_index: u64,
        sink: String,
    },
    MemoryIndexed {
        primary_key: String,
        digest_chars: usize,
        dimension: usize,
    },
    MemoriesRetrieved {
        session_key: String,
        requested: usize,
        returned: usize,
    },
    QueryAnalyzed {
        is_ambiguous: bool,
        rewritten: bool,
        clarifying_questions: usize,
    },
    StoreCall {
        backend: String,
        operation: String,
        status: u16,
        duration_ms: u64,
    },
    LlmRequest {
        provider: String,
        model: String,
        schema: Option<String>,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    RetryAttempt {
        operation: String,
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
        error: String,
    },
    Fallback {
        operation: String,
        reason: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "cm_event");
    }
}
