use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context window
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Budget for the live window. Cost is measured in generation tokens as
/// reported by the provider (estimated from text length when absent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Compaction triggers once accumulated cost exceeds this.
    #[serde(default = "d_2048")]
    pub cost_budget: u64,
    /// Add the query-rewrite call's tokens to the turn's cost.
    #[serde(default = "super::d_true")]
    pub count_rewrite_cost: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            cost_budget: 2048,
            count_rewrite_cost: true,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Compaction turns an overflowed window into a structured summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Compact automatically when the window overflows its budget.
    #[serde(default = "super::d_true")]
    pub auto: bool,
    /// Cap on every summary list (prefs, facts, todos, ...).
    #[serde(default = "d_8")]
    pub max_items_per_field: usize,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    #[serde(default = "d_1024")]
    pub max_tokens: u32,
    /// Per-message character cap inside the summarization prompt.
    #[serde(default = "d_2000")]
    pub max_message_chars: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            auto: true,
            max_items_per_field: 8,
            temperature: d_temperature(),
            max_tokens: 1024,
            max_message_chars: 2000,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_2048() -> u64 {
    2048
}
fn d_8() -> usize {
    8
}
fn d_temperature() -> f32 {
    0.1
}
fn d_1024() -> u32 {
    1024
}
fn d_2000() -> usize {
    2000
}
