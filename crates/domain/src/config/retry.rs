use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retry policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bounded retry shared by generation, embedding and store writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per operation, first try included.
    #[serde(default = "d_3")]
    pub max_attempts: u32,
    #[serde(default = "d_200")]
    pub initial_delay_ms: u64,
    #[serde(default = "d_5000")]
    pub max_delay_ms: u64,
    #[serde(default = "d_2f")]
    pub multiplier: f64,
    /// Strict-schema attempts before the loose `json_object` fallback.
    #[serde(default = "d_3")]
    pub structured_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 5000,
            multiplier: 2.0,
            structured_attempts: 3,
        }
    }
}

fn d_3() -> u32 {
    3
}
fn d_200() -> u64 {
    200
}
fn d_5000() -> u64 {
    5000
}
fn d_2f() -> f64 {
    2.0
}
