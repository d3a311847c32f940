use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session identity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "d_user")]
    pub user_id: String,
    #[serde(default = "d_chat")]
    pub chat_id: String,
    /// Resume from the persisted window state when one exists. When false
    /// the session starts fresh and the next persist overwrites it.
    #[serde(default = "super::d_true")]
    pub reload: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_id: d_user(),
            chat_id: d_chat(),
            reload: true,
        }
    }
}

fn d_user() -> String {
    "default_user".into()
}
fn d_chat() -> String {
    "default_chat".into()
}
