//! Conversational data model shared by the window manager, the compaction
//! engine, the store adapters and the CLI.
//!
//! Every durable record is addressed by a deterministic `::`-joined key
//! derived from a [`SessionKey`]. Re-deriving a key from the same inputs
//! always yields the same string, which is what makes store upserts
//! idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::message::Role;

/// Separator used by every composite primary key.
pub const KEY_SEPARATOR: &str = "::";

/// Longest accepted user or chat id (matches the vector store's VARCHAR cap).
pub const MAX_ID_LENGTH: usize = 512;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session identity & keys
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Identity of one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub user_id: String,
    pub chat_id: String,
}

impl SessionKey {
    /// Build a key, rejecting ids that would produce ambiguous primary keys.
    pub fn new(user_id: impl Into<String>, chat_id: impl Into<String>) -> Result<Self> {
        let user_id = user_id.into();
        let chat_id = chat_id.into();
        validate_id("user_id", &user_id)?;
        validate_id("chat_id", &chat_id)?;
        Ok(Self { user_id, chat_id })
    }

    /// Window-State table key: `user_id::chat_id`.
    pub fn window_key(&self) -> String {
        format!("{}{KEY_SEPARATOR}{}", self.user_id, self.chat_id)
    }

    /// Chat-Log table key: `user_id::chat_id::index::role`.
    pub fn chat_log_key(&self, index: u64, role: Role) -> String {
        format!(
            "{}{KEY_SEPARATOR}{}{KEY_SEPARATOR}{index}{KEY_SEPARATOR}{}",
            self.user_id,
            self.chat_id,
            role.as_str()
        )
    }

    /// Memory-Record table key: `user_id::chat_id::session_id`.
    pub fn memory_key(&self, session_id: u64) -> String {
        format!(
            "{}{KEY_SEPARATOR}{}{KEY_SEPARATOR}{session_id}",
            self.user_id, self.chat_id
        )
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{KEY_SEPARATOR}{}", self.user_id, self.chat_id)
    }
}

/// Split a memory-record key back into its parts.
pub fn parse_memory_key(key: &str) -> Result<(SessionKey, u64)> {
    let parts: Vec<&str> = key.split(KEY_SEPARATOR).collect();
    if parts.len() != 3 {
        return Err(Error::ContractViolation(format!(
            "memory key '{key}' must have exactly three '::'-separated parts"
        )));
    }
    let session_id = parts[2].parse::<u64>().map_err(|_| {
        Error::ContractViolation(format!("memory key '{key}' has a non-numeric session id"))
    })?;
    Ok((SessionKey::new(parts[0], parts[1])?, session_id))
}

/// Reject ids that cannot serve as a key part and a path segment.
/// File-backed stores rely on this to keep every id inside its root.
pub fn validate_id(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::ContractViolation(format!("{field} must not be empty")));
    }
    if value == "." || value == ".." {
        return Err(Error::ContractViolation(format!(
            "{field} must not be '.' or '..'"
        )));
    }
    if value.chars().any(|c| c == '/' || c == '\\' || c.is_control()) {
        return Err(Error::ContractViolation(format!(
            "{field} '{}' must not contain path separators or control characters",
            value.escape_debug()
        )));
    }
    if value.contains(KEY_SEPARATOR) {
        return Err(Error::ContractViolation(format!(
            "{field} '{value}' must not contain '{KEY_SEPARATOR}'"
        )));
    }
    if value.len() > MAX_ID_LENGTH {
        return Err(Error::ContractViolation(format!(
            "{field} exceeds {MAX_ID_LENGTH} bytes"
        )));
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turns
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One half of an exchange. Both halves of an exchange share `index`;
/// the chat-log key tells them apart by role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub index: u64,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn to_chat_log(&self, key: &SessionKey) -> ChatLogRecord {
        ChatLogRecord {
            primary_key: key.chat_log_key(self.index, self.role),
            user_id: key.user_id.clone(),
            chat_id: key.chat_id.clone(),
            index: self.index,
            role: self.role,
            content: self.content.clone(),
            created_at: self.created_at,
        }
    }
}

/// The user/assistant pair appended by a single turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub user: Turn,
    pub assistant: Turn,
}

impl Exchange {
    pub fn index(&self) -> u64 {
        self.user.index
    }

    pub fn chat_log(&self, key: &SessionKey) -> [ChatLogRecord; 2] {
        [self.user.to_chat_log(key), self.assistant.to_chat_log(key)]
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Window state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Live state of one conversation, overwritten in place on every persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowState {
    pub chat_id: String,
    pub user_id: String,
    /// Cost units accumulated since the last successful compaction.
    pub current_cost: u64,
    pub cost_budget: u64,
    /// Turns with index above the last compacted range, oldest first.
    pub window: Vec<Turn>,
    pub latest_summary_index: u64,
    #[serde(default)]
    pub latest_summary: Option<Summary>,
    /// Index the next exchange will receive. Survives compaction so indices
    /// are never reused.
    #[serde(default)]
    pub next_turn_index: u64,
}

impl WindowState {
    pub fn fresh(key: &SessionKey, cost_budget: u64) -> Self {
        Self {
            chat_id: key.chat_id.clone(),
            user_id: key.user_id.clone(),
            current_cost: 0,
            cost_budget,
            window: Vec::new(),
            latest_summary_index: 0,
            latest_summary: None,
            next_turn_index: 0,
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey {
            user_id: self.user_id.clone(),
            chat_id: self.chat_id.clone(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Summaries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserProfile {
    pub prefs: Vec<String>,
    pub constraints: Vec<String>,
}

/// Exactly the fields the summarizer is allowed to produce.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SummaryContent {
    pub user_profile: UserProfile,
    pub key_facts: Vec<String>,
    pub decisions: Vec<String>,
    pub open_questions: Vec<String>,
    pub todos: Vec<String>,
}

impl SummaryContent {
    /// Trim, drop blanks, dedupe (first-seen order) and cap every list.
    pub fn normalized(mut self, max_items: usize) -> Self {
        for list in [
            &mut self.user_profile.prefs,
            &mut self.user_profile.constraints,
            &mut self.key_facts,
            &mut self.decisions,
            &mut self.open_questions,
            &mut self.todos,
        ] {
            *list = dedup_capped(list.iter().map(String::as_str), max_items);
        }
        self
    }
}

/// Inclusive span of exchange indices covered by one summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRange {
    pub from: u64,
    pub to: u64,
}

impl IndexRange {
    /// True when `self` starts right after `prev` ends.
    pub fn follows(&self, prev: &IndexRange) -> bool {
        self.from == prev.to + 1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// The chat this summary belongs to.
    pub session_id: String,
    #[serde(default)]
    pub user_id: String,
    pub summary_index: u64,
    pub user_profile: UserProfile,
    pub key_facts: Vec<String>,
    pub decisions: Vec<String>,
    pub open_questions: Vec<String>,
    pub todos: Vec<String>,
    pub range_summarized: IndexRange,
    pub created_at: DateTime<Utc>,
}

impl Summary {
    pub fn from_content(
        key: &SessionKey,
        summary_index: u64,
        range: IndexRange,
        content: SummaryContent,
    ) -> Self {
        Self {
            session_id: key.chat_id.clone(),
            user_id: key.user_id.clone(),
            summary_index,
            user_profile: content.user_profile,
            key_facts: content.key_facts,
            decisions: content.decisions,
            open_questions: content.open_questions,
            todos: content.todos,
            range_summarized: range,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey {
            user_id: self.user_id.clone(),
            chat_id: self.session_id.clone(),
        }
    }

    /// Text that gets embedded for retrieval: the key facts joined into one
    /// string. Falls back to decisions and open questions, then to todos
    /// and the user profile, when the summarizer produced no facts.
    pub fn digest(&self) -> String {
        let tiers: [Vec<&String>; 3] = [
            self.key_facts.iter().collect(),
            self.decisions.iter().chain(&self.open_questions).collect(),
            self.todos
                .iter()
                .chain(&self.user_profile.prefs)
                .chain(&self.user_profile.constraints)
                .collect(),
        ];
        tiers
            .into_iter()
            .find(|tier| !tier.is_empty())
            .map(|tier| {
                tier.into_iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join("; ")
            })
            .unwrap_or_default()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Durable records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Embedded, similarity-searchable representation of one compacted window.
///
/// Store adapters normalize whatever their backend returns into this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub primary_key: String,
    pub user_id: String,
    pub chat_id: String,
    pub session_id: u64,
    pub digest_text: String,
    pub embedding: Vec<f32>,
    pub full_summary_json: String,
    /// Similarity to the query; only set on search results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl MemoryRecord {
    pub fn summary(&self) -> Result<Summary> {
        Ok(serde_json::from_str(&self.full_summary_json)?)
    }
}

/// One chat-log row: a single role's half of an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLogRecord {
    pub primary_key: String,
    pub user_id: String,
    pub chat_id: String,
    pub index: u64,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Sort chat-log rows by index, user half first.
pub fn sort_chat_log(records: &mut [ChatLogRecord]) {
    records.sort_by_key(|r| (r.index, role_rank(r.role)));
}

fn role_rank(role: Role) -> u8 {
    match role {
        Role::System => 0,
        Role::User => 1,
        Role::Assistant => 2,
    }
}

/// Trim, drop blanks, dedupe in first-seen order and keep at most `cap`.
pub fn dedup_capped<'a>(items: impl IntoIterator<Item = &'a str>, cap: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if out.len() >= cap {
            break;
        }
        let trimmed = item.trim();
        if trimmed.is_empty() || out.iter().any(|seen| seen == trimmed) {
            continue;
        }
        out.push(trimmed.to_owned());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SessionKey {
        SessionKey::new("alice", "chat-1").unwrap()
    }

    #[test]
    fn keys_are_deterministic() {
        assert_eq!(key().memory_key(3), "alice::chat-1::3");
        assert_eq!(key().memory_key(3), key().memory_key(3));
        assert_eq!(key().window_key(), "alice::chat-1");
        assert_eq!(key().chat_log_key(7, Role::Assistant), "alice::chat-1::7::assistant");
    }

    #[test]
    fn rejects_separator_in_ids() {
        let err = SessionKey::new("ali::ce", "c").unwrap_err();
        assert!(matches!(err, Error::ContractViolation(_)));
        assert!(SessionKey::new("", "c").is_err());
    }

    #[test]
    fn rejects_path_like_ids() {
        for bad in ["../escaped", "a/b", "a\\b", "..", ".", "tab\there"] {
            let err = SessionKey::new("alice", bad).unwrap_err();
            assert!(matches!(err, Error::ContractViolation(_)), "{bad:?}");
        }
        assert!(SessionKey::new("alice", "memory_records").is_ok());
        assert!(SessionKey::new("alice", "v1..2").is_ok());
    }

    #[test]
    fn memory_key_round_trips() {
        let (parsed, session) = parse_memory_key("alice::chat-1::12").unwrap();
        assert_eq!(parsed, key());
        assert_eq!(session, 12);
        assert!(parse_memory_key("alice::chat-1").is_err());
        assert!(parse_memory_key("alice::chat-1::x").is_err());
    }

    #[test]
    fn dedup_keeps_first_seen_order() {
        let out = dedup_capped(["b", " a ", "b", "", "c", "d"], 3);
        assert_eq!(out, vec!["b", "a", "c"]);
    }

    #[test]
    fn normalized_content_is_capped() {
        let content = SummaryContent {
            key_facts: (0..12).map(|i| format!("fact {i}")).collect(),
            ..Default::default()
        }
        .normalized(8);
        assert_eq!(content.key_facts.len(), 8);
    }

    #[test]
    fn digest_prefers_key_facts() {
        let mut summary = Summary::from_content(
            &key(),
            0,
            IndexRange { from: 0, to: 2 },
            SummaryContent {
                key_facts: vec!["likes rust".into(), "lives in Hanoi".into()],
                decisions: vec!["use tokio".into()],
                ..Default::default()
            },
        );
        assert_eq!(summary.digest(), "likes rust; lives in Hanoi");

        summary.key_facts.clear();
        assert_eq!(summary.digest(), "use tokio");

        summary.decisions.clear();
        summary.todos.push("book flight".into());
        assert_eq!(summary.digest(), "book flight");

        summary.todos.clear();
        assert_eq!(summary.digest(), "");
    }

    #[test]
    fn summary_content_rejects_extra_fields() {
        let raw = r#"{"user_profile":{"prefs":[],"constraints":[]},"key_facts":[],
            "decisions":[],"open_questions":[],"todos":[],"mood":"happy"}"#;
        assert!(serde_json::from_str::<SummaryContent>(raw).is_err());
    }

    #[test]
    fn chat_log_sorts_user_before_assistant() {
        let k = key();
        let now = Utc::now();
        let turn = |index, role, content: &str| Turn {
            index,
            role,
            content: content.into(),
            created_at: now,
        };
        let mut rows = vec![
            turn(1, Role::Assistant, "b").to_chat_log(&k),
            turn(0, Role::Assistant, "a").to_chat_log(&k),
            turn(1, Role::User, "q").to_chat_log(&k),
        ];
        sort_chat_log(&mut rows);
        let order: Vec<_> = rows.iter().map(|r| (r.index, r.role)).collect();
        assert_eq!(order, vec![(0, Role::Assistant), (1, Role::User), (1, Role::Assistant)]);
    }
}
