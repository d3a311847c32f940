//! Query Augmentation Engine.
//!
//! `analyze` decides whether the query needs rewriting (and, if the rewrite
//! is still unclear, which questions to ask). `retrieve` pulls the nearest
//! memory records. `augment` is pure: it merges the window tail with the
//! retrieved summaries into the single context object the answer is
//! generated from.

use std::sync::Arc;

use cm_domain::config::{RetrievalConfig, MAX_INJECTED_MEMORIES};
use cm_domain::error::Result;
use cm_domain::message::{Message, Usage};
use cm_domain::model::{dedup_capped, MemoryRecord, SessionKey, Summary, Turn};
use cm_domain::trace::TraceEvent;
use cm_providers::structured::{GenerationParams, Structured};
use cm_providers::{Embedder, SchemaSpec, StructuredClient};
use cm_store::{MemoryFilter, MemoryStore};
use serde::{Deserialize, Serialize};

use crate::prompts;
use crate::truncation::truncate_chars;

/// Most clarifying questions ever returned.
pub const MAX_CLARIFYING_QUESTIONS: usize = 3;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    Scope,
    Constraints,
    Context,
    Goal,
    Format,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarifyingQuestion {
    pub question: String,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryAnalysis {
    pub original_query: String,
    pub is_ambiguous: bool,
    /// Equals `original_query` unless a rewrite happened.
    pub rewritten_query: String,
    pub clarifying_questions: Vec<ClarifyingQuestion>,
    /// Tokens spent on the rewrite call (zero when none was made).
    pub rewrite_usage: Usage,
}

impl QueryAnalysis {
    /// Analysis for a query that is taken as-is.
    pub fn passthrough(query: &str) -> Self {
        Self {
            original_query: query.to_owned(),
            is_ambiguous: false,
            rewritten_query: query.to_owned(),
            clarifying_questions: Vec::new(),
            rewrite_usage: Usage::default(),
        }
    }

    pub fn was_rewritten(&self) -> bool {
        self.rewritten_query != self.original_query
    }
}

/// Everything the answer is generated from, in structured and rendered
/// form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AugmentedContext {
    pub recent_messages: Vec<Message>,
    pub retrieved_memories: Vec<MemoryRecord>,
    pub prefs: Vec<String>,
    pub constraints: Vec<String>,
    pub open_questions: Vec<String>,
    pub text: String,
}

impl AugmentedContext {
    /// Messages for the answer call: system prompt plus rendered memory,
    /// the recent conversation, then the query.
    pub fn to_messages(&self, system_prompt: &str, query: &str) -> Vec<Message> {
        let mut system = system_prompt.to_owned();
        let memory = render_memory(
            &self.prefs,
            &self.constraints,
            &self.open_questions,
            &self.retrieved_memories,
        );
        if !memory.is_empty() {
            system.push_str("\n\nWhat you remember about this user:\n");
            system.push_str(&memory);
        }
        let mut messages = Vec::with_capacity(self.recent_messages.len() + 2);
        messages.push(Message::system(system));
        messages.extend(self.recent_messages.iter().cloned());
        messages.push(Message::user(query));
        messages
    }
}

#[derive(Deserialize)]
struct AmbiguityVerdict {
    is_ambiguous: bool,
}

#[derive(Deserialize)]
struct RewrittenQuery {
    rewritten_query: String,
}

#[derive(Deserialize)]
struct QuestionList {
    questions: Vec<ClarifyingQuestion>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct QueryAugmenter {
    client: Arc<StructuredClient>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn MemoryStore>,
    cfg: RetrievalConfig,
}

impl QueryAugmenter {
    pub fn new(
        client: Arc<StructuredClient>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn MemoryStore>,
        cfg: RetrievalConfig,
    ) -> Self {
        Self {
            client,
            embedder,
            store,
            cfg,
        }
    }

    fn classifier_params() -> GenerationParams {
        GenerationParams {
            temperature: Some(0.0),
            max_tokens: Some(64),
        }
    }

    /// One boolean judgment against the `ambiguous_bool` schema.
    pub async fn classify_ambiguous(&self, query: &str) -> Result<bool> {
        let verdict: Structured<AmbiguityVerdict> = self
            .client
            .generate_structured(
                vec![
                    Message::system(prompts::CLASSIFIER_SYSTEM),
                    Message::user(prompts::ambiguity(query)),
                ],
                &SchemaSpec::ambiguous_bool(),
                Self::classifier_params(),
            )
            .await?;
        Ok(verdict.value.is_ambiguous)
    }

    /// A clarified version of `query`, with the usage of the call.
    pub async fn rewrite(&self, query: &str) -> Result<Structured<String>> {
        let out: Structured<RewrittenQuery> = self
            .client
            .generate_structured(
                vec![
                    Message::system(prompts::REWRITER_SYSTEM),
                    Message::user(prompts::rewrite(query)),
                ],
                &SchemaSpec::rewritten_query(),
                GenerationParams {
                    temperature: Some(0.2),
                    max_tokens: Some(256),
                },
            )
            .await?;
        let text = out.value.rewritten_query.trim();
        Ok(Structured {
            value: if text.is_empty() {
                query.to_owned()
            } else {
                text.to_owned()
            },
            usage: out.usage,
        })
    }

    /// Up to three questions that would disambiguate `query`.
    pub async fn clarifying_questions(&self, query: &str) -> Result<Vec<ClarifyingQuestion>> {
        let out: Structured<QuestionList> = self
            .client
            .generate_structured(
                vec![
                    Message::system(prompts::CLARIFIER_SYSTEM),
                    Message::user(prompts::clarifying_questions(query)),
                ],
                &SchemaSpec::clarifying_questions(),
                GenerationParams {
                    temperature: Some(0.2),
                    max_tokens: Some(256),
                },
            )
            .await?;
        let mut questions: Vec<ClarifyingQuestion> = out
            .value
            .questions
            .into_iter()
            .filter(|q| !q.question.trim().is_empty())
            .collect();
        questions.truncate(MAX_CLARIFYING_QUESTIONS);
        Ok(questions)
    }

    /// Classify, rewrite when ambiguous, and re-classify the rewrite to
    /// decide on clarifying questions. Never fails: a failed
    /// classification means "unambiguous", a failed rewrite keeps the
    /// original query, failed questions are an empty list.
    pub async fn analyze(&self, query: &str) -> QueryAnalysis {
        let mut analysis = QueryAnalysis::passthrough(query);
        if !self.cfg.rewrite_queries {
            return analysis;
        }

        analysis.is_ambiguous = match self.classify_ambiguous(query).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "ambiguity classification failed, treating as unambiguous");
                false
            }
        };

        if analysis.is_ambiguous {
            match self.rewrite(query).await {
                Ok(out) => {
                    analysis.rewritten_query = out.value;
                    analysis.rewrite_usage = out.usage;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "query rewrite failed, keeping original");
                }
            }
        }

        if analysis.is_ambiguous && self.cfg.clarifying_questions {
            let still_ambiguous = match self.classify_ambiguous(&analysis.rewritten_query).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, "re-classification failed, skipping questions");
                    false
                }
            };
            if still_ambiguous {
                analysis.clarifying_questions = self
                    .clarifying_questions(&analysis.rewritten_query)
                    .await
                    .unwrap_or_else(|e| {
                        tracing::warn!(error = %e, "clarifying questions failed");
                        Vec::new()
                    });
            }
        }

        TraceEvent::QueryAnalyzed {
            is_ambiguous: analysis.is_ambiguous,
            rewritten: analysis.was_rewritten(),
            clarifying_questions: analysis.clarifying_questions.len(),
        }
        .emit();

        analysis
    }

    /// Vector-similarity query against the store. An empty store is an
    /// empty result, not an error.
    pub async fn retrieve(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: &MemoryFilter,
    ) -> Result<Vec<MemoryRecord>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        self.store.search_memories(embedding, top_k, filter).await
    }

    /// Embed `query` and retrieve for `key` under the configured scope.
    /// Failures degrade to no memories.
    pub async fn retrieve_for(&self, key: &SessionKey, query: &str) -> Vec<MemoryRecord> {
        if self.cfg.top_k == 0 {
            return Vec::new();
        }
        let filter = MemoryFilter::from_scope(self.cfg.scope, key);
        let result = async {
            let embedding = self.embedder.embed(query).await?;
            self.retrieve(&embedding, self.cfg.top_k, &filter).await
        }
        .await;

        let hits = result.unwrap_or_else(|e| {
            tracing::warn!(session_key = %key, error = %e, "memory retrieval failed, continuing without");
            Vec::new()
        });

        TraceEvent::MemoriesRetrieved {
            session_key: key.to_string(),
            requested: self.cfg.top_k,
            returned: hits.len(),
        }
        .emit();
        hits
    }

    /// Merge the window tail with retrieved records. Pure and
    /// deterministic.
    pub fn augment(&self, window_tail: &[Turn], retrieved: &[MemoryRecord]) -> AugmentedContext {
        augment(window_tail, retrieved, &self.cfg)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pure assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Keep the last `recent_messages` turns and the first `max_injected`
/// records (already ranked, never more than [`MAX_INJECTED_MEMORIES`]),
/// aggregate profile signals with first-seen dedup and a per-list cap, and
/// render the text block.
pub fn augment(
    window_tail: &[Turn],
    retrieved: &[MemoryRecord],
    cfg: &RetrievalConfig,
) -> AugmentedContext {
    let tail = &window_tail[window_tail.len().saturating_sub(cfg.recent_messages)..];
    let recent_messages: Vec<Message> = tail
        .iter()
        .map(|t| Message {
            role: t.role,
            content: truncate_chars(&t.content, cfg.max_message_chars),
        })
        .collect();

    let injected = cfg.max_injected.min(MAX_INJECTED_MEMORIES);
    let retrieved_memories: Vec<MemoryRecord> =
        retrieved.iter().take(injected).cloned().collect();

    let summaries: Vec<Summary> = retrieved_memories
        .iter()
        .filter_map(|r| match r.summary() {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(primary_key = %r.primary_key, error = %e, "unreadable summary in memory record");
                None
            }
        })
        .collect();

    let prefs = dedup_capped(
        summaries
            .iter()
            .flat_map(|s| s.user_profile.prefs.iter().map(String::as_str)),
        cfg.max_signal_items,
    );
    let constraints = dedup_capped(
        summaries
            .iter()
            .flat_map(|s| s.user_profile.constraints.iter().map(String::as_str)),
        cfg.max_signal_items,
    );
    let open_questions = dedup_capped(
        summaries
            .iter()
            .flat_map(|s| s.open_questions.iter().map(String::as_str)),
        cfg.max_signal_items,
    );

    let mut text = render_memory(&prefs, &constraints, &open_questions, &retrieved_memories);
    if !recent_messages.is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str("## Recent conversation\n");
        for m in &recent_messages {
            text.push_str(&format!("{}: {}\n", m.role, m.content));
        }
    }

    AugmentedContext {
        recent_messages,
        retrieved_memories,
        prefs,
        constraints,
        open_questions,
        text,
    }
}

fn render_memory(
    prefs: &[String],
    constraints: &[String],
    open_questions: &[String],
    memories: &[MemoryRecord],
) -> String {
    let mut out = String::new();
    let mut section = |title: &str, items: &mut dyn Iterator<Item = String>| {
        let items: Vec<String> = items.collect();
        if items.is_empty() {
            return;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("## {title}\n"));
        for item in items {
            out.push_str(&format!("- {item}\n"));
        }
    };
    section("User preferences", &mut prefs.iter().cloned());
    section("User constraints", &mut constraints.iter().cloned());
    section("Open questions", &mut open_questions.iter().cloned());
    section(
        "Relevant memories",
        &mut memories
            .iter()
            .filter(|m| !m.digest_text.is_empty())
            .map(|m| m.digest_text.clone()),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cm_domain::message::Role;
    use cm_domain::model::{IndexRange, SummaryContent, UserProfile};

    fn turn(index: u64, role: Role, content: &str) -> Turn {
        Turn {
            index,
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    fn record(session_id: u64, prefs: &[&str], questions: &[&str], fact: &str) -> MemoryRecord {
        let key = SessionKey::new("alice", "c1").unwrap();
        let summary = Summary::from_content(
            &key,
            session_id,
            IndexRange { from: 0, to: 1 },
            SummaryContent {
                user_profile: UserProfile {
                    prefs: prefs.iter().map(|s| s.to_string()).collect(),
                    constraints: vec![],
                },
                key_facts: vec![fact.into()],
                open_questions: questions.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
        );
        MemoryRecord {
            primary_key: key.memory_key(session_id),
            user_id: "alice".into(),
            chat_id: "c1".into(),
            session_id,
            digest_text: summary.digest(),
            embedding: vec![],
            full_summary_json: serde_json::to_string(&summary).unwrap(),
            score: Some(1.0),
        }
    }

    #[test]
    fn cold_start_yields_empty_context() {
        let ctx = augment(&[], &[], &RetrievalConfig::default());
        assert!(ctx.recent_messages.is_empty());
        assert!(ctx.retrieved_memories.is_empty());
        assert!(ctx.text.is_empty());
    }

    #[test]
    fn recent_messages_without_memories() {
        let tail = [turn(0, Role::User, "hi"), turn(0, Role::Assistant, "hello")];
        let ctx = augment(&tail, &[], &RetrievalConfig::default());
        assert_eq!(ctx.recent_messages.len(), 2);
        assert!(ctx.retrieved_memories.is_empty());
        assert!(ctx.text.contains("user: hi"));
    }

    #[test]
    fn tail_is_bounded() {
        let cfg = RetrievalConfig {
            recent_messages: 2,
            ..Default::default()
        };
        let tail: Vec<Turn> = (0..5)
            .flat_map(|i| {
                [
                    turn(i, Role::User, &format!("q{i}")),
                    turn(i, Role::Assistant, &format!("a{i}")),
                ]
            })
            .collect();
        let ctx = augment(&tail, &[], &cfg);
        assert_eq!(ctx.recent_messages.len(), 2);
        assert_eq!(ctx.recent_messages[0].content, "q4");
        assert_eq!(ctx.recent_messages[1].content, "a4");
    }

    #[test]
    fn injects_at_most_three_and_dedups_signals() {
        let retrieved = vec![
            record(1, &["short answers", "metric units"], &["which hotel?"], "going to Oslo"),
            record(2, &["metric units", " short answers "], &["which hotel?"], "vegetarian"),
            record(3, &["French"], &[], "budget 2000 EUR"),
            record(4, &["never injected"], &[], "fourth"),
        ];
        let ctx = augment(&[], &retrieved, &RetrievalConfig::default());
        assert_eq!(ctx.retrieved_memories.len(), 3);
        assert_eq!(ctx.prefs, vec!["short answers", "metric units", "French"]);
        assert_eq!(ctx.open_questions, vec!["which hotel?"]);
        assert!(!ctx.text.contains("never injected"));
        assert!(ctx.text.contains("- going to Oslo"));
    }

    #[test]
    fn configured_injection_above_cap_is_clamped() {
        let cfg = RetrievalConfig {
            top_k: 10,
            max_injected: 8,
            ..Default::default()
        };
        let retrieved: Vec<MemoryRecord> = (1..=5)
            .map(|i| record(i, &[], &[], &format!("fact {i}")))
            .collect();
        let ctx = augment(&[], &retrieved, &cfg);
        assert_eq!(ctx.retrieved_memories.len(), MAX_INJECTED_MEMORIES);
        assert!(!ctx.text.contains("fact 4"));
    }

    #[test]
    fn signal_lists_are_capped() {
        let cfg = RetrievalConfig {
            max_signal_items: 2,
            ..Default::default()
        };
        let retrieved = vec![record(1, &["a", "b", "c", "d"], &[], "f")];
        let ctx = augment(&[], &retrieved, &cfg);
        assert_eq!(ctx.prefs, vec!["a", "b"]);
    }

    #[test]
    fn rendering_is_deterministic() {
        let tail = [turn(3, Role::User, "and tomorrow?")];
        let retrieved = vec![record(1, &["short answers"], &[], "going to Oslo")];
        let cfg = RetrievalConfig::default();
        let a = augment(&tail, &retrieved, &cfg);
        let b = augment(&tail, &retrieved, &cfg);
        assert_eq!(a.text, b.text);
        assert_eq!(
            a.text,
            "## User preferences\n- short answers\n\n## Relevant memories\n- going to Oslo\n\n## Recent conversation\nuser: and tomorrow?\n"
        );
    }

    #[test]
    fn messages_end_with_query() {
        let tail = [turn(0, Role::User, "hi"), turn(0, Role::Assistant, "hello")];
        let ctx = augment(&tail, &[record(1, &["brief"], &[], "fact")], &RetrievalConfig::default());
        let messages = ctx.to_messages("You are a helpful assistant.", "next?");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("- brief"));
        assert_eq!(messages[3], Message::user("next?"));
    }
}
