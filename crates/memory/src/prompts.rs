//! Prompt templates for the structured calls.

use cm_domain::model::Turn;

use crate::truncation::truncate_chars;

pub const SUMMARIZER_SYSTEM: &str = "You compress chat sessions into durable memory. \
Extract only what will still matter in later conversations. Use short, self-contained \
statements. Leave a list empty rather than guessing.";

pub const CLASSIFIER_SYSTEM: &str = "You decide whether a user query is ambiguous: \
it cannot be answered well without guessing what the user refers to or wants \
(missing object, unclear scope, dangling pronouns such as \"it\" or \"that\").";

pub const REWRITER_SYSTEM: &str = "You rewrite user queries to be specific and \
self-contained while keeping their intent. Do not answer the query.";

pub const CLARIFIER_SYSTEM: &str = "You write at most three short clarifying \
questions that would remove the ambiguity of a user query.";

/// Summarization prompt over a window of turns, oldest first.
pub fn summarization(turns: &[Turn], max_message_chars: usize, max_items: usize) -> String {
    let mut prompt = format!(
        "Summarize the following chat session. Give at most {max_items} items per list.\n\n"
    );
    for turn in turns {
        prompt.push_str(&format!(
            "[{}] {}: {}\n",
            turn.index,
            turn.role,
            truncate_chars(&turn.content, max_message_chars)
        ));
    }
    prompt
}

pub fn ambiguity(query: &str) -> String {
    format!("Is the following query ambiguous?\nQuery: {query}")
}

pub fn rewrite(query: &str) -> String {
    format!("Rewrite the following query to be more specific:\n{query}")
}

pub fn clarifying_questions(query: &str) -> String {
    format!("Query: {query}\nWhich questions should be asked before answering it?")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cm_domain::message::Role;

    #[test]
    fn summarization_lists_turns_in_order() {
        let turns = vec![
            Turn {
                index: 4,
                role: Role::User,
                content: "I'm vegetarian".into(),
                created_at: Utc::now(),
            },
            Turn {
                index: 4,
                role: Role::Assistant,
                content: "Noted.".into(),
                created_at: Utc::now(),
            },
        ];
        let prompt = summarization(&turns, 100, 8);
        let user_at = prompt.find("[4] user: I'm vegetarian").unwrap();
        let assistant_at = prompt.find("[4] assistant: Noted.").unwrap();
        assert!(user_at < assistant_at);
        assert!(prompt.contains("at most 8 items"));
    }
}
