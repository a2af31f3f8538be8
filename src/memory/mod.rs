//! Per-conversation memory
//!
//! Two small bounded stores feeding subsequent prompts: a per-conversation
//! message history and a per-process session-note buffer recording prior SQL
//! attempts and answers. Both sit behind one exclusive lock; per-request
//! message volume is tiny, so contention is negligible. A future version
//! could shard the lock by conversation id.

use crate::provider::Role;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// One remembered message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,

    /// Reasoning metadata from the provider, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_details: Option<Value>,
}

/// Bounded ring buffer of messages per conversation id
pub struct ConversationMemory {
    max_messages: usize,
    store: Mutex<HashMap<String, Vec<ConversationTurn>>>,
}

impl ConversationMemory {
    pub fn new(max_messages: usize) -> Self {
        Self {
            max_messages,
            store: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot the history for one conversation, oldest first.
    pub async fn get(&self, conversation_id: &str) -> Vec<ConversationTurn> {
        let store = self.store.lock().await;
        store.get(conversation_id).cloned().unwrap_or_default()
    }

    /// Append one user/assistant exchange, evicting the oldest messages once
    /// the capacity is exceeded.
    pub async fn append_exchange(
        &self,
        conversation_id: &str,
        user_content: &str,
        assistant_content: &str,
        reasoning_details: Option<Value>,
    ) {
        let mut store = self.store.lock().await;
        let history = store.entry(conversation_id.to_string()).or_default();
        history.push(ConversationTurn {
            role: Role::User,
            content: user_content.to_string(),
            reasoning_details: None,
        });
        history.push(ConversationTurn {
            role: Role::Assistant,
            content: assistant_content.to_string(),
            reasoning_details,
        });
        if history.len() > self.max_messages {
            let excess = history.len() - self.max_messages;
            history.drain(..excess);
        }
    }
}

/// Session-note kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NoteKind {
    Sql,
    Answer,
}

#[derive(Debug, Clone)]
struct SessionNote {
    kind: NoteKind,
    question: String,
    text: String,
}

/// Bounded buffer of prior SQL attempts and answers, rendered into the
/// prompt context as short advisory notes.
pub struct SessionNotes {
    max_notes: usize,
    notes: Mutex<Vec<SessionNote>>,
}

/// Notes rendered into the context, newest last
const RENDERED_NOTES: usize = 4;

impl SessionNotes {
    pub fn new(max_notes: usize) -> Self {
        Self {
            max_notes,
            notes: Mutex::new(Vec::new()),
        }
    }

    /// Record a generated SQL candidate for a question.
    pub async fn remember_sql(&self, question: &str, query: &str) {
        self.push(SessionNote {
            kind: NoteKind::Sql,
            question: truncate(question, 250).to_string(),
            text: truncate(query, 500).to_string(),
        })
        .await;
    }

    /// Record a final answer for a question.
    pub async fn remember_answer(&self, question: &str, answer: &str) {
        self.push(SessionNote {
            kind: NoteKind::Answer,
            question: truncate(question, 250).to_string(),
            text: truncate(answer, 500).to_string(),
        })
        .await;
    }

    async fn push(&self, note: SessionNote) {
        tracing::debug!("Remembering {:?} note for question '{}'", note.kind, note.question);
        let mut notes = self.notes.lock().await;
        notes.push(note);
        if notes.len() > self.max_notes {
            let excess = notes.len() - self.max_notes;
            notes.drain(..excess);
        }
    }

    /// Render the most recent notes for the prompt context; empty string
    /// when nothing has been remembered yet.
    pub async fn recent_notes(&self) -> String {
        let notes = self.notes.lock().await;
        let start = notes.len().saturating_sub(RENDERED_NOTES);
        notes[start..]
            .iter()
            .map(|note| match note.kind {
                NoteKind::Sql => format!("Previous SQL for similar question: {}", note.text),
                NoteKind::Answer => format!("Previous answer style: {}", note.text),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_history_preserves_order_and_roles() {
        let memory = ConversationMemory::new(8);
        memory.append_exchange("c1", "question", "answer", None).await;

        let history = memory.get("c1").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].content, "answer");
    }

    #[tokio::test]
    async fn test_history_evicts_oldest_beyond_capacity() {
        let memory = ConversationMemory::new(4);
        for i in 0..4 {
            memory
                .append_exchange("c1", &format!("q{i}"), &format!("a{i}"), None)
                .await;
        }

        let history = memory.get("c1").await;
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].content, "q2");
        assert_eq!(history[3].content, "a3");
    }

    #[tokio::test]
    async fn test_conversations_are_isolated() {
        let memory = ConversationMemory::new(8);
        memory.append_exchange("c1", "q", "a", None).await;

        assert_eq!(memory.get("c1").await.len(), 2);
        assert!(memory.get("c2").await.is_empty());
    }

    #[tokio::test]
    async fn test_reasoning_metadata_attached_to_assistant_turn() {
        let memory = ConversationMemory::new(8);
        let meta = serde_json::json!([{"type": "summary", "text": "t"}]);
        memory.append_exchange("c1", "q", "a", Some(meta.clone())).await;

        let history = memory.get("c1").await;
        assert!(history[0].reasoning_details.is_none());
        assert_eq!(history[1].reasoning_details, Some(meta));
    }

    #[tokio::test]
    async fn test_recent_notes_render_last_four() {
        let notes = SessionNotes::new(20);
        for i in 0..6 {
            notes.remember_sql("q", &format!("SELECT {i}")).await;
        }
        notes.remember_answer("q", "Returned 3 rows.").await;

        let rendered = notes.recent_notes().await;
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "Previous SQL for similar question: SELECT 3");
        assert_eq!(lines[3], "Previous answer style: Returned 3 rows.");
    }

    #[tokio::test]
    async fn test_notes_capacity_bounded() {
        let notes = SessionNotes::new(2);
        notes.remember_sql("q", "SELECT 1").await;
        notes.remember_sql("q", "SELECT 2").await;
        notes.remember_sql("q", "SELECT 3").await;

        let rendered = notes.recent_notes().await;
        assert!(!rendered.contains("SELECT 1"));
        assert!(rendered.contains("SELECT 2"));
        assert!(rendered.contains("SELECT 3"));
    }

    #[tokio::test]
    async fn test_empty_notes_render_empty() {
        let notes = SessionNotes::new(20);
        assert_eq!(notes.recent_notes().await, "");
    }

    #[tokio::test]
    async fn test_long_queries_truncated() {
        let notes = SessionNotes::new(20);
        let long = "x".repeat(600);
        notes.remember_sql("q", &long).await;

        let rendered = notes.recent_notes().await;
        let line = rendered.lines().next().unwrap();
        assert_eq!(
            line.len(),
            "Previous SQL for similar question: ".len() + 500
        );
    }
}
