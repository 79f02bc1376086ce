//! Prompt message and conversation-history value objects.
//!
//! These flow through the whole system: the caller seeds a run with its
//! history and new question, the context assembler produces system messages,
//! and the model-completion executor sends the ordered list to the provider.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversation (chat session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a prompt message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    /// System instructions (quote block, system prompt, limit prompt)
    System,
    /// The end user
    Human,
    /// The model
    Assistant,
}

/// A single message in the prompt sent to the language model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::System,
            content: content.into(),
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::Human,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::Assistant,
            content: content.into(),
        }
    }
}

/// One completed question/answer exchange from a prior turn.
///
/// The caller supplies history as turns; the model-completion executor
/// expands each turn into a human + assistant message pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub question: String,
    pub answer: String,
}

impl ChatTurn {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }

    /// Expand this turn into prompt messages, oldest role first.
    pub fn to_messages(&self) -> [PromptMessage; 2] {
        [
            PromptMessage::human(&self.question),
            PromptMessage::assistant(&self.answer),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        let msg = PromptMessage::human("hi");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""role":"human""#));
    }

    #[test]
    fn turn_expands_in_order() {
        let turn = ChatTurn::new("q", "a");
        let [first, second] = turn.to_messages();
        assert_eq!(first.role, PromptRole::Human);
        assert_eq!(second.role, PromptRole::Assistant);
        assert_eq!(first.content, "q");
        assert_eq!(second.content, "a");
    }

    #[test]
    fn conversation_ids_are_unique() {
        assert_ne!(ConversationId::new().0, ConversationId::new().0);
    }
}
