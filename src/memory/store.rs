//! Conversation history storage

use crate::models::MessageRole;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single turn in the conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationMessage {
    pub message_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub role: MessageRole,
    pub content: String,
}

impl ConversationMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            role,
            content: content.into(),
        }
    }
}

/// Conversation history for a chat session. Turns are only ever appended.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationHistory {
    messages: Vec<ConversationMessage>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.messages
            .push(ConversationMessage::new(MessageRole::User, content));
    }

    pub fn add_assistant_message(&mut self, content: impl Into<String>) {
        self.messages
            .push(ConversationMessage::new(MessageRole::Assistant, content));
    }

    pub fn messages(&self) -> impl Iterator<Item = &ConversationMessage> {
        self.messages.iter()
    }

    pub fn last(&self) -> Option<&ConversationMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Render the most recent `window` turns, oldest first, for an LLM prompt.
    /// Returns an empty string when there is no history.
    pub fn format_recent(&self, window: usize) -> String {
        if self.messages.is_empty() || window == 0 {
            return String::new();
        }

        let skip = self.messages.len().saturating_sub(window);
        let mut context = String::from("## Conversation History\n\n");

        for msg in self.messages.iter().skip(skip) {
            context.push_str(&format!("**{}**: {}\n\n", msg.role, msg.content));
        }

        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_order() {
        let mut history = ConversationHistory::new();
        history.add_user_message("What was Acme's revenue?");
        history.add_assistant_message("Acme reported $4.2B.");

        assert_eq!(history.len(), 2);
        let roles: Vec<_> = history.messages().map(|m| m.role).collect();
        assert_eq!(roles, vec![MessageRole::User, MessageRole::Assistant]);
        assert_eq!(history.last().unwrap().content, "Acme reported $4.2B.");
    }

    #[test]
    fn test_format_recent_window() {
        let mut history = ConversationHistory::new();
        for i in 0..6 {
            history.add_user_message(format!("Question {}", i));
        }

        let formatted = history.format_recent(2);
        assert!(formatted.contains("Question 4"));
        assert!(formatted.contains("Question 5"));
        assert!(!formatted.contains("Question 3"));
        assert!(formatted.find("Question 4") < formatted.find("Question 5"));
    }

    #[test]
    fn test_format_recent_empty() {
        let history = ConversationHistory::new();
        assert!(history.is_empty());
        assert_eq!(history.format_recent(10), "");
    }
}
