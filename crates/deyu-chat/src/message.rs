//! Chat message types

use crate::agents::BotState;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person chatting
    User,
    /// The assistant
    Assistant,
}

impl Role {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Map the backend's numeric `userType` (2 = user)
    #[must_use]
    pub fn from_user_type(user_type: i64) -> Self {
        if user_type == 2 {
            Self::User
        } else {
            Self::Assistant
        }
    }
}

/// User rating of an assistant message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    /// No rating (or rating withdrawn)
    #[default]
    None,
    /// Thumbs up
    Like,
    /// Thumbs down
    Dislike,
}

impl Feedback {
    /// Numeric action sent to `/feedback`
    #[must_use]
    pub fn action(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Like => 1,
            Self::Dislike => 2,
        }
    }

    /// Decode the numeric feedback stored on history messages
    #[must_use]
    pub fn from_action(action: i64) -> Self {
        match action {
            1 => Self::Like,
            2 => Self::Dislike,
            _ => Self::None,
        }
    }
}

/// A message in the conversation list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Optimistic token until the server assigns the canonical id
    pub id: String,
    /// Author
    pub role: Role,
    /// Answer text (append-only while streaming)
    pub content: String,
    /// Reasoning text (append-only while streaming)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub think: Option<String>,
    /// Server creation time in ms; `-1` for locally created messages
    pub timestamp: i64,
    /// Still receiving fragments
    #[serde(default)]
    pub is_streaming: bool,
    /// Reasoning finished (answer text has started)
    #[serde(default)]
    pub is_complete_think: bool,
    /// User rating
    #[serde(default)]
    pub feedback: Feedback,
    /// For assistant messages, the user message this answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_id: Option<String>,
    /// Agent that produced the message (history only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_state: Option<BotState>,
}

impl ChatMessage {
    /// Create a finished user message
    #[must_use]
    pub fn user(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::User,
            content: content.into(),
            think: None,
            timestamp: -1,
            is_streaming: false,
            is_complete_think: false,
            feedback: Feedback::None,
            reply_id: None,
            bot_state: None,
        }
    }

    /// Create an empty assistant message that is about to stream
    #[must_use]
    pub fn assistant_placeholder(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            content: String::new(),
            think: None,
            timestamp: -1,
            is_streaming: true,
            is_complete_think: false,
            feedback: Feedback::None,
            reply_id: None,
            bot_state: None,
        }
    }

    /// Append streamed fragments
    pub fn append(&mut self, text: Option<&str>, think: Option<&str>) {
        if let Some(think) = think.filter(|t| !t.is_empty()) {
            self.think.get_or_insert_with(String::new).push_str(think);
        }
        if let Some(text) = text.filter(|t| !t.is_empty()) {
            self.content.push_str(text);
            if self.has_think() {
                self.is_complete_think = true;
            }
        }
    }

    /// Whether the message carries reasoning text
    #[must_use]
    pub fn has_think(&self) -> bool {
        self.think.as_deref().is_some_and(|t| !t.is_empty())
    }
}

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Random 7-character base-36 token used until the server assigns an id
#[must_use]
pub fn optimistic_id() -> String {
    let mut rng = rand::thread_rng();
    (0..7)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_accumulates() {
        let mut msg = ChatMessage::assistant_placeholder("a1");
        msg.append(None, Some("let me "));
        msg.append(None, Some("think"));
        assert!(!msg.is_complete_think);

        msg.append(Some("hi"), None);
        msg.append(Some(" there"), Some(""));
        assert_eq!(msg.content, "hi there");
        assert_eq!(msg.think.as_deref(), Some("let me think"));
        assert!(msg.is_complete_think);
    }

    #[test]
    fn test_append_without_think_keeps_none() {
        let mut msg = ChatMessage::assistant_placeholder("a1");
        msg.append(Some("x"), None);
        assert!(msg.think.is_none());
        assert!(!msg.is_complete_think);
    }

    #[test]
    fn test_feedback_action_mapping() {
        assert_eq!(Feedback::Like.action(), 1);
        assert_eq!(Feedback::from_action(2), Feedback::Dislike);
        assert_eq!(Feedback::from_action(7), Feedback::None);
    }

    #[test]
    fn test_role_from_user_type() {
        assert_eq!(Role::from_user_type(2), Role::User);
        assert_eq!(Role::from_user_type(1), Role::Assistant);
    }

    #[test]
    fn test_optimistic_id_shape() {
        let id = optimistic_id();
        assert_eq!(id.len(), 7);
        assert!(id.bytes().all(|b| ID_ALPHABET.contains(&b)));
    }
}
