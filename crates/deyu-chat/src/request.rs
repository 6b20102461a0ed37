//! Completion request body

use crate::config::ChatConfig;
use serde::{Deserialize, Serialize};

/// Per-request completion switches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionsOption {
    /// Regenerate the answer to `replyId`
    pub is_regen: bool,
    /// Ask for follow-up suggestions
    pub with_suggest: bool,
    /// Replace the last turn
    pub is_replace: bool,
    /// Ask for reasoning output
    pub use_deep_think: bool,
    /// Always `true` for this client
    pub stream: bool,
    /// Alternate chosen after a regeneration, sent with the next normal turn
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_regen_id: Option<String>,
}

/// A message in the request body; always a single user message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMessage {
    /// Text
    pub content: String,
    /// `0` = plain text
    pub content_type: i32,
    /// Attachments (unused)
    pub attaches: Vec<serde_json::Value>,
    /// References (unused)
    pub references: Vec<serde_json::Value>,
    /// Always `"user"`
    pub role: String,
}

impl RequestMessage {
    /// Plain-text user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: 0,
            attaches: Vec::new(),
            references: Vec::new(),
            role: "user".to_string(),
        }
    }
}

/// `/v1/completions` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    /// Agent model
    pub model: String,
    /// Bot id
    pub bot_id: String,
    /// Conversation id
    pub conversation_id: String,
    /// Switches
    pub completions_option: CompletionsOption,
    /// The user message
    pub messages: Vec<RequestMessage>,
    /// User message to regenerate an answer for
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_id: Option<String>,
}

impl CompletionRequest {
    /// Build a request from session defaults and per-call options
    pub fn new(
        config: &ChatConfig,
        model: &str,
        conversation_id: &str,
        content: &str,
        options: &SendOptions,
    ) -> Self {
        Self {
            model: model.to_string(),
            bot_id: config.bot_id.clone(),
            conversation_id: conversation_id.to_string(),
            completions_option: CompletionsOption {
                is_regen: options.is_regen,
                with_suggest: config.with_suggest,
                is_replace: options.is_replace,
                use_deep_think: options.use_deep_think.unwrap_or(config.use_deep_think),
                stream: true,
                selected_regen_id: options.selected_regen_id.clone(),
            },
            messages: vec![RequestMessage::user(content)],
            reply_id: options.reply_id.clone(),
        }
    }
}

/// Options for [`CompletionSession::send_message`](crate::CompletionSession::send_message)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Regenerate the current turn
    pub is_regen: bool,
    /// Replace the current turn
    pub is_replace: bool,
    /// Promote this alternate before streaming
    pub selected_regen_id: Option<String>,
    /// User message the regeneration answers
    pub reply_id: Option<String>,
    /// Override the session's deep-think default
    pub use_deep_think: Option<bool>,
}

impl SendOptions {
    /// Options for a regeneration of the answer to `reply_id`
    #[must_use]
    pub fn regen(reply_id: impl Into<String>) -> Self {
        Self {
            is_regen: true,
            reply_id: Some(reply_id.into()),
            ..Self::default()
        }
    }

    /// Options for replacing the last turn
    #[must_use]
    pub fn replace() -> Self {
        Self {
            is_replace: true,
            ..Self::default()
        }
    }

    /// Carry the selected alternate
    #[must_use]
    pub fn with_selected_regen_id(mut self, id: impl Into<String>) -> Self {
        self.selected_regen_id = Some(id.into());
        self
    }

    /// Override deep-think for this request
    #[must_use]
    pub fn with_deep_think(mut self, enabled: bool) -> Self {
        self.use_deep_think = Some(enabled);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let config = ChatConfig::default();
        let request = CompletionRequest::new(
            &config,
            "deyu-bzr",
            "c1",
            "hello",
            &SendOptions::default(),
        );
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "deyu-bzr");
        assert_eq!(value["botId"], "default");
        assert_eq!(value["conversationId"], "c1");
        assert_eq!(value["completionsOption"]["stream"], true);
        assert_eq!(value["completionsOption"]["isRegen"], false);
        assert!(value["completionsOption"].get("selectedRegenId").is_none());
        assert!(value.get("replyId").is_none());
        assert_eq!(value["messages"][0]["content"], "hello");
        assert_eq!(value["messages"][0]["contentType"], 0);
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["attaches"], serde_json::json!([]));
    }

    #[test]
    fn test_regen_options() {
        let config = ChatConfig::default().with_deep_think(true);
        let options = SendOptions::regen("u1").with_selected_regen_id("m1");
        let request = CompletionRequest::new(&config, "deyu-default", "c1", "q", &options);
        assert!(request.completions_option.is_regen);
        assert!(request.completions_option.use_deep_think);
        assert_eq!(request.reply_id.as_deref(), Some("u1"));

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["replyId"], "u1");
        assert_eq!(value["completionsOption"]["selectedRegenId"], "m1");
    }

    #[test]
    fn test_deep_think_override() {
        let config = ChatConfig::default().with_deep_think(true);
        let options = SendOptions::replace().with_deep_think(false);
        let request = CompletionRequest::new(&config, "deyu-default", "c1", "q", &options);
        assert!(!request.completions_option.use_deep_think);
        assert!(request.completions_option.is_replace);
    }
}
