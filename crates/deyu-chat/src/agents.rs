//! Agent catalogue
//!
//! Every agent is a backend model id with a display name. History messages
//! carry the model that produced them in a `botState` blob, which is how a
//! reopened conversation recovers its agent.

use serde::{Deserialize, Serialize};

/// Model used when no agent is selected
pub const DEFAULT_MODEL: &str = "deyu-default";

/// A persona agent offered on the landing page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Agent {
    /// Display name
    pub name: &'static str,
    /// Intended audience
    pub audience: &'static str,
    /// Backend model id
    pub model: &'static str,
}

/// Persona agents
pub const AGENTS: &[Agent] = &[
    Agent {
        name: "润心桥",
        audience: "班主任",
        model: "deyu-bzr",
    },
    Agent {
        name: "慧育港",
        audience: "德育工作者",
        model: "deyu-xkjs",
    },
    Agent {
        name: "引航号",
        audience: "导师",
        model: "deyu-qyds",
    },
    Agent {
        name: "育智云",
        audience: "教师",
        model: "deyu-dygb",
    },
    Agent {
        name: "解忧铺",
        audience: "孩子们",
        model: "deyu-xy",
    },
    Agent {
        name: "暖心阁",
        audience: "家长",
        model: "deyu-jylf",
    },
];

/// Whether `model` is a model id the backend accepts
#[must_use]
pub fn is_known_model(model: &str) -> bool {
    model == DEFAULT_MODEL || AGENTS.iter().any(|a| a.model == model)
}

/// Display name for an agent model, if it is a persona
#[must_use]
pub fn display_name(model: &str) -> Option<&'static str> {
    AGENTS.iter().find(|a| a.model == model).map(|a| a.name)
}

/// Agent metadata attached to history messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotState {
    /// Model id
    pub model: String,
    /// Bot id
    #[serde(default)]
    pub bot_id: String,
    /// Bot display name
    #[serde(default)]
    pub bot_name: String,
}

impl BotState {
    /// Parse the raw `ext.botState` string.
    ///
    /// Short strings are placeholders (`""`, `"{}"`) and yield `None`, as do
    /// blobs naming a model outside the catalogue.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.chars().count() < 10 {
            return None;
        }
        serde_json::from_str::<Self>(raw)
            .ok()
            .filter(|state| is_known_model(&state.model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_models() {
        assert!(is_known_model("deyu-default"));
        assert!(is_known_model("deyu-jylf"));
        assert!(!is_known_model("gpt-4"));
        assert_eq!(AGENTS.len(), 6);
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("deyu-bzr"), Some("润心桥"));
        assert_eq!(display_name("deyu-default"), None);
    }

    #[test]
    fn test_bot_state_parse() {
        let raw = r#"{"model":"deyu-xy","bot_id":"b1","bot_name":"解忧铺"}"#;
        let state = BotState::parse(raw).unwrap();
        assert_eq!(state.model, "deyu-xy");
        assert_eq!(state.bot_id, "b1");

        assert!(BotState::parse("{}").is_none());
        assert!(BotState::parse(r#"{"model":"other-model","bot_id":"x"}"#).is_none());
        assert!(BotState::parse("not json at all").is_none());
    }
}
