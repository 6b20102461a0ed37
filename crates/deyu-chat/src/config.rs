//! Chat and backend API configuration

use crate::agents::DEFAULT_MODEL;
use crate::secret::SecretString;
use serde::{Deserialize, Serialize};

/// Completion defaults for a chat session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Agent model sent with every completion request
    #[serde(default = "default_model")]
    pub model: String,

    /// Bot identifier
    #[serde(default = "default_bot_id")]
    pub bot_id: String,

    /// History page size for `fetch_earlier`
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Ask the backend for reasoning (`think`) output
    #[serde(default)]
    pub use_deep_think: bool,

    /// Ask the backend for follow-up suggestions
    #[serde(default)]
    pub with_suggest: bool,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_bot_id() -> String {
    "default".to_string()
}

fn default_page_size() -> u32 {
    30
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            bot_id: default_bot_id(),
            page_size: default_page_size(),
            use_deep_think: false,
            with_suggest: false,
        }
    }
}

impl ChatConfig {
    /// Set the agent model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Enable or disable deep-think output
    #[must_use]
    pub fn with_deep_think(mut self, enabled: bool) -> Self {
        self.use_deep_think = enabled;
        self
    }
}

/// Routing header the backend uses to pick an environment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvHeader {
    /// Header name
    pub name: String,
    /// Header value
    pub value: String,
}

/// Backend HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the backend, without trailing slash
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Timeout for non-streaming requests (seconds)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Optional environment routing header
    #[serde(default)]
    pub env_header: Option<EnvHeader>,

    /// Auth token sent as the `Authorization` header
    #[serde(default)]
    pub token: Option<SecretString>,
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            env_header: None,
            token: None,
        }
    }
}

impl ApiConfig {
    /// Set the base URL
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the auth token
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(SecretString::new(token));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ChatConfig::default();
        assert_eq!(config.model, "deyu-default");
        assert_eq!(config.bot_id, "default");
        assert_eq!(config.page_size, 30);
        assert!(!config.use_deep_think);

        let api = ApiConfig::default();
        assert_eq!(api.timeout_secs, 120);
        assert!(api.token.is_none());
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: ChatConfig = serde_json::from_str(r#"{"model":"deyu-xy"}"#).unwrap();
        assert_eq!(config.model, "deyu-xy");
        assert_eq!(config.page_size, 30);

        let api: ApiConfig =
            serde_json::from_str(r#"{"base_url":"https://api.example","token":"t"}"#).unwrap();
        assert_eq!(api.base_url, "https://api.example");
        assert_eq!(api.token.unwrap().expose_secret(), "t");
    }
}
