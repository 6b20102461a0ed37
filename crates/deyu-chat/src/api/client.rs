//! reqwest-based backend client

use super::types::{
    AuthInfo, Conversation, ConversationList, CreatedConversation, Credentials, HistoryPage,
    LoginRequest, PageRequest,
};
use super::{status_message, unwrap_envelope, NETWORK_ERROR_MESSAGE};
use crate::config::{ApiConfig, EnvHeader};
use crate::error::{Error, Result};
use crate::message::Feedback;
use crate::request::{CompletionRequest, RequestMessage};
use crate::secret::SecretString;
use crate::transport::{ByteStream, CompletionTransport, ConversationService};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP client for the backend
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    env_header: Option<EnvHeader>,
    token: Option<SecretString>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("env_header", &self.env_header)
            .field("token", &self.token)
            .finish()
    }
}

impl ApiClient {
    /// Create a client.
    ///
    /// The timeout applies to JSON calls only; completion streams stay open
    /// as long as the server keeps writing.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.timeout_secs),
            env_header: config.env_header.clone(),
            token: config.token.clone(),
        })
    }

    /// Replace the auth token
    #[must_use]
    pub fn with_token(mut self, token: SecretString) -> Self {
        self.token = Some(token);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let mut builder = self
            .client
            .post(self.url(path))
            .header(CONTENT_TYPE, "application/json");
        if let Some(env) = &self.env_header {
            builder = builder.header(env.name.as_str(), env.value.as_str());
        }
        if let Some(token) = &self.token {
            builder = builder.header(AUTHORIZATION, token.expose_secret());
        }
        builder
    }

    async fn send(&self, path: &str, builder: RequestBuilder) -> Result<Response> {
        let resp = builder.send().await.map_err(|e| {
            warn!(path, error = %e, "request failed");
            match e.status() {
                Some(_) => Error::from(e),
                None => Error::Network(format!("{NETWORK_ERROR_MESSAGE}: {e}")),
            }
        })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        warn!(path, status = status.as_u16(), "backend returned error status");
        Err(http_error(status.as_u16(), &body))
    }

    async fn call<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        debug!(path, "POST");
        let builder = self.post(path).timeout(self.timeout).json(body);
        let resp = self.send(path, builder).await?;
        let envelope: Value = resp
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(format!("{path}: {e}")))?;
        let data = unwrap_envelope(envelope)?;
        serde_json::from_value(data).map_err(|e| Error::InvalidResponse(format!("{path}: {e}")))
    }

    async fn call_unit<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        self.call::<B, Value>(path, body).await.map(|_| ())
    }

    /// Ask the backend to send an SMS code to `info.auth_id`
    pub async fn send_verification_code(&self, info: &AuthInfo) -> Result<()> {
        self.call_unit("/auth/verifyCode", info).await
    }

    /// Exchange an SMS code or password for a token.
    ///
    /// The client keeps its current token; pass the result to
    /// [`with_token`](Self::with_token) to use it.
    pub async fn login(&self, info: &AuthInfo, verify: &str) -> Result<Credentials> {
        let creds: Credentials = self
            .call("/auth/login", &LoginRequest { info, verify })
            .await?;
        debug!(user_id = %creds.user_id, new = creds.new, "logged in");
        Ok(creds)
    }

    /// Set the password of the logged-in account
    pub async fn set_password(&self, new_password: &str) -> Result<()> {
        if self.token.is_none() {
            return Err(Error::Unauthorized(status_message(401)));
        }
        let body = json!({ "newPassword": new_password });
        self.call_unit("/auth/setPassword", &body).await
    }

    /// Create an empty conversation
    pub async fn create_conversation(&self) -> Result<CreatedConversation> {
        self.call("/conversation/create", &json!({})).await
    }

    /// One page of a conversation's messages, newest first
    pub async fn conversation_detail(
        &self,
        conversation_id: &str,
        cursor: Option<&str>,
        size: u32,
    ) -> Result<HistoryPage> {
        let body = json!({
            "conversationId": conversation_id,
            "page": page(cursor, size),
        });
        self.call("/conversation/get", &body).await
    }

    /// Conversation list for the sidebar
    pub async fn list_conversations(
        &self,
        cursor: Option<&str>,
        size: u32,
    ) -> Result<ConversationList> {
        self.call("/conversation/list", &json!({ "page": page(cursor, size) }))
            .await
    }

    /// Search conversations by keyword
    pub async fn search_conversations(
        &self,
        key: &str,
        cursor: Option<&str>,
        size: u32,
    ) -> Result<ConversationList> {
        let body = json!({ "key": key, "page": page(cursor, size) });
        self.call("/conversation/search", &body).await
    }

    /// Rename a conversation
    pub async fn rename_conversation(&self, conversation_id: &str, brief: &str) -> Result<()> {
        let body = json!({ "conversationId": conversation_id, "brief": brief });
        self.call_unit("/conversation/rename", &body).await
    }

    /// Delete a conversation
    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<()> {
        let body = json!({ "conversationId": conversation_id });
        self.call_unit("/conversation/delete", &body).await
    }

    /// Fetch every conversation by walking the list cursor
    pub async fn all_conversations(&self, size: u32) -> Result<Vec<Conversation>> {
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.list_conversations(cursor.as_deref(), size).await?;
            all.extend(page.conversations);
            if !page.has_more || page.cursor.is_empty() {
                return Ok(all);
            }
            cursor = Some(page.cursor);
        }
    }
}

fn page(cursor: Option<&str>, size: u32) -> PageRequest {
    PageRequest {
        cursor: cursor.map(str::to_string),
        size,
    }
}

/// Status error, with the body's `msg` appended when present
fn http_error(status: u16, body: &str) -> Error {
    let mut message = status_message(status);
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("msg").and_then(Value::as_str).map(str::to_string));
    if let Some(detail) = detail.filter(|d| !d.is_empty()) {
        message = format!("{message}: {detail}");
    }
    if status == 401 {
        Error::Unauthorized(message)
    } else {
        Error::Http { status, message }
    }
}

#[async_trait]
impl CompletionTransport for ApiClient {
    async fn open(&self, request: &CompletionRequest) -> Result<ByteStream> {
        debug!(
            conversation_id = %request.conversation_id,
            model = %request.model,
            "opening completion stream"
        );
        let builder = self.post("/v1/completions").json(request);
        let resp = self.send("/v1/completions", builder).await?;
        Ok(resp.bytes_stream().map_err(Error::from).boxed())
    }
}

#[async_trait]
impl ConversationService for ApiClient {
    async fn conversation_page(
        &self,
        conversation_id: &str,
        cursor: Option<&str>,
        size: u32,
    ) -> Result<HistoryPage> {
        self.conversation_detail(conversation_id, cursor, size).await
    }

    async fn feedback(&self, message_id: &str, feedback: Feedback) -> Result<()> {
        let body = json!({ "action": feedback.action(), "messageId": message_id });
        self.call_unit("/feedback", &body).await
    }

    async fn generate_title(
        &self,
        conversation_id: &str,
        messages: &[RequestMessage],
    ) -> Result<()> {
        let body = json!({ "conversationId": conversation_id, "messages": messages });
        self.call_unit("/conversation/brief", &body).await
    }
}
