//! Seams between the session and the backend
//!
//! [`CompletionSession`](crate::CompletionSession) only talks to these two
//! traits. [`ApiClient`](crate::ApiClient) implements both over HTTP; tests
//! use in-memory fakes.

use crate::api::HistoryPage;
use crate::error::Result;
use crate::message::Feedback;
use crate::request::{CompletionRequest, RequestMessage};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

/// Raw completion response body
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Opens streaming completions
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    /// Send the request and return the response body once headers arrive.
    ///
    /// Non-2xx responses are errors; dropping the stream aborts the request.
    async fn open(&self, request: &CompletionRequest) -> Result<ByteStream>;
}

/// History, feedback and title side channel
#[async_trait]
pub trait ConversationService: Send + Sync {
    /// Fetch one page of history, newest first
    async fn conversation_page(
        &self,
        conversation_id: &str,
        cursor: Option<&str>,
        size: u32,
    ) -> Result<HistoryPage>;

    /// Submit (or withdraw) feedback on a message
    async fn feedback(&self, message_id: &str, feedback: Feedback) -> Result<()>;

    /// Ask the backend to title a conversation from its first exchange
    async fn generate_title(&self, conversation_id: &str, messages: &[RequestMessage])
        -> Result<()>;
}
