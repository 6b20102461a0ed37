//! Deyu Chat - Streaming Completion Sessions
//!
//! This crate provides the conversation side of the Deyu client:
//! - Frame: incremental decoder for the `id:`/`event:`/`data:` completion stream
//! - State: ordered message list with optimistic ids, branches and rollback
//! - Session: `CompletionSession`, which drives one conversation end to end
//! - Api: HTTP client for the backend (conversations, feedback, titles, completions)
//!
//! # Usage
//!
//! ```rust,ignore
//! use deyu_chat::{ApiClient, ApiConfig, ChatConfig, CompletionSession};
//! use std::sync::Arc;
//!
//! let client = Arc::new(ApiClient::new(&ApiConfig::default())?);
//! let session = CompletionSession::new("conv-1", ChatConfig::default(), client.clone(), client);
//!
//! let mut updates = session.subscribe();
//! session.submit("你好").await;
//! println!("{:?}", updates.borrow_and_update().messages());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod agents;
pub mod api;
pub mod config;
pub mod error;
pub mod frame;
pub mod message;
pub mod notice;
pub mod request;
pub mod secret;
pub mod session;
pub mod state;
pub mod transport;

pub use agents::{Agent, BotState, AGENTS, DEFAULT_MODEL};
pub use api::{ApiClient, Conversation, ConversationList, HistoryPage, MessageItem};
pub use config::{ApiConfig, ChatConfig, EnvHeader};
pub use error::{Error, Result};
pub use frame::{FrameDecoder, FramePayload, MetaPayload, StreamEvent, StreamFrame, TextContent};
pub use message::{ChatMessage, Feedback, Role};
pub use notice::{Notice, NoticeLevel};
pub use request::{CompletionRequest, CompletionsOption, RequestMessage, SendOptions};
pub use secret::SecretString;
pub use session::{CompletionSession, STREAM_ERROR_TEXT};
pub use state::{ChatStatus, ConversationState, EarlierPage};
pub use transport::{ByteStream, CompletionTransport, ConversationService};
