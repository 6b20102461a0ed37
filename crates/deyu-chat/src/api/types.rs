//! Backend payload types

use crate::agents::BotState;
use crate::message::{ChatMessage, Feedback, Role};
use crate::secret::SecretString;
use crate::state::EarlierPage;
use serde::{Deserialize, Serialize};

/// Cursor page selector
#[derive(Debug, Clone, Serialize)]
pub struct PageRequest {
    /// Cursor from the previous page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Page size
    pub size: u32,
}

/// Extra fields of a history message
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageExt {
    /// JSON-encoded [`BotState`], or a short placeholder
    pub bot_state: String,
    /// Short summary (used as content for regenerated alternates)
    pub brief: String,
    /// Follow-up suggestion
    pub suggest: String,
    /// Reasoning text
    pub think: String,
}

/// A message as stored by the backend
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageItem {
    /// Message id
    pub message_id: String,
    /// Text
    pub content: String,
    /// Content type
    pub content_type: i64,
    /// Conversation id
    pub conversation_id: String,
    /// Creation time (ms)
    pub create_time: i64,
    /// Extra fields
    pub ext: MessageExt,
    /// Feedback action (0 none, 1 like, 2 dislike)
    pub feedback: i64,
    /// Position in the conversation
    pub index: i64,
    /// Message type
    pub message_type: i64,
    /// User message this answers
    pub reply_id: Option<String>,
    /// Section id
    pub section_id: String,
    /// Status
    pub status: i64,
    /// 2 = user, anything else = assistant
    pub user_type: i64,
}

impl MessageItem {
    /// Convert to a list message; alternates show their `brief` as content
    pub fn into_chat_message(self, from_brief: bool) -> ChatMessage {
        let think = (!self.ext.think.is_empty()).then(|| self.ext.think.clone());
        let content = if from_brief {
            self.ext.brief
        } else {
            self.content
        };
        ChatMessage {
            id: self.message_id,
            role: Role::from_user_type(self.user_type),
            is_complete_think: think.is_some() && !content.is_empty(),
            content,
            think,
            timestamp: self.create_time,
            is_streaming: false,
            feedback: Feedback::from_action(self.feedback),
            reply_id: self.reply_id,
            bot_state: BotState::parse(&self.ext.bot_state),
        }
    }
}

/// `/conversation/get` response
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryPage {
    /// Whether older pages exist
    pub has_more: bool,
    /// Messages, newest first
    pub message_list: Option<Vec<MessageItem>>,
    /// Alternates of the last turn, newest first
    pub regen_list: Option<Vec<MessageItem>>,
    /// Cursor for the next page
    pub cursor: String,
}

impl From<HistoryPage> for EarlierPage {
    fn from(page: HistoryPage) -> Self {
        Self {
            messages: page
                .message_list
                .unwrap_or_default()
                .into_iter()
                .map(|item| item.into_chat_message(false))
                .collect(),
            regen_list: page
                .regen_list
                .unwrap_or_default()
                .into_iter()
                .map(|item| item.into_chat_message(true))
                .collect(),
            cursor: (!page.cursor.is_empty()).then_some(page.cursor),
            has_more: page.has_more,
        }
    }
}

/// Sidebar conversation entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Conversation {
    /// Conversation id
    pub conversation_id: String,
    /// Title
    pub brief: String,
    /// Creation time (ms)
    pub create_time: i64,
    /// Last update (ms)
    pub update_time: i64,
}

/// `/conversation/list` and `/conversation/search` response
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversationList {
    /// Conversations
    pub conversations: Vec<Conversation>,
    /// Cursor for the next page
    pub cursor: String,
    /// Whether more pages exist
    pub has_more: bool,
}

/// `/conversation/create` response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedConversation {
    /// New conversation id
    pub conversation_id: String,
    /// Set when the backend answered with code `1`
    #[serde(default)]
    pub new: bool,
}

/// How the account proves its identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    /// SMS code sent to the phone number
    #[default]
    Phone,
    /// Account password
    Password,
}

/// `/auth/verifyCode` and `/auth/login` identity
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthInfo {
    /// Phone number or account name
    pub auth_id: String,
    /// Credential kind
    pub auth_type: AuthType,
}

impl AuthInfo {
    /// Identity for the given account
    pub fn new(auth_id: impl Into<String>, auth_type: AuthType) -> Self {
        Self {
            auth_id: auth_id.into(),
            auth_type,
        }
    }
}

/// `/auth/login` body
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    /// Account identity
    #[serde(flatten)]
    pub info: &'a AuthInfo,
    /// SMS code or password
    pub verify: &'a str,
}

/// `/auth/login` response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// Token lifetime as sent by the backend
    pub expire: i64,
    /// Value for the `Authorization` header
    pub token: SecretString,
    /// Account id
    pub user_id: String,
    /// First login of this account (backend answered with code `1`)
    #[serde(default)]
    pub new: bool,
}
