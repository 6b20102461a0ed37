//! Conversation state reducer
//!
//! [`ConversationState`] is the whole observable state of one conversation:
//! the ordered message list, the branch list of regenerated alternates, the
//! last user / assistant references and the stream status. Every operation
//! here is synchronous and is applied by the session inside a single
//! `watch::Sender::send_modify`, so observers never see half of an id
//! rebinding or a fragment applied to the wrong message.

use crate::agents;
use crate::message::{optimistic_id, ChatMessage, Feedback, Role};
use crate::frame::MetaPayload;
use crate::request::SendOptions;

/// Completion status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatStatus {
    /// Idle, accepting a new message
    #[default]
    Ready,
    /// Request sent, waiting for the server to acknowledge
    Submitted,
    /// Assistant message is receiving fragments
    Streaming,
}

/// A page of older history, as returned by the server (newest first)
#[derive(Debug, Clone, Default)]
pub struct EarlierPage {
    /// Messages, newest first
    pub messages: Vec<ChatMessage>,
    /// Alternates of the last turn, newest first
    pub regen_list: Vec<ChatMessage>,
    /// Cursor for the next (older) page
    pub cursor: Option<String>,
    /// Whether older pages exist
    pub has_more: bool,
}

/// Observable state of one conversation
#[derive(Debug, Clone)]
pub struct ConversationState {
    conversation_id: String,
    messages: Vec<ChatMessage>,
    branch: Vec<ChatMessage>,
    selected_branch: Option<String>,
    last_user_id: Option<String>,
    last_assistant_id: Option<String>,
    streaming_id: Option<String>,
    pending_user_id: Option<String>,
    assistant_bound: bool,
    detached: bool,
    status: ChatStatus,
    model: String,
    model_name: Option<String>,
    cursor: Option<String>,
    has_more: bool,
    history_loaded: bool,
    last_error: Option<String>,
}

impl ConversationState {
    /// Empty state for a conversation
    pub fn new(conversation_id: impl Into<String>, model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            conversation_id: conversation_id.into(),
            messages: Vec::new(),
            branch: Vec::new(),
            selected_branch: None,
            last_user_id: None,
            last_assistant_id: None,
            streaming_id: None,
            pending_user_id: None,
            assistant_bound: false,
            detached: false,
            status: ChatStatus::Ready,
            model_name: agents::display_name(&model).map(str::to_string),
            model,
            cursor: None,
            has_more: true,
            history_loaded: false,
            last_error: None,
        }
    }

    // -- accessors --------------------------------------------------------

    /// Conversation id
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Messages, oldest first
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Look up a message by id
    pub fn message(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Alternates of the current turn
    pub fn branch(&self) -> &[ChatMessage] {
        &self.branch
    }

    /// Alternate chosen by the user
    pub fn selected_branch(&self) -> Option<&str> {
        self.selected_branch.as_deref()
    }

    /// Id of the most recent user message
    pub fn last_user_id(&self) -> Option<&str> {
        self.last_user_id.as_deref()
    }

    /// Id of the most recent assistant message
    pub fn last_assistant_id(&self) -> Option<&str> {
        self.last_assistant_id.as_deref()
    }

    /// The message currently receiving fragments
    pub fn streaming_message(&self) -> Option<&ChatMessage> {
        self.streaming_id.as_deref().and_then(|id| self.message(id))
    }

    /// Completion status
    pub fn status(&self) -> ChatStatus {
        self.status
    }

    /// Active model id
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Display name of the active model, for persona agents
    pub fn model_name(&self) -> Option<&str> {
        self.model_name.as_deref()
    }

    /// History cursor
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Whether older history can be fetched
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Error text of the last failed completion
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    // -- turn lifecycle -----------------------------------------------------

    /// Set the active model
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
        self.model_name = agents::display_name(&self.model).map(str::to_string);
    }

    /// Mark history as exhausted (new conversations have none)
    pub fn set_has_more(&mut self, has_more: bool) {
        self.has_more = has_more;
    }

    /// Prepare branch state for a new turn and enter `Submitted`.
    ///
    /// Replace discards alternates; regeneration moves the displayed answer
    /// into the branch list; a normal turn promotes the selected alternate
    /// (if any) and starts a fresh branch list.
    pub fn prepare_turn(&mut self, options: &SendOptions) {
        self.status = ChatStatus::Submitted;
        self.last_error = None;
        self.assistant_bound = false;
        self.detached = false;
        self.pending_user_id = None;

        if options.is_replace {
            self.clear_branch();
        } else if options.is_regen {
            self.begin_regeneration();
        } else if let Some(selected) = &options.selected_regen_id {
            self.promote_selected_branch(selected);
        } else {
            self.clear_branch();
        }
    }

    /// Append the user message under an optimistic id
    pub fn push_user(&mut self, content: impl Into<String>) -> String {
        let id = optimistic_id();
        self.messages.push(ChatMessage::user(id.clone(), content));
        self.last_user_id = Some(id.clone());
        self.pending_user_id = Some(id.clone());
        id
    }

    /// Append the streaming assistant message and enter `Streaming`
    pub fn start_assistant(&mut self, id: impl Into<String>) {
        self.push_assistant(id.into());
        self.status = ChatStatus::Streaming;
    }

    fn push_assistant(&mut self, id: String) {
        if let Some(prev) = self.streaming_id.take() {
            if let Some(msg) = self.messages.iter_mut().find(|m| m.id == prev) {
                msg.is_streaming = false;
            }
        }
        let mut msg = ChatMessage::assistant_placeholder(id.clone());
        msg.reply_id = self.pending_user_id.clone();
        self.messages.push(msg);
        self.last_assistant_id = Some(id.clone());
        self.streaming_id = Some(id);
    }

    /// Apply a `meta` frame.
    ///
    /// Creates the assistant placeholder under the canonical id, or rebinds
    /// the optimistic placeholder if chat frames got there first. The
    /// optimistic user id is rebound to `replyId`. If the open turn was
    /// rolled away, no new placeholder is created.
    pub fn apply_meta(&mut self, meta: &MetaPayload) {
        if self.detached {
            return;
        }
        if !self.assistant_bound && !meta.message_id.is_empty() {
            match self.streaming_id.clone() {
                None => self.start_assistant(meta.message_id.clone()),
                Some(current) => {
                    self.rebind(&current, &meta.message_id);
                    self.status = ChatStatus::Streaming;
                }
            }
            self.assistant_bound = true;
        }

        if let Some(reply_id) = meta.reply_id.as_deref().filter(|r| !r.is_empty()) {
            match self.pending_user_id.clone() {
                Some(pending) if pending != reply_id => self.rebind(&pending, reply_id),
                Some(_) => {}
                None => self.pending_user_id = Some(reply_id.to_string()),
            }
            if let Some(id) = self.streaming_id.clone() {
                if let Some(msg) = self.messages.iter_mut().find(|m| m.id == id) {
                    msg.reply_id = Some(reply_id.to_string());
                }
            }
        }
    }

    /// Append fragments to the streaming assistant message.
    ///
    /// Fragments that arrive before `meta` go to an optimistic placeholder;
    /// the status stays `Submitted` until `meta` binds it. Once the open turn
    /// has been rolled away, fragments are dropped.
    pub fn append_fragment(&mut self, text: Option<&str>, think: Option<&str>) {
        let has_text = text.is_some_and(|t| !t.is_empty());
        let has_think = think.is_some_and(|t| !t.is_empty());
        if !has_text && !has_think {
            return;
        }
        if self.streaming_id.is_none() {
            if self.detached || self.status != ChatStatus::Submitted {
                return;
            }
            self.push_assistant(optimistic_id());
        }
        let Some(id) = self.streaming_id.as_deref() else {
            return;
        };
        if let Some(msg) = self.messages.iter_mut().find(|m| m.id == id) {
            msg.append(text, think);
        }
    }

    /// Clear the streaming flag and return to `Ready`.
    ///
    /// Returns the finished assistant message, if one was streaming.
    pub fn finish_stream(&mut self) -> Option<ChatMessage> {
        self.status = ChatStatus::Ready;
        self.pending_user_id = None;
        let id = self.streaming_id.take()?;
        let msg = self.messages.iter_mut().find(|m| m.id == id)?;
        msg.is_streaming = false;
        Some(msg.clone())
    }

    /// Mark the turn as failed with a user-facing error text.
    ///
    /// The streaming assistant message gets `text` as its content; if the
    /// failure happened before any assistant message existed, one is
    /// appended.
    pub fn fail_stream(&mut self, text: &str) {
        if self.streaming_id.is_none() && !self.detached {
            self.push_assistant(optimistic_id());
        }
        if let Some(id) = self.streaming_id.take() {
            if let Some(msg) = self.messages.iter_mut().find(|m| m.id == id) {
                msg.content = text.to_string();
                msg.is_streaming = false;
            }
        }
        self.last_error = Some(text.to_string());
        self.pending_user_id = None;
        self.status = ChatStatus::Ready;
    }

    /// Stop streaming without touching content
    pub fn abort_stream(&mut self) {
        if let Some(id) = self.streaming_id.take() {
            if let Some(msg) = self.messages.iter_mut().find(|m| m.id == id) {
                msg.is_streaming = false;
            }
        }
        self.pending_user_id = None;
        self.status = ChatStatus::Ready;
    }

    // -- list edits -------------------------------------------------------

    /// Truncate to the messages strictly before `id`.
    ///
    /// With `preserve_branch` the last assistant message is first copied
    /// into the branch list. Unknown ids leave the state untouched and
    /// return `false`.
    pub fn rollback_to(&mut self, id: &str, preserve_branch: bool) -> bool {
        let Some(index) = self.messages.iter().position(|m| m.id == id) else {
            return false;
        };
        if preserve_branch {
            let last = self
                .last_assistant_id
                .as_deref()
                .and_then(|la| self.messages.iter().find(|m| m.id == la))
                .cloned();
            if let Some(mut last) = last {
                last.is_streaming = false;
                self.record_regenerated(last);
            }
        }
        self.messages.truncate(index);
        if self.status != ChatStatus::Ready {
            // the open turn's messages are gone; its remaining frames have
            // nowhere to go
            self.detached = true;
            self.streaming_id = None;
            self.pending_user_id = None;
        }
        true
    }

    /// Whether a rollback removed the turn that is still open
    pub fn turn_detached(&self) -> bool {
        self.detached && self.status != ChatStatus::Ready
    }

    /// Replace id `from` with `to` in every place that refers to it
    pub fn rebind(&mut self, from: &str, to: &str) {
        if from == to {
            return;
        }
        for msg in self.messages.iter_mut().chain(self.branch.iter_mut()) {
            if msg.id == from {
                msg.id = to.to_string();
            }
            if msg.reply_id.as_deref() == Some(from) {
                msg.reply_id = Some(to.to_string());
            }
        }
        for slot in [
            &mut self.selected_branch,
            &mut self.last_user_id,
            &mut self.last_assistant_id,
            &mut self.streaming_id,
            &mut self.pending_user_id,
        ] {
            if slot.as_deref() == Some(from) {
                *slot = Some(to.to_string());
            }
        }
    }

    // -- branches -----------------------------------------------------------

    /// Move the displayed assistant answer into the branch list and clear
    /// the selection pointer
    pub fn begin_regeneration(&mut self) {
        let displayed = self
            .last_assistant_id
            .as_deref()
            .and_then(|id| self.messages.iter().find(|m| m.id == id))
            .cloned();
        if let Some(displayed) = displayed {
            self.record_regenerated(displayed);
        }
        self.selected_branch = None;
    }

    /// Append an alternate, ignoring duplicates
    pub fn record_regenerated(&mut self, msg: ChatMessage) {
        if !self.branch.iter().any(|m| m.id == msg.id) {
            self.branch.push(msg);
        }
    }

    /// Drop every alternate
    pub fn clear_branch(&mut self) {
        self.branch.clear();
        self.selected_branch = None;
    }

    /// Choose an alternate; `false` if `id` is not in the branch list
    pub fn select_branch(&mut self, id: &str) -> bool {
        if self.branch.iter().any(|m| m.id == id) {
            self.selected_branch = Some(id.to_string());
            true
        } else {
            false
        }
    }

    /// Alternate to report as `selectedRegenId`: the chosen one, otherwise
    /// the newest
    pub fn selected_regen_id(&self) -> Option<String> {
        self.selected_branch
            .clone()
            .or_else(|| self.branch.last().map(|m| m.id.clone()))
    }

    /// Show the chosen alternate in place of the displayed answer and start
    /// a fresh branch list
    pub fn promote_selected_branch(&mut self, id: &str) {
        let chosen = self.branch.iter().find(|m| m.id == id).cloned();
        if let (Some(mut chosen), Some(displayed)) = (chosen, self.last_assistant_id.clone()) {
            if let Some(slot) = self.messages.iter_mut().find(|m| m.id == displayed) {
                chosen.is_streaming = false;
                *slot = chosen;
                self.last_assistant_id = Some(id.to_string());
            }
        }
        self.clear_branch();
    }

    // -- history & feedback -------------------------------------------------

    /// Merge a page of older history ahead of the current list.
    ///
    /// Returns the number of messages added. The first page also seeds the
    /// branch list, the last user / assistant references and the model.
    pub fn merge_earlier(&mut self, page: EarlierPage) -> usize {
        let first = !self.history_loaded;
        self.history_loaded = true;
        self.cursor = page.cursor;
        self.has_more = page.has_more;

        let mut older: Vec<ChatMessage> = Vec::with_capacity(page.messages.len());
        for msg in page.messages.into_iter().rev() {
            if msg.content.is_empty()
                || self.messages.iter().any(|m| m.id == msg.id)
                || older.iter().any(|m| m.id == msg.id)
            {
                continue;
            }
            older.push(msg);
        }

        if first {
            if self.last_user_id.is_none() {
                self.last_user_id = older
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.id.clone());
            }
            if self.last_assistant_id.is_none() {
                self.last_assistant_id = older
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::Assistant)
                    .map(|m| m.id.clone());
            }
            if self.branch.is_empty() {
                for msg in page.regen_list.into_iter().rev() {
                    self.record_regenerated(msg);
                }
            }
            let inferred = older
                .iter()
                .find_map(|m| m.bot_state.as_ref().map(|b| b.model.clone()));
            if let Some(model) = inferred {
                self.set_model(model);
            }
        }

        let added = older.len();
        if added > 0 {
            older.append(&mut self.messages);
            self.messages = older;
        }
        added
    }

    /// Set the feedback of a message in the list or the branch list
    pub fn set_feedback(&mut self, id: &str, feedback: Feedback, for_branch: bool) -> bool {
        let list = if for_branch {
            &mut self.branch
        } else {
            &mut self.messages
        };
        match list.iter_mut().find(|m| m.id == id) {
            Some(msg) => {
                msg.feedback = feedback;
                true
            }
            None => false,
        }
    }
}
