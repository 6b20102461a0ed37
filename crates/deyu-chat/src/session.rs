//! Streaming completion session
//!
//! One [`CompletionSession`] drives one conversation. It owns the
//! [`ConversationState`] (published through a `watch` channel), runs at most
//! one completion stream at a time and turns every transport or protocol
//! failure into message state or a [`Notice`] instead of an error.

use crate::config::ChatConfig;
use crate::error::{Error, Result};
use crate::frame::{FrameDecoder, FramePayload, StreamFrame};
use crate::message::Feedback;
use crate::notice::Notice;
use crate::request::{CompletionRequest, SendOptions};
use crate::state::{ChatStatus, ConversationState, EarlierPage};
use crate::transport::{CompletionTransport, ConversationService};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Content shown in place of an answer whose stream failed
pub const STREAM_ERROR_TEXT: &str = "抱歉，发生了错误，请重试。";

const NOTICE_CAPACITY: usize = 32;

type InvalidateFn = Arc<dyn Fn() + Send + Sync>;

struct InFlight {
    generation: u64,
    token: CancellationToken,
}

/// Per-conversation chat session
pub struct CompletionSession {
    conversation_id: String,
    config: ChatConfig,
    transport: Arc<dyn CompletionTransport>,
    service: Arc<dyn ConversationService>,
    state: watch::Sender<ConversationState>,
    notices: broadcast::Sender<Notice>,
    in_flight: Mutex<Option<InFlight>>,
    generation: AtomicU64,
    stream_lock: tokio::sync::Mutex<()>,
    fetch_lock: tokio::sync::Mutex<()>,
    title_pending: AtomicBool,
    on_invalidate: Option<InvalidateFn>,
}

impl CompletionSession {
    /// Session for an existing conversation; history is loaded with
    /// [`fetch_earlier`](Self::fetch_earlier)
    pub fn new(
        conversation_id: impl Into<String>,
        config: ChatConfig,
        transport: Arc<dyn CompletionTransport>,
        service: Arc<dyn ConversationService>,
    ) -> Self {
        let conversation_id = conversation_id.into();
        let state = ConversationState::new(conversation_id.clone(), config.model.clone());
        let (state, _) = watch::channel(state);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        Self {
            conversation_id,
            config,
            transport,
            service,
            state,
            notices,
            in_flight: Mutex::new(None),
            generation: AtomicU64::new(0),
            stream_lock: tokio::sync::Mutex::new(()),
            fetch_lock: tokio::sync::Mutex::new(()),
            title_pending: AtomicBool::new(false),
            on_invalidate: None,
        }
    }

    /// Session for a conversation created just now.
    ///
    /// There is no history to fetch, and the first completed exchange
    /// generates the conversation title.
    pub fn for_new_conversation(
        conversation_id: impl Into<String>,
        config: ChatConfig,
        transport: Arc<dyn CompletionTransport>,
        service: Arc<dyn ConversationService>,
    ) -> Self {
        let session = Self::new(conversation_id, config, transport, service);
        session.state.send_modify(|s| s.set_has_more(false));
        session.title_pending.store(true, Ordering::SeqCst);
        session
    }

    /// Callback run after the conversation list changed (a new conversation
    /// got its title)
    #[must_use]
    pub fn on_conversations_changed(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_invalidate = Some(Arc::new(callback));
        self
    }

    /// Conversation id
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Observe state changes
    pub fn subscribe(&self) -> watch::Receiver<ConversationState> {
        self.state.subscribe()
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> ConversationState {
        self.state.borrow().clone()
    }

    /// Current completion status
    pub fn status(&self) -> ChatStatus {
        self.state.borrow().status()
    }

    /// Receive user-visible notices
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    fn notify(&self, notice: Notice) {
        // no subscribers is fine
        let _ = self.notices.send(notice);
    }

    // -- sending ------------------------------------------------------------

    /// Send a message and stream the answer.
    ///
    /// Any stream already in flight is cancelled and allowed to settle
    /// first. Failures end up in the message list, never in the return
    /// value.
    pub async fn send_message(&self, content: &str, options: SendOptions) {
        let Some((generation, token, _guard)) = self.acquire().await else {
            return;
        };
        self.run_turn(generation, &token, content, options).await;
    }

    /// Send a normal turn, carrying the selected alternate (or the newest
    /// one) when the last turn was regenerated
    pub async fn submit(&self, content: &str) {
        let selected = self.state.borrow().selected_regen_id();
        let mut options = SendOptions::default();
        options.selected_regen_id = selected;
        self.send_message(content, options).await;
    }

    /// Regenerate the answer to the last user message.
    ///
    /// The displayed answer is kept in the branch list. Returns `false` if
    /// there is no user message to regenerate for.
    pub async fn regenerate(&self) -> bool {
        let Some((generation, token, _guard)) = self.acquire().await else {
            return false;
        };
        let Some((user_id, content)) = self.last_user_message() else {
            self.release(generation);
            return false;
        };
        self.state.send_modify(|s| {
            s.rollback_to(&user_id, true);
        });
        let options = SendOptions::regen(user_id);
        self.run_turn(generation, &token, &content, options).await;
        true
    }

    /// Replace the last user message with `content` and answer it again.
    ///
    /// Alternates of the replaced turn are discarded. Returns `false` if
    /// there is no user message to replace.
    pub async fn replace(&self, content: &str) -> bool {
        let Some((generation, token, _guard)) = self.acquire().await else {
            return false;
        };
        let Some((user_id, _)) = self.last_user_message() else {
            self.release(generation);
            return false;
        };
        self.state.send_modify(|s| {
            s.rollback_to(&user_id, false);
        });
        self.run_turn(generation, &token, content, SendOptions::replace())
            .await;
        true
    }

    /// Cancel the in-flight stream, keeping whatever was already applied.
    ///
    /// Safe to call at any time; without a stream in flight it does nothing.
    pub fn abort(&self) {
        let in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(in_flight) = in_flight {
            info!(conversation_id = %self.conversation_id, "aborting completion stream");
            in_flight.token.cancel();
            self.state.send_modify(|s| s.abort_stream());
        }
    }

    fn last_user_message(&self) -> Option<(String, String)> {
        let state = self.state.borrow();
        let id = state.last_user_id()?;
        let msg = state.message(id)?;
        Some((msg.id.clone(), msg.content.clone()))
    }

    /// Cancel the previous stream, then wait for it to release the stream
    /// lock. `None` if another call superseded this one while waiting.
    async fn acquire(&self) -> Option<(u64, CancellationToken, MutexGuard<'_, ()>)> {
        let token = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = self
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(InFlight {
                generation,
                token: token.clone(),
            });
        if let Some(previous) = previous {
            debug!("cancelling previous completion stream");
            previous.token.cancel();
        }

        let guard = self.stream_lock.lock().await;
        if token.is_cancelled() {
            debug!("completion request superseded before it started");
            return None;
        }
        Some((generation, token, guard))
    }

    fn release(&self, generation: u64) {
        let mut slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|f| f.generation == generation) {
            *slot = None;
        }
    }

    async fn run_turn(
        &self,
        generation: u64,
        token: &CancellationToken,
        content: &str,
        options: SendOptions,
    ) {
        let model = self.state.borrow().model().to_string();
        let request =
            CompletionRequest::new(&self.config, &model, &self.conversation_id, content, &options);

        info!(
            conversation_id = %self.conversation_id,
            model = %model,
            is_regen = options.is_regen,
            is_replace = options.is_replace,
            "sending message"
        );
        self.state.send_modify(|s| {
            s.prepare_turn(&options);
            s.push_user(content);
        });

        match self.run_stream(&request, token).await {
            Ok(()) => {
                self.state.send_modify(|s| {
                    let finished = s.finish_stream();
                    if options.is_regen {
                        if let Some(finished) = finished {
                            s.record_regenerated(finished);
                        }
                    }
                });
                self.release(generation);
                self.after_first_exchange(&request);
            }
            Err(Error::Cancelled) => {
                debug!(conversation_id = %self.conversation_id, "completion stream cancelled");
                self.state.send_modify(|s| s.abort_stream());
                self.release(generation);
            }
            Err(e) => {
                error!(
                    conversation_id = %self.conversation_id,
                    error = %e,
                    "completion stream failed"
                );
                self.state.send_modify(|s| s.fail_stream(STREAM_ERROR_TEXT));
                self.release(generation);
            }
        }
    }

    async fn run_stream(&self, request: &CompletionRequest, token: &CancellationToken) -> Result<()> {
        let mut stream = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::Cancelled),
            opened = self.transport.open(request) => opened?,
        };

        let mut decoder = FrameDecoder::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::Cancelled),
                next = stream.next() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    if self.apply_frames(decoder.push(&chunk)) {
                        return Ok(());
                    }
                }
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }

        self.apply_frames(decoder.finish());
        Ok(())
    }

    /// Apply decoded frames in one state transition; `true` once `end` is seen
    fn apply_frames(&self, frames: Vec<StreamFrame>) -> bool {
        if frames.is_empty() {
            return false;
        }

        let mut payloads = Vec::with_capacity(frames.len());
        let mut ended = false;
        for frame in frames {
            match frame.decode() {
                Ok(FramePayload::Meta(meta)) => {
                    debug!(message_id = %meta.message_id, reply_id = ?meta.reply_id, "meta");
                    payloads.push(FramePayload::Meta(meta));
                }
                Ok(FramePayload::Model(model)) => {
                    info!(model = %model.model, bot = ?model.bot_name, "model");
                }
                Ok(FramePayload::Chat(content)) => payloads.push(FramePayload::Chat(content)),
                Ok(FramePayload::End) => {
                    ended = true;
                    break;
                }
                Ok(FramePayload::Unknown(name)) => debug!(event = %name, "ignoring unknown event"),
                Err(e) => warn!(error = %e, frame_id = ?frame.id, "skipping malformed frame"),
            }
        }

        if !payloads.is_empty() {
            self.state.send_modify(|s| {
                for payload in &payloads {
                    match payload {
                        FramePayload::Meta(meta) => s.apply_meta(meta),
                        FramePayload::Chat(c) => {
                            s.append_fragment(c.text.as_deref(), c.think.as_deref());
                        }
                        _ => {}
                    }
                }
            });
        }
        ended
    }

    /// Title a new conversation in the background; the next turn does not
    /// wait for it
    fn after_first_exchange(&self, request: &CompletionRequest) {
        if !self.title_pending.swap(false, Ordering::SeqCst) {
            return;
        }
        let service = self.service.clone();
        let invalidate = self.on_invalidate.clone();
        let conversation_id = self.conversation_id.clone();
        let messages = request.messages.clone();

        tokio::spawn(async move {
            match service.generate_title(&conversation_id, &messages).await {
                Ok(()) => info!(conversation_id = %conversation_id, "conversation title generated"),
                Err(e) => warn!(error = %e, "failed to generate conversation title"),
            }
            if let Some(invalidate) = invalidate {
                invalidate();
            }
        });
    }

    // -- list operations ------------------------------------------------------

    /// Truncate to the messages strictly before `id`; see
    /// [`ConversationState::rollback_to`].
    ///
    /// Rolling back over the turn that is still streaming cancels it.
    pub fn rollback_messages_to(&self, id: &str, preserve_branch: bool) -> bool {
        let mut detached = false;
        let changed = self.state.send_if_modified(|s| {
            let changed = s.rollback_to(id, preserve_branch);
            detached = s.turn_detached();
            changed
        });
        if detached {
            debug!(conversation_id = %self.conversation_id, "rolled back over the open turn");
            self.abort();
        }
        changed
    }

    /// Choose an alternate of the current turn
    pub fn select_branch(&self, id: &str) -> bool {
        self.state.send_if_modified(|s| s.select_branch(id))
    }

    /// Load the next page of older messages.
    ///
    /// Returns the number of messages added (0 once history is exhausted).
    pub async fn fetch_earlier(&self) -> Result<usize> {
        let _guard = self.fetch_lock.lock().await;
        let (cursor, has_more) = {
            let state = self.state.borrow();
            (state.cursor().map(str::to_string), state.has_more())
        };
        if !has_more {
            return Ok(0);
        }

        let page = match self
            .service
            .conversation_page(&self.conversation_id, cursor.as_deref(), self.config.page_size)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(conversation_id = %self.conversation_id, error = %e, "failed to fetch history");
                self.notify(Notice::error(e.user_message()));
                return Err(e);
            }
        };

        let page = EarlierPage::from(page);
        let mut added = 0;
        self.state.send_modify(|s| added = s.merge_earlier(page));
        debug!(conversation_id = %self.conversation_id, added, "merged earlier messages");
        Ok(added)
    }

    /// Rate a message.
    ///
    /// The local state is updated right away; the outcome of the server
    /// call is reported as a notice and returned.
    pub async fn handle_feedback(&self, message_id: &str, feedback: Feedback, for_branch: bool) -> bool {
        self.state
            .send_if_modified(|s| s.set_feedback(message_id, feedback, for_branch));

        match self.service.feedback(message_id, feedback).await {
            Ok(()) => {
                self.notify(Notice::success("反馈成功！"));
                true
            }
            Err(e) => {
                warn!(message_id, error = %e, "feedback failed");
                self.notify(Notice::error("反馈失败!"));
                false
            }
        }
    }
}

impl std::fmt::Debug for CompletionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionSession")
            .field("conversation_id", &self.conversation_id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
