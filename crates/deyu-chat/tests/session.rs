//! CompletionSession against in-memory transports

use async_trait::async_trait;
use bytes::Bytes;
use deyu_chat::api::MessageExt;
use deyu_chat::{
    ByteStream, ChatConfig, ChatStatus, CompletionRequest, CompletionSession,
    CompletionTransport, ConversationService, Error, Feedback, HistoryPage, MessageItem,
    NoticeLevel, RequestMessage, Result, Role, STREAM_ERROR_TEXT,
};
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Fakes
// ============================================================================

enum Script {
    /// Body chunks, then end of stream
    Body(Vec<Result<Bytes>>),
    /// `open` fails
    Fail(Error),
    /// Body chunks, then the stream never ends
    Hang(Vec<Bytes>),
}

#[derive(Default)]
struct FakeTransport {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl FakeTransport {
    fn with(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionTransport for FakeTransport {
    async fn open(&self, request: &CompletionRequest) -> Result<ByteStream> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Body(Vec::new()));
        match script {
            Script::Body(chunks) => Ok(stream::iter(chunks).boxed()),
            Script::Fail(e) => Err(e),
            Script::Hang(chunks) => Ok(stream::iter(chunks.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed()),
        }
    }
}

#[derive(Default)]
struct FakeService {
    pages: Mutex<VecDeque<HistoryPage>>,
    page_calls: AtomicUsize,
    feedback_fails: AtomicBool,
    feedback_calls: Mutex<Vec<(String, Feedback)>>,
    titles: Mutex<Vec<(String, Vec<RequestMessage>)>>,
    titles_hang: AtomicBool,
}

#[async_trait]
impl ConversationService for FakeService {
    async fn conversation_page(
        &self,
        _conversation_id: &str,
        _cursor: Option<&str>,
        _size: u32,
    ) -> Result<HistoryPage> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        self.pages
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::Network("no page".into()))
    }

    async fn feedback(&self, message_id: &str, feedback: Feedback) -> Result<()> {
        self.feedback_calls
            .lock()
            .unwrap()
            .push((message_id.to_string(), feedback));
        if self.feedback_fails.load(Ordering::SeqCst) {
            Err(Error::Api {
                code: 5,
                message: "nope".into(),
            })
        } else {
            Ok(())
        }
    }

    async fn generate_title(
        &self,
        conversation_id: &str,
        messages: &[RequestMessage],
    ) -> Result<()> {
        self.titles
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), messages.to_vec()));
        if self.titles_hang.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        Ok(())
    }
}

// ============================================================================
// Frame helpers
// ============================================================================

fn meta(message_id: &str, reply_id: &str) -> String {
    format!(
        "id: 1\nevent: meta\ndata: {{\"messageId\":\"{message_id}\",\"replyId\":\"{reply_id}\",\"conversationId\":\"c1\"}}\n"
    )
}

fn chat(text: &str) -> String {
    let inner = serde_json::json!({ "text": text }).to_string();
    let outer = serde_json::json!({ "message": { "content": inner, "contentType": 0 } });
    format!("id: 2\nevent: chat\ndata: {outer}\n")
}

fn think(text: &str) -> String {
    let inner = serde_json::json!({ "think": text }).to_string();
    let outer = serde_json::json!({ "message": { "content": inner, "contentType": 0 } });
    format!("id: 2\nevent: chat\ndata: {outer}\n")
}

fn end() -> String {
    "id: 9\nevent: end\ndata: {\"done\":true}\n".to_string()
}

fn body(parts: &[String]) -> Script {
    Script::Body(
        parts
            .iter()
            .map(|p| Ok(Bytes::from(p.clone())))
            .collect(),
    )
}

fn session(transport: Arc<FakeTransport>, service: Arc<FakeService>) -> CompletionSession {
    CompletionSession::new("c1", ChatConfig::default(), transport, service)
}

/// Poll `done` until it holds, yielding to spawned tasks in between
async fn eventually(done: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached");
}

fn history_item(id: &str, content: &str, user_type: i64) -> MessageItem {
    MessageItem {
        message_id: id.to_string(),
        content: content.to_string(),
        user_type,
        ext: MessageExt::default(),
        ..MessageItem::default()
    }
}

// ============================================================================
// Streaming
// ============================================================================

#[tokio::test]
async fn test_hello_scenario() {
    let transport = FakeTransport::with(vec![body(&[
        meta("m1", "u1"),
        chat("hi"),
        chat(" there"),
        end(),
    ])]);
    let session = session(transport.clone(), Arc::new(FakeService::default()));

    session.send_message("hello", Default::default()).await;

    let state = session.snapshot();
    assert_eq!(state.status(), ChatStatus::Ready);
    assert_eq!(state.messages().len(), 2);
    assert_eq!(state.messages()[0].id, "u1");
    assert_eq!(state.messages()[0].role, Role::User);
    assert_eq!(state.messages()[0].content, "hello");
    let answer = &state.messages()[1];
    assert_eq!(answer.id, "m1");
    assert_eq!(answer.content, "hi there");
    assert!(!answer.is_streaming);

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].messages[0].content, "hello");
    assert!(requests[0].completions_option.stream);
}

#[tokio::test]
async fn test_chunks_split_mid_line() {
    let full = [meta("m1", "u1"), think("let me "), think("see"), chat("ok"), end()].concat();
    let chunks = full
        .as_bytes()
        .chunks(7)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    let transport = FakeTransport::with(vec![Script::Body(chunks)]);
    let session = session(transport, Arc::new(FakeService::default()));

    session.send_message("q", Default::default()).await;

    let state = session.snapshot();
    let answer = state.message("m1").unwrap();
    assert_eq!(answer.think.as_deref(), Some("let me see"));
    assert_eq!(answer.content, "ok");
    assert!(answer.is_complete_think);
}

#[tokio::test]
async fn test_meta_after_chat_keeps_content() {
    let transport = FakeTransport::with(vec![body(&[
        chat("a"),
        chat("b"),
        meta("m1", "u1"),
        chat("c"),
    ])]);
    let session = session(transport, Arc::new(FakeService::default()));

    session.send_message("q", Default::default()).await;

    let state = session.snapshot();
    assert_eq!(state.messages().len(), 2);
    assert_eq!(state.messages()[1].id, "m1");
    assert_eq!(state.messages()[1].content, "abc");
    assert_eq!(state.last_user_id(), Some("u1"));
    assert_eq!(state.last_assistant_id(), Some("m1"));
}

#[tokio::test]
async fn test_unterminated_last_line_is_processed() {
    let last = chat("!");
    let transport = FakeTransport::with(vec![body(&[
        meta("m1", "u1"),
        chat("hi"),
        last.trim_end().to_string(),
    ])]);
    let session = session(transport, Arc::new(FakeService::default()));

    session.send_message("q", Default::default()).await;
    assert_eq!(session.snapshot().message("m1").unwrap().content, "hi!");
}

#[tokio::test]
async fn test_malformed_frame_is_skipped() {
    let transport = FakeTransport::with(vec![body(&[
        meta("m1", "u1"),
        chat("x"),
        "event: chat\ndata: {broken\n".to_string(),
        "event: suggest\ndata: {\"q\":[]}\n".to_string(),
        chat("y"),
        end(),
    ])]);
    let session = session(transport, Arc::new(FakeService::default()));

    session.send_message("q", Default::default()).await;

    let state = session.snapshot();
    assert_eq!(state.message("m1").unwrap().content, "xy");
    assert!(state.last_error().is_none());
}

#[tokio::test]
async fn test_stream_error_marks_message() {
    let transport = FakeTransport::with(vec![Script::Body(vec![
        Ok(Bytes::from(meta("m1", "u1"))),
        Ok(Bytes::from(chat("part"))),
        Err(Error::Network("reset".into())),
    ])]);
    let session = session(transport, Arc::new(FakeService::default()));

    session.send_message("q", Default::default()).await;

    let state = session.snapshot();
    let answer = state.message("m1").unwrap();
    assert_eq!(answer.content, STREAM_ERROR_TEXT);
    assert!(!answer.is_streaming);
    assert_eq!(state.last_error(), Some(STREAM_ERROR_TEXT));
    assert_eq!(state.status(), ChatStatus::Ready);
}

#[tokio::test]
async fn test_open_failure_appends_error_message() {
    let transport = FakeTransport::with(vec![Script::Fail(Error::Http {
        status: 500,
        message: "服务器内部错误".into(),
    })]);
    let session = session(transport, Arc::new(FakeService::default()));

    session.send_message("q", Default::default()).await;

    let state = session.snapshot();
    assert_eq!(state.messages().len(), 2);
    assert_eq!(state.messages()[1].role, Role::Assistant);
    assert_eq!(state.messages()[1].content, STREAM_ERROR_TEXT);
    assert!(state.messages().iter().all(|m| !m.is_streaming));
}

#[tokio::test]
async fn test_abort_keeps_applied_content() {
    let transport = FakeTransport::with(vec![Script::Hang(vec![
        Bytes::from(meta("m1", "u1")),
        Bytes::from(chat("partial")),
    ])]);
    let session = Arc::new(session(transport, Arc::new(FakeService::default())));
    let mut updates = session.subscribe();

    let task = tokio::spawn({
        let session = session.clone();
        async move { session.send_message("q", Default::default()).await }
    });
    updates
        .wait_for(|s| s.message("m1").is_some_and(|m| m.content == "partial"))
        .await
        .unwrap();

    session.abort();
    session.abort();
    task.await.unwrap();

    let state = session.snapshot();
    let answer = state.message("m1").unwrap();
    assert_eq!(answer.content, "partial");
    assert!(!answer.is_streaming);
    assert!(state.last_error().is_none());
    assert_eq!(state.status(), ChatStatus::Ready);
}

#[tokio::test]
async fn test_new_send_cancels_in_flight_stream() {
    let transport = FakeTransport::with(vec![
        Script::Hang(vec![Bytes::from(meta("m1", "u1")), Bytes::from(chat("one"))]),
        body(&[meta("m2", "u2"), chat("two"), end()]),
    ]);
    let session = Arc::new(session(transport, Arc::new(FakeService::default())));
    let mut updates = session.subscribe();

    let first = tokio::spawn({
        let session = session.clone();
        async move { session.send_message("first", Default::default()).await }
    });
    updates
        .wait_for(|s| s.status() == ChatStatus::Streaming)
        .await
        .unwrap();

    session.send_message("second", Default::default()).await;
    first.await.unwrap();

    let state = session.snapshot();
    let ids: Vec<_> = state.messages().iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["u1", "m1", "u2", "m2"]);
    assert_eq!(state.message("m1").unwrap().content, "one");
    assert_eq!(state.message("m2").unwrap().content, "two");
    assert!(state.messages().iter().all(|m| !m.is_streaming));
}

#[tokio::test]
async fn test_rollback_during_stream_cancels_it() {
    let transport = FakeTransport::with(vec![Script::Hang(vec![
        Bytes::from(meta("m1", "u1")),
        Bytes::from(chat("hi")),
    ])]);
    let session = Arc::new(session(transport, Arc::new(FakeService::default())));
    let mut updates = session.subscribe();

    let task = tokio::spawn({
        let session = session.clone();
        async move { session.send_message("q", Default::default()).await }
    });
    updates
        .wait_for(|s| s.message("m1").is_some_and(|m| m.content == "hi"))
        .await
        .unwrap();

    assert!(session.rollback_messages_to("u1", false));
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("stream kept running after rollback")
        .unwrap();

    let state = session.snapshot();
    assert!(state.messages().is_empty());
    assert!(state.streaming_message().is_none());
    assert_eq!(state.status(), ChatStatus::Ready);
}

// ============================================================================
// Branches and rollback
// ============================================================================

#[tokio::test]
async fn test_regenerate_collects_branch() {
    let transport = FakeTransport::with(vec![
        body(&[meta("m1", "u1"), chat("first"), end()]),
        body(&[meta("m2", "u1"), chat("second"), end()]),
    ]);
    let session = session(transport.clone(), Arc::new(FakeService::default()));

    session.send_message("q", Default::default()).await;
    assert!(session.regenerate().await);

    let state = session.snapshot();
    let branch: Vec<_> = state.branch().iter().map(|m| m.id.as_str()).collect();
    assert_eq!(branch, vec!["m1", "m2"]);
    let ids: Vec<_> = state.messages().iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["u1", "m2"]);
    assert_eq!(state.last_assistant_id(), Some("m2"));

    let regen = &transport.requests()[1];
    assert!(regen.completions_option.is_regen);
    assert_eq!(regen.reply_id.as_deref(), Some("u1"));
    assert_eq!(regen.messages[0].content, "q");
}

#[tokio::test]
async fn test_replace_after_regenerate_clears_branch() {
    let transport = FakeTransport::with(vec![
        body(&[meta("m1", "u1"), chat("first"), end()]),
        body(&[meta("m2", "u1"), chat("second"), end()]),
        body(&[meta("m3", "u3"), chat("third"), end()]),
    ]);
    let session = session(transport.clone(), Arc::new(FakeService::default()));

    session.send_message("q", Default::default()).await;
    session.regenerate().await;
    assert_eq!(session.snapshot().branch().len(), 2);

    assert!(session.replace("better question").await);

    let state = session.snapshot();
    assert!(state.branch().is_empty());
    let ids: Vec<_> = state.messages().iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["u3", "m3"]);
    assert_eq!(state.messages()[0].content, "better question");
    assert!(transport.requests()[2].completions_option.is_replace);
}

#[tokio::test]
async fn test_submit_promotes_selected_alternate() {
    let transport = FakeTransport::with(vec![
        body(&[meta("m1", "u1"), chat("first"), end()]),
        body(&[meta("m2", "u1"), chat("second"), end()]),
        body(&[meta("m4", "u4"), chat("next"), end()]),
    ]);
    let session = session(transport.clone(), Arc::new(FakeService::default()));

    session.send_message("q", Default::default()).await;
    session.regenerate().await;
    assert!(session.select_branch("m1"));
    assert!(!session.select_branch("zzz"));

    session.submit("follow up").await;

    let state = session.snapshot();
    let ids: Vec<_> = state.messages().iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["u1", "m1", "u4", "m4"]);
    assert_eq!(state.message("m1").unwrap().content, "first");
    assert!(state.branch().is_empty());
    assert_eq!(
        transport.requests()[2]
            .completions_option
            .selected_regen_id
            .as_deref(),
        Some("m1")
    );
}

#[tokio::test]
async fn test_regenerate_without_messages() {
    let transport = FakeTransport::with(vec![]);
    let session = session(transport.clone(), Arc::new(FakeService::default()));
    assert!(!session.regenerate().await);
    assert!(!session.replace("x").await);
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn test_rollback() {
    let transport = FakeTransport::with(vec![
        body(&[meta("m1", "u1"), chat("a"), end()]),
        body(&[meta("m2", "u2"), chat("b"), end()]),
    ]);
    let session = session(transport, Arc::new(FakeService::default()));
    session.send_message("one", Default::default()).await;
    session.send_message("two", Default::default()).await;

    let before = session.snapshot().messages().to_vec();
    assert!(!session.rollback_messages_to("unknown", true));
    assert_eq!(session.snapshot().messages(), &before[..]);

    assert!(session.rollback_messages_to("u2", false));
    assert_eq!(session.snapshot().messages(), &before[..2]);
}

// ============================================================================
// History, feedback, titles
// ============================================================================

#[tokio::test]
async fn test_fetch_earlier() {
    let service = Arc::new(FakeService::default());
    let mut assistant = history_item("a1", "answer", 1);
    assistant.ext.bot_state =
        r#"{"model":"deyu-qyds","bot_id":"b","bot_name":"引航号"}"#.to_string();
    service.pages.lock().unwrap().push_back(HistoryPage {
        has_more: false,
        message_list: Some(vec![
            assistant,
            history_item("u1", "question", 2),
        ]),
        regen_list: Some(vec![MessageItem {
            ext: MessageExt {
                brief: "alt answer".into(),
                ..MessageExt::default()
            },
            ..history_item("r1", "", 1)
        }]),
        cursor: "next".into(),
    });
    let session = session(FakeTransport::with(vec![]), service.clone());

    assert_eq!(session.fetch_earlier().await.unwrap(), 2);

    let state = session.snapshot();
    let ids: Vec<_> = state.messages().iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["u1", "a1"]);
    assert_eq!(state.branch()[0].content, "alt answer");
    assert_eq!(state.model(), "deyu-qyds");
    assert_eq!(state.model_name(), Some("引航号"));
    assert!(!state.has_more());

    assert_eq!(session.fetch_earlier().await.unwrap(), 0);
    assert_eq!(service.page_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_fetch_earlier_failure_notifies() {
    let session = session(FakeTransport::with(vec![]), Arc::new(FakeService::default()));
    let mut notices = session.notices();

    assert!(session.fetch_earlier().await.is_err());
    let notice = notices.recv().await.unwrap();
    assert_eq!(notice.level, NoticeLevel::Error);
    assert_eq!(notice.message, "网络连接失败");
}

#[tokio::test]
async fn test_feedback() {
    let service = Arc::new(FakeService::default());
    let transport = FakeTransport::with(vec![body(&[meta("m1", "u1"), chat("a"), end()])]);
    let session = session(transport, service.clone());
    session.send_message("q", Default::default()).await;
    let mut notices = session.notices();

    assert!(session.handle_feedback("m1", Feedback::Like, false).await);
    assert_eq!(session.snapshot().message("m1").unwrap().feedback, Feedback::Like);
    assert_eq!(notices.recv().await.unwrap().message, "反馈成功！");

    service.feedback_fails.store(true, Ordering::SeqCst);
    assert!(!session.handle_feedback("m1", Feedback::Dislike, false).await);
    let notice = notices.recv().await.unwrap();
    assert_eq!(notice.level, NoticeLevel::Error);
    assert_eq!(notice.message, "反馈失败!");

    let calls = service.feedback_calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![
            ("m1".to_string(), Feedback::Like),
            ("m1".to_string(), Feedback::Dislike)
        ]
    );
}

#[tokio::test]
async fn test_title_generated_once_for_new_conversation() {
    let service = Arc::new(FakeService::default());
    let transport = FakeTransport::with(vec![
        body(&[meta("m1", "u1"), chat("a"), end()]),
        body(&[meta("m2", "u2"), chat("b"), end()]),
    ]);
    let invalidations = Arc::new(AtomicUsize::new(0));
    let counter = invalidations.clone();
    let session = CompletionSession::for_new_conversation(
        "c-new",
        ChatConfig::default(),
        transport,
        service.clone(),
    )
    .on_conversations_changed(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    session.send_message("first", Default::default()).await;
    session.send_message("second", Default::default()).await;
    eventually(|| invalidations.load(Ordering::SeqCst) > 0).await;

    let titles = service.titles.lock().unwrap().clone();
    assert_eq!(titles.len(), 1);
    assert_eq!(titles[0].0, "c-new");
    assert_eq!(titles[0].1[0].content, "first");
    assert_eq!(invalidations.load(Ordering::SeqCst), 1);
    assert_eq!(session.fetch_earlier().await.unwrap(), 0);
}

#[tokio::test]
async fn test_pending_title_does_not_block_next_send() {
    let service = Arc::new(FakeService::default());
    service.titles_hang.store(true, Ordering::SeqCst);
    let transport = FakeTransport::with(vec![
        body(&[meta("m1", "u1"), chat("a"), end()]),
        body(&[meta("m2", "u2"), chat("b"), end()]),
    ]);
    let session = CompletionSession::for_new_conversation(
        "c-new",
        ChatConfig::default(),
        transport,
        service.clone(),
    );

    session.send_message("first", Default::default()).await;
    assert_eq!(session.status(), ChatStatus::Ready);

    tokio::time::timeout(
        Duration::from_secs(2),
        session.send_message("again", Default::default()),
    )
    .await
    .expect("second send waited for the title");

    let state = session.snapshot();
    let ids: Vec<_> = state.messages().iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["u1", "m1", "u2", "m2"]);
    assert_eq!(service.titles.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_existing_conversation_skips_title() {
    let service = Arc::new(FakeService::default());
    let transport = FakeTransport::with(vec![body(&[meta("m1", "u1"), chat("a"), end()])]);
    let session = session(transport, service.clone());
    session.send_message("q", Default::default()).await;
    assert!(service.titles.lock().unwrap().is_empty());
}
