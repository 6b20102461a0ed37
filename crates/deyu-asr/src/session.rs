//! Recognition session
//!
//! [`AsrSession`] owns one voice-input lifecycle at a time:
//!
//! ```text
//! idle → pending → recognizing → idle
//! ```
//!
//! `start()` connects the recognition socket, authenticates, sends the start
//! marker and opens the microphone. A pump task then resamples captured
//! audio, frames it into fixed-size PCM chunks and forwards server results to
//! the transcript callback. Failures are fed through [`transition`], which
//! may switch to the local fallback recognizer.
//!
//! Every resource acquired for a run is tagged with a generation number;
//! callbacks from an earlier run are ignored once `cleanup()` has bumped it.

use crate::capture::{AudioCapture, CaptureHandle, CaptureStream, CpalCapture};
use crate::chunker::PcmChunker;
use crate::config::{AsrConfig, OverflowPolicy};
use crate::error::Error;
use crate::fallback::{
    RecognitionEvent, RecognizerHandle, RecognizerStream, SpeechRecognizer,
    UnsupportedRecognizer, WhisperRecognizer,
};
use crate::mode::{transition, Action, RecognitionMode, Trigger};
use crate::notice::{Notice, NoticeLevel};
use crate::protocol::{
    auth_frame, encode_pcm, AsrResponse, FallbackTranscript, TranscriptAccumulator, END_MARKER,
    START_MARKER,
};
use crate::resample::LinearResampler;
use crate::transport::{AsrConnection, AsrTransport, InboundEvent, OutboundFrame, WsTransport};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Session lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AsrStatus {
    /// Nothing running
    #[default]
    Idle,
    /// Connecting and opening the microphone
    Pending,
    /// Audio is being recognized
    Recognizing,
}

type TranscriptFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Everything a run holds; `None` once released
#[derive(Default)]
struct Resources {
    generation: u64,
    mode: RecognitionMode,
    error: Option<String>,
    capture: Option<Box<dyn CaptureHandle>>,
    recognizer: Option<Box<dyn RecognizerHandle>>,
    tasks: Option<CancellationToken>,
    stopping: Option<CancellationToken>,
    stop_timer: Option<JoinHandle<()>>,
}

struct Inner {
    config: AsrConfig,
    token: String,
    transport: Arc<dyn AsrTransport>,
    capture: Arc<dyn AudioCapture>,
    recognizer: Arc<dyn SpeechRecognizer>,
    on_transcript: TranscriptFn,
    status: watch::Sender<AsrStatus>,
    notices: broadcast::Sender<Notice>,
    dropped_chunks: AtomicU64,
    resources: Mutex<Resources>,
}

/// Voice input session
pub struct AsrSession {
    inner: Arc<Inner>,
}

impl AsrSession {
    /// Create a session over explicit transport, capture and recognizer
    pub fn new<F>(
        config: AsrConfig,
        token: impl Into<String>,
        transport: Arc<dyn AsrTransport>,
        capture: Arc<dyn AudioCapture>,
        recognizer: Arc<dyn SpeechRecognizer>,
        on_transcript: F,
    ) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let (status, _) = watch::channel(AsrStatus::Idle);
        let (notices, _) = broadcast::channel(32);

        Self {
            inner: Arc::new(Inner {
                config,
                token: token.into(),
                transport,
                capture,
                recognizer,
                on_transcript: Arc::new(on_transcript),
                status,
                notices,
                dropped_chunks: AtomicU64::new(0),
                resources: Mutex::new(Resources::default()),
            }),
        }
    }

    /// Create a session with the WebSocket transport, the default microphone
    /// and the Whisper fallback (when enabled)
    pub fn from_config<F>(config: AsrConfig, token: impl Into<String>, on_transcript: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let capture: Arc<dyn AudioCapture> = Arc::new(CpalCapture::new());
        let recognizer: Arc<dyn SpeechRecognizer> = if config.fallback.enabled {
            Arc::new(WhisperRecognizer::new(capture.clone(), &config.fallback))
        } else {
            Arc::new(UnsupportedRecognizer)
        };

        Self::new(
            config,
            token,
            Arc::new(WsTransport::new()),
            capture,
            recognizer,
            on_transcript,
        )
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> AsrStatus {
        *self.inner.status.borrow()
    }

    /// Watch status changes
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<AsrStatus> {
        self.inner.status.subscribe()
    }

    /// Subscribe to user notices
    #[must_use]
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.inner.notices.subscribe()
    }

    /// Active recognizer
    #[must_use]
    pub fn mode(&self) -> RecognitionMode {
        self.inner.lock().mode
    }

    /// Last error of the current or previous run
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.inner.lock().error.clone()
    }

    /// PCM chunks dropped because the socket could not keep up; always 0
    /// unless the overflow policy is [`OverflowPolicy::Drop`]
    #[must_use]
    pub fn dropped_chunks(&self) -> u64 {
        self.inner.dropped_chunks.load(Ordering::Relaxed)
    }

    /// Start recognition
    ///
    /// Ignored (returns `false`) unless the session is idle with no stop in
    /// progress. Failures never propagate: they are recorded in
    /// [`error`](Self::error), announced as notices, and may switch the
    /// session to the fallback recognizer.
    pub async fn start(&self) -> bool {
        self.inner.start().await
    }

    /// Stop recognition
    ///
    /// Networked runs flush the last partial chunk, send the end marker and
    /// close the microphone; the socket then gets a grace period to deliver
    /// final results before everything is released.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Release every resource and go idle; safe to call repeatedly
    pub fn cleanup(&self) {
        self.inner.cleanup();
    }
}

impl Drop for AsrSession {
    fn drop(&mut self) {
        self.inner.cleanup();
    }
}

impl std::fmt::Debug for AsrSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsrSession")
            .field("status", &self.status())
            .field("mode", &self.mode())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, Resources> {
        self.resources.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self, level: NoticeLevel, message: &str) {
        let _ = self.notices.send(Notice::new(level, message));
    }

    fn set_status(&self, status: AsrStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    /// Run `f` only while `generation` is still current
    fn with_current<R>(&self, generation: u64, f: impl FnOnce(&mut Resources) -> R) -> Option<R> {
        let mut resources = self.lock();
        (resources.generation == generation).then(|| f(&mut resources))
    }

    async fn start(self: &Arc<Self>) -> bool {
        let generation = {
            let mut resources = self.lock();
            if *self.status.borrow() != AsrStatus::Idle || resources.stop_timer.is_some() {
                debug!("Recognition already running");
                return false;
            }
            resources.generation += 1;
            resources.mode = RecognitionMode::Networked;
            resources.error = None;
            self.set_status(AsrStatus::Pending);
            resources.generation
        };
        self.dropped_chunks.store(0, Ordering::Relaxed);

        let connection = match tokio::time::timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            self.transport
                .connect(&self.config.ws_url, self.config.outbound_capacity),
        )
        .await
        {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                warn!("Recognition socket unavailable: {}", e);
                self.apply(generation, Trigger::TransportUnavailable);
                return true;
            }
            Err(_) => {
                warn!("Recognition socket connect timed out");
                self.apply(generation, Trigger::TransportUnavailable);
                return true;
            }
        };

        if self.lock().generation != generation {
            return true;
        }

        let AsrConnection { outbound, inbound } = connection;
        let handshake = async {
            outbound
                .send(OutboundFrame::Text(auth_frame(&self.token)))
                .await?;
            outbound
                .send(OutboundFrame::Binary(START_MARKER.to_vec()))
                .await
        };
        if handshake.await.is_err() {
            warn!("Recognition socket closed during handshake");
            self.apply(generation, Trigger::SocketError);
            return true;
        }

        let capture = match self.capture.open().await {
            Ok(capture) => capture,
            Err(e) => {
                warn!("Failed to open microphone: {}", e);
                self.apply(generation, Trigger::DeviceError(e.device_error_kind()));
                return true;
            }
        };

        let CaptureStream {
            sample_rate,
            blocks,
            mut handle,
        } = capture;
        let tasks = CancellationToken::new();
        let stopping = CancellationToken::new();

        {
            let mut resources = self.lock();
            if resources.generation != generation {
                // cleanup() ran while the microphone was opening
                drop(resources);
                handle.stop();
                return true;
            }
            resources.capture = Some(handle);
            resources.tasks = Some(tasks.clone());
            resources.stopping = Some(stopping.clone());
            self.set_status(AsrStatus::Recognizing);
        }

        let pump = Pump {
            inner: Arc::downgrade(self),
            generation,
            resampler: LinearResampler::new(sample_rate, self.config.target_sample_rate),
            chunker: PcmChunker::new(self.config.chunk_samples),
            transcript: TranscriptAccumulator::default(),
            on_transcript: self.on_transcript.clone(),
            overflow: self.config.overflow,
            outbound,
            backlog: VecDeque::new(),
        };
        tokio::spawn(pump.run(blocks, inbound, tasks, stopping));

        info!(
            "Recognition started ({}Hz → {}Hz)",
            sample_rate, self.config.target_sample_rate
        );
        self.notify(NoticeLevel::Success, "开始语音识别");
        true
    }

    /// Feed a trigger through the state machine and carry out the result
    fn apply(self: &Arc<Self>, generation: u64, trigger: Trigger) {
        let outcome = self.with_current(generation, |resources| {
            let next = transition(resources.mode, trigger);
            if next.action == Action::None && next.mode == resources.mode {
                return None;
            }
            debug!("Recognition {:?} → {:?} on {:?}", resources.mode, next.mode, trigger);
            resources.mode = next.mode;
            if let Some(error) = next.error {
                resources.error = Some(error.to_string());
            }
            Some(next)
        });
        let Some(Some(next)) = outcome else {
            return;
        };

        if let Some(notice) = next.notice {
            self.notify(NoticeLevel::Error, notice);
        }

        match next.action {
            Action::None => {}
            Action::Cleanup => self.cleanup_if(generation),
            Action::StartFallback => {
                self.release_networked(generation);
                let inner = self.clone();
                tokio::spawn(async move { inner.start_fallback(generation).await });
            }
        }
    }

    /// Drop socket and microphone but keep the run alive
    fn release_networked(&self, generation: u64) {
        let released = self.with_current(generation, |resources| {
            (
                resources.capture.take(),
                resources.tasks.take(),
                resources.stopping.take(),
            )
        });
        if let Some((capture, tasks, _)) = released {
            if let Some(tasks) = tasks {
                tasks.cancel();
            }
            if let Some(mut capture) = capture {
                capture.stop();
            }
        }
    }

    async fn start_fallback(self: Arc<Self>, generation: u64) {
        let stream = match self.recognizer.start(&self.config.locale).await {
            Ok(stream) => stream,
            Err(Error::FallbackUnsupported(reason)) => {
                warn!("Fallback recognition unsupported: {}", reason);
                self.apply(generation, Trigger::FallbackUnsupported);
                return;
            }
            Err(e) => {
                warn!("Fallback recognition failed to start: {}", e);
                self.apply(generation, Trigger::FallbackError);
                return;
            }
        };

        let RecognizerStream { events, mut handle } = stream;
        let tasks = CancellationToken::new();
        {
            let mut resources = self.lock();
            if resources.generation != generation {
                drop(resources);
                handle.stop();
                return;
            }
            resources.recognizer = Some(handle);
            resources.tasks = Some(tasks.clone());
            self.set_status(AsrStatus::Recognizing);
        }

        info!("Fallback recognition started");
        self.notify(NoticeLevel::Success, "开始语音输入");
        tokio::spawn(forward_fallback(Arc::downgrade(&self), generation, events, tasks));
    }

    fn stop(self: &Arc<Self>) {
        if *self.status.borrow() == AsrStatus::Idle {
            return;
        }

        let mut resources = self.lock();
        let mode = resources.mode;
        let generation = resources.generation;
        if mode == RecognitionMode::Networked && resources.stop_timer.is_some() {
            return;
        }
        match mode {
            RecognitionMode::Fallback => {
                let recognizer = resources.recognizer.take();
                drop(resources);
                if let Some(mut recognizer) = recognizer {
                    recognizer.stop();
                }
                self.notify(NoticeLevel::Info, "正在停止语音输入...");
                self.apply(generation, Trigger::Stopped);
            }
            RecognitionMode::Networked if resources.stopping.is_some() => {
                if let Some(stopping) = resources.stopping.take() {
                    stopping.cancel();
                }
                let capture = resources.capture.take();

                let inner = Arc::downgrade(self);
                let grace = Duration::from_millis(self.config.stop_grace_ms);
                resources.stop_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    if let Some(inner) = inner.upgrade() {
                        debug!("Stop grace period elapsed, forcing cleanup");
                        inner.apply(generation, Trigger::Stopped);
                    }
                }));
                drop(resources);

                if let Some(mut capture) = capture {
                    capture.stop();
                }
                self.notify(NoticeLevel::Info, "正在停止语音识别，请稍后...");
            }
            // Still connecting, or nothing installed yet
            _ => {
                drop(resources);
                self.apply(generation, Trigger::Stopped);
            }
        }
    }

    fn cleanup(&self) {
        self.release(None);
    }

    fn cleanup_if(&self, generation: u64) {
        self.release(Some(generation));
    }

    fn release(&self, expected: Option<u64>) {
        let (capture, recognizer, tasks, stopping, stop_timer) = {
            let mut resources = self.lock();
            if expected.is_some_and(|generation| generation != resources.generation) {
                return;
            }
            resources.generation += 1;
            resources.mode = RecognitionMode::None;
            (
                resources.capture.take(),
                resources.recognizer.take(),
                resources.tasks.take(),
                resources.stopping.take(),
                resources.stop_timer.take(),
            )
        };

        if let Some(tasks) = tasks {
            tasks.cancel();
        }
        drop(stopping);
        if let Some(mut capture) = capture {
            capture.stop();
        }
        if let Some(mut recognizer) = recognizer {
            recognizer.stop();
        }
        if let Some(timer) = stop_timer {
            timer.abort();
        }

        if *self.status.borrow() != AsrStatus::Idle {
            info!("Recognition stopped");
        }
        self.set_status(AsrStatus::Idle);
    }
}

/// Moves audio to the socket and results to the callback
struct Pump {
    inner: Weak<Inner>,
    generation: u64,
    resampler: LinearResampler,
    chunker: PcmChunker,
    transcript: TranscriptAccumulator,
    on_transcript: TranscriptFn,
    overflow: OverflowPolicy,
    outbound: mpsc::Sender<OutboundFrame>,
    /// Frames waiting for room in the socket queue, in send order
    backlog: VecDeque<OutboundFrame>,
}

impl Pump {
    async fn run(
        mut self,
        mut blocks: mpsc::Receiver<Vec<f32>>,
        mut inbound: mpsc::Receiver<InboundEvent>,
        tasks: CancellationToken,
        stopping: CancellationToken,
    ) {
        let mut capturing = true;
        let mut stopped = false;
        let outbound = self.outbound.clone();

        loop {
            tokio::select! {
                biased;
                _ = tasks.cancelled() => break,
                _ = stopping.cancelled(), if capturing => {
                    capturing = false;
                    stopped = true;
                    while let Ok(block) = blocks.try_recv() {
                        self.send_block(&block);
                    }
                    self.finish_input();
                }
                permit = outbound.reserve(), if !self.backlog.is_empty() => match permit {
                    Ok(permit) => {
                        if let Some(frame) = self.backlog.pop_front() {
                            permit.send(frame);
                        }
                        self.drain_backlog();
                    }
                    // the inbound side reports the closed socket
                    Err(_) => self.backlog.clear(),
                },
                block = blocks.recv(), if capturing => match block {
                    Some(block) => self.send_block(&block),
                    None => {
                        warn!("Microphone stream ended");
                        capturing = false;
                        self.finish_input();
                    }
                },
                event = inbound.recv() => match event {
                    Some(InboundEvent::Text(text)) => self.handle_result(&text),
                    Some(InboundEvent::Closed) | None => {
                        debug!("Recognition socket closed");
                        self.trigger(Trigger::SocketClosed);
                        break;
                    }
                    Some(InboundEvent::Error(e)) => {
                        warn!("Recognition socket error: {}", e);
                        // After stop there is nothing left to fall back for.
                        let trigger = if stopped {
                            Trigger::SocketClosed
                        } else {
                            Trigger::SocketError
                        };
                        self.trigger(trigger);
                        break;
                    }
                },
            }
        }
    }

    fn send_block(&mut self, block: &[f32]) {
        let samples = self.resampler.process(block);
        for chunk in self.chunker.push(&samples) {
            let frame = OutboundFrame::Binary(encode_pcm(&chunk));
            match self.overflow {
                OverflowPolicy::Buffer => self.queue(frame),
                OverflowPolicy::Drop => self.send_or_drop(frame),
            }
        }
    }

    fn queue(&mut self, frame: OutboundFrame) {
        self.backlog.push_back(frame);
        self.drain_backlog();
    }

    /// Move backlog frames into the socket queue while it has room
    fn drain_backlog(&mut self) {
        while let Some(frame) = self.backlog.pop_front() {
            match self.outbound.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(frame)) => {
                    self.backlog.push_front(frame);
                    return;
                }
                Err(TrySendError::Closed(_)) => {
                    self.backlog.clear();
                    return;
                }
            }
        }
    }

    fn send_or_drop(&mut self, frame: OutboundFrame) {
        let full = !self.backlog.is_empty()
            || matches!(self.outbound.try_send(frame), Err(TrySendError::Full(_)));
        if full {
            if let Some(inner) = self.inner.upgrade() {
                let dropped = inner.dropped_chunks.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    warn!("Recognition socket backlog, {} PCM chunks dropped", dropped);
                }
            }
        }
    }

    /// Queue the short trailing chunk and the end marker behind any backlog
    fn finish_input(&mut self) {
        if let Some(tail) = self.chunker.flush() {
            self.queue(OutboundFrame::Binary(encode_pcm(&tail)));
        }
        self.queue(OutboundFrame::Binary(END_MARKER.to_vec()));
        debug!("End marker queued");
    }

    fn handle_result(&mut self, text: &str) {
        match AsrResponse::parse(text) {
            Ok(response) => {
                let live = self.transcript.apply(&response);
                (self.on_transcript)(&live);
            }
            Err(e) => {
                warn!("Failed to parse recognition result: {}", e);
                if let Some(inner) = self.inner.upgrade() {
                    inner.with_current(self.generation, |resources| {
                        resources.error = Some("解析识别结果失败".to_string());
                    });
                }
            }
        }
    }

    fn trigger(&self, trigger: Trigger) {
        if let Some(inner) = self.inner.upgrade() {
            inner.apply(self.generation, trigger);
        }
    }
}

async fn forward_fallback(
    inner: Weak<Inner>,
    generation: u64,
    mut events: mpsc::Receiver<RecognitionEvent>,
    tasks: CancellationToken,
) {
    let mut transcript = FallbackTranscript::default();

    let trigger = loop {
        tokio::select! {
            biased;
            _ = tasks.cancelled() => return,
            event = events.recv() => match event {
                Some(RecognitionEvent::Result { transcript: text, is_final }) => {
                    let live = transcript.apply(&text, is_final);
                    let Some(inner) = inner.upgrade() else {
                        return;
                    };
                    (inner.on_transcript)(&live);
                }
                Some(RecognitionEvent::Error(e)) => {
                    warn!("Fallback recognition error: {}", e);
                    break Trigger::FallbackError;
                }
                Some(RecognitionEvent::End) | None => break Trigger::FallbackEnded,
            },
        }
    };

    if let Some(inner) = inner.upgrade() {
        inner.apply(generation, trigger);
    }
}
