//! Deyu ASR - Streaming Speech Recognition
//!
//! This crate provides the voice-input side of the Deyu client:
//! - Capture: microphone capture on a dedicated thread (cpal)
//! - Resample / Chunker: device audio to 16 kHz i16 PCM in 960-sample chunks
//! - Protocol: recognition socket frames and transcript accumulation
//! - Mode: the networked → fallback → none state machine
//! - Fallback: local recognizer used when the recognition socket is unavailable
//! - Session: `AsrSession`, which ties it all together
//!
//! # Usage
//!
//! ```rust,ignore
//! use deyu_asr::{AsrConfig, AsrSession};
//!
//! let session = AsrSession::from_config(AsrConfig::default(), token, |text: &str| {
//!     println!("{text}");
//! });
//! session.start().await;
//! // ...
//! session.stop();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod capture;
pub mod chunker;
pub mod config;
pub mod error;
pub mod fallback;
pub mod mode;
pub mod notice;
pub mod protocol;
pub mod resample;
pub mod session;
pub mod transport;

pub use capture::{AudioCapture, CaptureHandle, CaptureStream, CpalCapture};
pub use chunker::{PcmChunker, CHUNK_SAMPLES};
pub use config::{AsrConfig, FallbackConfig, OverflowPolicy};
pub use error::{Error, Result};
pub use fallback::{
    RecognitionEvent, RecognizerHandle, RecognizerStream, SpeechRecognizer,
    UnsupportedRecognizer, WhisperRecognizer,
};
pub use mode::{transition, Action, DeviceErrorKind, RecognitionMode, Transition, Trigger};
pub use notice::{Notice, NoticeLevel};
pub use protocol::{AsrResponse, FallbackTranscript, TranscriptAccumulator};
pub use resample::LinearResampler;
pub use session::{AsrSession, AsrStatus};
pub use transport::{AsrConnection, AsrTransport, InboundEvent, OutboundFrame, WsTransport};
