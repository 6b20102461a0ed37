//! Local fallback recognizer
//!
//! Used when the recognition socket cannot be reached. The recognizer reports
//! results, an error, or the end of recognition over a channel, mirroring how
//! a platform speech API delivers events.

use crate::capture::{AudioCapture, CaptureStream};
use crate::config::FallbackConfig;
use crate::error::{Error, Result};
use crate::resample::to_i16;
use async_openai::{
    config::OpenAIConfig,
    types::audio::{AudioInput, AudioResponseFormat, CreateTranscriptionRequestArgs},
    Client,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Recognizer event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// A recognition result
    Result {
        /// Recognized text
        transcript: String,
        /// Whether the text is settled
        is_final: bool,
    },
    /// The recognizer failed
    Error(String),
    /// Recognition finished
    End,
}

/// Stops a running recognizer
pub trait RecognizerHandle: Send {
    /// Ask the recognizer to finish; an `End` event follows
    fn stop(&mut self);
}

/// A running recognizer
pub struct RecognizerStream {
    /// Recognition events
    pub events: mpsc::Receiver<RecognitionEvent>,
    /// Stops recognition
    pub handle: Box<dyn RecognizerHandle>,
}

impl std::fmt::Debug for RecognizerStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecognizerStream").finish_non_exhaustive()
    }
}

/// Continuous speech recognizer
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Start continuous recognition in `locale`
    ///
    /// Returns [`Error::FallbackUnsupported`] when no recognizer exists here.
    async fn start(&self, locale: &str) -> Result<RecognizerStream>;
}

/// Recognizer for environments without one
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedRecognizer;

#[async_trait]
impl SpeechRecognizer for UnsupportedRecognizer {
    async fn start(&self, _locale: &str) -> Result<RecognizerStream> {
        Err(Error::FallbackUnsupported(
            "speech recognition is disabled".to_string(),
        ))
    }
}

/// Segment-based recognizer over the OpenAI Whisper API
///
/// Audio is cut into fixed-length segments; each one is transcribed and
/// reported as a final result.
pub struct WhisperRecognizer {
    capture: Arc<dyn AudioCapture>,
    client: Option<Client<OpenAIConfig>>,
    model: String,
    segment_secs: u64,
}

impl WhisperRecognizer {
    /// Create a recognizer
    ///
    /// If `OPENAI_API_KEY` is not set, starting it reports unsupported.
    #[must_use]
    pub fn new(capture: Arc<dyn AudioCapture>, config: &FallbackConfig) -> Self {
        let client = if std::env::var("OPENAI_API_KEY").is_ok() {
            Some(Client::new())
        } else {
            warn!("OPENAI_API_KEY not set - fallback recognition disabled");
            None
        };

        Self {
            capture,
            client,
            model: config.model.clone(),
            segment_secs: config.segment_secs.max(1),
        }
    }

    /// Check if the API is available
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }
}

impl std::fmt::Debug for WhisperRecognizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperRecognizer")
            .field("model", &self.model)
            .field("segment_secs", &self.segment_secs)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[async_trait]
impl SpeechRecognizer for WhisperRecognizer {
    async fn start(&self, locale: &str) -> Result<RecognizerStream> {
        let client = self.client.clone().ok_or_else(|| {
            Error::FallbackUnsupported("fallback recognition requires OPENAI_API_KEY".to_string())
        })?;

        let capture = self.capture.open().await?;
        let (tx, rx) = mpsc::channel(16);
        let token = CancellationToken::new();

        let segments = Segmenter {
            client,
            model: self.model.clone(),
            language: language_code(locale),
            segment_secs: self.segment_secs,
        };
        tokio::spawn(segments.run(capture, tx, token.clone()));

        info!("Fallback recognition started (locale: {})", locale);
        Ok(RecognizerStream {
            events: rx,
            handle: Box::new(WhisperHandle { token }),
        })
    }
}

struct WhisperHandle {
    token: CancellationToken,
}

impl RecognizerHandle for WhisperHandle {
    fn stop(&mut self) {
        self.token.cancel();
    }
}

struct Segmenter {
    client: Client<OpenAIConfig>,
    model: String,
    language: String,
    segment_secs: u64,
}

impl Segmenter {
    async fn run(
        self,
        capture: CaptureStream,
        tx: mpsc::Sender<RecognitionEvent>,
        token: CancellationToken,
    ) {
        let CaptureStream {
            sample_rate,
            mut blocks,
            mut handle,
        } = capture;
        let segment_len = sample_rate as usize * self.segment_secs as usize;
        let mut buffer: Vec<f32> = Vec::with_capacity(segment_len);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                block = blocks.recv() => {
                    let Some(block) = block else {
                        break;
                    };
                    buffer.extend(block);
                    if buffer.len() >= segment_len {
                        let segment = std::mem::take(&mut buffer);
                        if !self.report(&tx, &segment, sample_rate).await {
                            handle.stop();
                            return;
                        }
                    }
                }
            }
        }

        handle.stop();

        // Anything under half a second is not worth a request.
        if buffer.len() >= sample_rate as usize / 2 && !self.report(&tx, &buffer, sample_rate).await
        {
            return;
        }
        let _ = tx.send(RecognitionEvent::End).await;
    }

    async fn report(
        &self,
        tx: &mpsc::Sender<RecognitionEvent>,
        samples: &[f32],
        sample_rate: u32,
    ) -> bool {
        let event = match self.transcribe(samples, sample_rate).await {
            Ok(text) => RecognitionEvent::Result {
                transcript: text,
                is_final: true,
            },
            Err(e) => {
                warn!("Fallback transcription failed: {}", e);
                let _ = tx.send(RecognitionEvent::Error(e.to_string())).await;
                return false;
            }
        };
        tx.send(event).await.is_ok()
    }

    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String> {
        let wav = samples_to_wav(samples, sample_rate)?;
        debug!("Transcribing {} bytes via API", wav.len());

        let request = CreateTranscriptionRequestArgs::default()
            .file(AudioInput::from_vec_u8("audio.wav".to_string(), wav))
            .model(&self.model)
            .language(&self.language)
            .response_format(AudioResponseFormat::Text)
            .build()
            .map_err(|e| Error::Stt(format!("Failed to build request: {e}")))?;

        let response = self
            .client
            .audio()
            .transcription()
            .create(request)
            .await
            .map_err(|e| Error::Stt(format!("Transcription failed: {e}")))?;

        Ok(response.text.trim().to_string())
    }
}

/// `zh-CN` → `zh`
fn language_code(locale: &str) -> String {
    locale
        .split(['-', '_'])
        .next()
        .unwrap_or(locale)
        .to_lowercase()
}

/// Encode mono samples as a 16-bit WAV file
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| Error::AudioStream(format!("Failed to create WAV writer: {}", e)))?;
        for &sample in samples {
            writer
                .write_sample(to_i16(sample))
                .map_err(|e| Error::AudioStream(format!("Failed to write sample: {}", e)))?;
        }
        writer
            .finalize()
            .map_err(|e| Error::AudioStream(format!("Failed to finalize WAV: {}", e)))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_code() {
        assert_eq!(language_code("zh-CN"), "zh");
        assert_eq!(language_code("en_US"), "en");
        assert_eq!(language_code("ko"), "ko");
    }

    #[test]
    fn test_samples_to_wav() {
        let samples = vec![0.0f32; 1600];
        let wav = samples_to_wav(&samples, 16000).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + 1600 * 2);

        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.len(), 1600);
    }

    #[tokio::test]
    async fn test_unsupported_recognizer() {
        let err = UnsupportedRecognizer.start("zh-CN").await.unwrap_err();
        assert!(matches!(err, Error::FallbackUnsupported(_)));
    }
}
