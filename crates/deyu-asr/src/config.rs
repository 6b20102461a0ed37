//! ASR configuration

use serde::{Deserialize, Serialize};

/// Recognition session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrConfig {
    /// Recognition socket URL
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// Sample rate the recognizer expects (Hz)
    #[serde(default = "default_target_sample_rate")]
    pub target_sample_rate: u32,

    /// Samples per PCM frame
    #[serde(default = "default_chunk_samples")]
    pub chunk_samples: usize,

    /// Grace period after stop before resources are force-released (ms)
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,

    /// Socket connect timeout (ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Socket write queue (frames)
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,

    /// What happens to PCM frames while the write queue is full
    #[serde(default)]
    pub overflow: OverflowPolicy,

    /// Recognition locale
    #[serde(default = "default_locale")]
    pub locale: String,

    /// Local fallback recognizer
    #[serde(default)]
    pub fallback: FallbackConfig,
}

/// Handling of PCM frames the socket cannot take yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Hold frames in order until the socket catches up; nothing is lost
    #[default]
    Buffer,
    /// Drop frames and count them in `AsrSession::dropped_chunks`
    Drop,
}

/// Fallback recognizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Whether to fall back at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Length of the audio segments sent for transcription (seconds)
    #[serde(default = "default_segment_secs")]
    pub segment_secs: u64,

    /// Transcription model
    #[serde(default = "default_whisper_model")]
    pub model: String,
}

fn default_ws_url() -> String {
    "ws://localhost:10095".to_string()
}

fn default_target_sample_rate() -> u32 {
    16_000
}

fn default_chunk_samples() -> usize {
    crate::chunker::CHUNK_SAMPLES
}

fn default_stop_grace_ms() -> u64 {
    3000
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_outbound_capacity() -> usize {
    64
}

fn default_locale() -> String {
    "zh-CN".to_string()
}

fn default_true() -> bool {
    true
}

fn default_segment_secs() -> u64 {
    5
}

fn default_whisper_model() -> String {
    "whisper-1".to_string()
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            target_sample_rate: default_target_sample_rate(),
            chunk_samples: default_chunk_samples(),
            stop_grace_ms: default_stop_grace_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            outbound_capacity: default_outbound_capacity(),
            overflow: OverflowPolicy::default(),
            locale: default_locale(),
            fallback: FallbackConfig::default(),
        }
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            segment_secs: default_segment_secs(),
            model: default_whisper_model(),
        }
    }
}

impl AsrConfig {
    /// Set the socket URL
    #[must_use]
    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = url.into();
        self
    }

    /// Set the outbound queue capacity
    #[must_use]
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    /// Set the overflow policy
    #[must_use]
    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AsrConfig::default();
        assert_eq!(config.target_sample_rate, 16000);
        assert_eq!(config.chunk_samples, 960);
        assert_eq!(config.stop_grace_ms, 3000);
        assert_eq!(config.locale, "zh-CN");
        assert_eq!(config.overflow, OverflowPolicy::Buffer);
        assert!(config.fallback.enabled);
    }

    #[test]
    fn test_overflow_policy_from_str() {
        let config: AsrConfig = serde_json::from_str(r#"{"overflow":"drop"}"#).unwrap();
        assert_eq!(config.overflow, OverflowPolicy::Drop);
    }

    #[test]
    fn test_partial_deserialize() {
        let config: AsrConfig =
            serde_json::from_str(r#"{"ws_url":"wss://asr.example/ws","fallback":{"enabled":false}}"#)
                .unwrap();
        assert_eq!(config.ws_url, "wss://asr.example/ws");
        assert!(!config.fallback.enabled);
        assert_eq!(config.fallback.segment_secs, 5);
        assert_eq!(config.chunk_samples, 960);
    }
}
