//! Recognition socket wire format

use serde::{Deserialize, Serialize};

/// Sent once after the auth frame, before any audio
pub const START_MARKER: [u8; 1] = [0x00];

/// Sent once when the user stops recording
pub const END_MARKER: [u8; 1] = [0xFF];

/// Modes whose text is a finished segment
const FINAL_MODES: [&str; 2] = ["2pass-offline", "offline"];

/// Build the JSON auth frame
#[must_use]
pub fn auth_frame(token: &str) -> String {
    serde_json::json!({ "Authorization": token }).to_string()
}

/// Encode samples as little-endian 16-bit PCM
#[must_use]
pub fn encode_pcm(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Timed sentence attached to final results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StampSentence {
    /// Sentence text
    #[serde(default)]
    pub text_seg: String,
    /// Punctuation
    #[serde(default)]
    pub punc: String,
    /// Start offset (ms)
    #[serde(default)]
    pub start: i64,
    /// End offset (ms)
    #[serde(default)]
    pub end: i64,
}

/// Inbound recognition result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AsrResponse {
    /// Whether this is the last result for the stream
    #[serde(default)]
    pub is_final: bool,
    /// Result mode (`online`, `2pass-online`, `2pass-offline`, `offline`)
    #[serde(default)]
    pub mode: String,
    /// Recognized text
    #[serde(default)]
    pub text: String,
    /// Stream name assigned by the server
    #[serde(default)]
    pub wav_name: String,
    /// Timed sentences (final results only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stamp_sents: Option<Vec<StampSentence>>,
    /// Raw token timestamps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<serde_json::Value>,
}

impl AsrResponse {
    /// Parse a text frame
    pub fn parse(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Whether the text belongs to a finished segment
    #[must_use]
    pub fn is_offline(&self) -> bool {
        FINAL_MODES.contains(&self.mode.as_str())
    }
}

/// Live transcript built from networked results
#[derive(Debug, Clone, Default)]
pub struct TranscriptAccumulator {
    offline: String,
    online: String,
}

impl TranscriptAccumulator {
    /// Apply a result and return the live transcript
    pub fn apply(&mut self, response: &AsrResponse) -> String {
        if response.is_offline() {
            self.offline.push_str(&response.text);
            self.online.clear();
        } else {
            self.online.push_str(&response.text);
        }
        self.live()
    }

    /// Finished segments followed by the current partial
    #[must_use]
    pub fn live(&self) -> String {
        format!("{}{}", self.offline, self.online)
    }

    /// Reset both parts
    pub fn clear(&mut self) {
        self.offline.clear();
        self.online.clear();
    }
}

/// Live transcript built from fallback recognizer results
#[derive(Debug, Clone, Default)]
pub struct FallbackTranscript {
    finished: String,
    interim: String,
}

impl FallbackTranscript {
    /// Apply a result and return the trimmed live transcript
    pub fn apply(&mut self, transcript: &str, is_final: bool) -> String {
        if is_final {
            self.finished.push_str(transcript);
            self.interim.clear();
        } else {
            self.interim = transcript.to_string();
        }
        format!("{}{}", self.finished, self.interim)
            .trim()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(mode: &str, text: &str) -> AsrResponse {
        AsrResponse {
            mode: mode.to_string(),
            text: text.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_auth_frame() {
        let frame: serde_json::Value = serde_json::from_str(&auth_frame("tok")).unwrap();
        assert_eq!(frame["Authorization"], "tok");
    }

    #[test]
    fn test_encode_pcm_little_endian() {
        assert_eq!(encode_pcm(&[1, -2]), vec![0x01, 0x00, 0xFE, 0xFF]);
        assert_eq!(encode_pcm(&[0; 960]).len(), 1920);
    }

    #[test]
    fn test_parse_final_chunk() {
        let text = r#"{"is_final":true,"mode":"2pass-offline","text":"你好。","wav_name":"h5",
            "stamp_sents":[{"text_seg":"你 好","punc":"。","start":0,"end":880}],
            "timestamp":"[[0,440],[440,880]]"}"#;
        let response = AsrResponse::parse(text).unwrap();
        assert!(response.is_final);
        assert!(response.is_offline());
        assert_eq!(response.stamp_sents.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(AsrResponse::parse("not json").is_err());
    }

    #[test]
    fn test_transcript_accumulation() {
        let mut transcript = TranscriptAccumulator::default();
        assert_eq!(transcript.apply(&response("2pass-online", "你")), "你");
        assert_eq!(transcript.apply(&response("2pass-online", "好")), "你好");
        assert_eq!(transcript.apply(&response("2pass-offline", "你好。")), "你好。");
        assert_eq!(transcript.apply(&response("2pass-online", "再")), "你好。再");
        assert_eq!(transcript.apply(&response("offline", "再见。")), "你好。再见。");

        transcript.clear();
        assert_eq!(transcript.live(), "");
    }

    #[test]
    fn test_fallback_transcript() {
        let mut transcript = FallbackTranscript::default();
        assert_eq!(transcript.apply("今天", false), "今天");
        assert_eq!(transcript.apply("今天天气", false), "今天天气");
        assert_eq!(transcript.apply("今天天气很好 ", true), "今天天气很好");
        assert_eq!(transcript.apply("明天", false), "今天天气很好 明天");
    }
}
