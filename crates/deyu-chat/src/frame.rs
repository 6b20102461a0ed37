//! Incremental decoder for the completion stream
//!
//! The `/v1/completions` response body is UTF-8 text split into lines:
//!
//! ```text
//! id: 3
//! event: chat
//! data: {"message":{"content":"{\"text\":\"hi\"}","contentType":0}}
//! ```
//!
//! [`FrameDecoder`] accepts arbitrary byte chunks (a multi-byte character or
//! a line may be split across reads) and yields one [`StreamFrame`] per
//! `data:` line. [`StreamFrame::decode`] turns the frame into a typed
//! [`FramePayload`].

use crate::error::{Error, Result};
use serde::Deserialize;

/// Event name of a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Server acknowledgement carrying canonical ids
    Meta,
    /// Model information
    Model,
    /// Text / think fragment
    Chat,
    /// End of stream
    End,
    /// Event name this client does not understand
    Unknown(String),
}

impl StreamEvent {
    /// Parse an `event:` value
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "meta" => Self::Meta,
            "model" => Self::Model,
            "chat" => Self::Chat,
            "end" => Self::End,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// One `id` / `event` / `data` record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    /// Sequence number from the last `id:` line, if any
    pub id: Option<u64>,
    /// Event from the last `event:` line
    pub event: StreamEvent,
    /// Raw JSON after `data:`
    pub data: String,
}

/// `meta` payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetaPayload {
    /// Canonical id of the assistant message being streamed
    pub message_id: String,
    /// Conversation id
    pub conversation_id: Option<String>,
    /// Section id
    pub section_id: Option<String>,
    /// Position of the message in the conversation
    pub message_index: Option<i64>,
    /// Canonical id of the user message being answered
    pub reply_id: Option<String>,
}

/// `model` payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelPayload {
    /// Model id
    pub model: String,
    /// Bot id
    pub bot_id: Option<String>,
    /// Bot display name
    pub bot_name: Option<String>,
}

/// Inner `chat` content: both fragments are optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TextContent {
    /// Answer fragment
    pub text: Option<String>,
    /// Reasoning fragment
    pub think: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatPayload {
    message: ChatBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatBody {
    #[serde(default)]
    content: String,
    #[allow(dead_code)]
    #[serde(default)]
    content_type: Option<i64>,
}

/// Typed frame payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePayload {
    /// `meta`
    Meta(MetaPayload),
    /// `model`
    Model(ModelPayload),
    /// `chat`
    Chat(TextContent),
    /// `end`
    End,
    /// Unknown event; ignored by consumers
    Unknown(String),
}

impl StreamFrame {
    /// Decode the JSON payload according to the event.
    ///
    /// Errors only concern this frame; the stream itself stays usable.
    pub fn decode(&self) -> Result<FramePayload> {
        match &self.event {
            StreamEvent::Meta => Ok(FramePayload::Meta(parse(&self.data, "meta")?)),
            StreamEvent::Model => Ok(FramePayload::Model(parse(&self.data, "model")?)),
            StreamEvent::Chat => {
                let payload: ChatPayload = parse(&self.data, "chat")?;
                if payload.message.content.trim().is_empty() {
                    return Ok(FramePayload::Chat(TextContent::default()));
                }
                let content = parse(&payload.message.content, "chat content")?;
                Ok(FramePayload::Chat(content))
            }
            StreamEvent::End => Ok(FramePayload::End),
            StreamEvent::Unknown(name) => Ok(FramePayload::Unknown(name.clone())),
        }
    }
}

fn parse<T: for<'de> Deserialize<'de>>(data: &str, what: &str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| Error::Protocol(format!("malformed {what} frame: {e}")))
}

/// Byte-stream to frame decoder.
///
/// The event name persists until the next `event:` line and starts as
/// `meta`, so a server that omits repeated `event:` lines still decodes.
#[derive(Debug)]
pub struct FrameDecoder {
    utf8_carry: Vec<u8>,
    line_buf: String,
    id: Option<u64>,
    event: StreamEvent,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self {
            utf8_carry: Vec::new(),
            line_buf: String::new(),
            id: None,
            event: StreamEvent::Meta,
        }
    }

    /// Feed a chunk; returns every frame completed by it, in order
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamFrame> {
        self.decode_utf8(chunk);

        let Some(last_newline) = self.line_buf.rfind('\n') else {
            return Vec::new();
        };
        let rest = self.line_buf.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.line_buf, rest);

        complete
            .split('\n')
            .filter_map(|line| self.process_line(line))
            .collect()
    }

    /// End of stream: flush a dangling partial character and the final
    /// unterminated line
    pub fn finish(&mut self) -> Vec<StreamFrame> {
        if !self.utf8_carry.is_empty() {
            let carry = std::mem::take(&mut self.utf8_carry);
            self.line_buf.push_str(&String::from_utf8_lossy(&carry));
        }
        let line = std::mem::take(&mut self.line_buf);
        line.split('\n')
            .filter_map(|line| self.process_line(line))
            .collect()
    }

    fn decode_utf8(&mut self, chunk: &[u8]) {
        let bytes = if self.utf8_carry.is_empty() {
            chunk.to_vec()
        } else {
            let mut joined = std::mem::take(&mut self.utf8_carry);
            joined.extend_from_slice(chunk);
            joined
        };

        let mut pos = 0;
        while pos < bytes.len() {
            match std::str::from_utf8(&bytes[pos..]) {
                Ok(s) => {
                    self.line_buf.push_str(s);
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    self.line_buf
                        .push_str(&String::from_utf8_lossy(&bytes[pos..pos + valid]));
                    pos += valid;
                    match e.error_len() {
                        Some(len) => {
                            self.line_buf.push(char::REPLACEMENT_CHARACTER);
                            pos += len;
                        }
                        None => {
                            // incomplete sequence at the end of the chunk
                            self.utf8_carry.extend_from_slice(&bytes[pos..]);
                            break;
                        }
                    }
                }
            }
        }
    }

    fn process_line(&mut self, raw: &str) -> Option<StreamFrame> {
        let line = raw.trim_end();
        if let Some(value) = line.strip_prefix("id:") {
            self.id = value.trim().parse().ok();
            return None;
        }
        if let Some(value) = line.strip_prefix("event:") {
            self.event = StreamEvent::from_name(value.trim());
            return None;
        }
        let data = line.strip_prefix("data:")?.trim();
        if data.is_empty() || data == "{}" {
            return None;
        }
        Some(StreamFrame {
            id: self.id,
            event: self.event.clone(),
            data: data.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat_line(text: &str) -> String {
        let inner = serde_json::json!({ "text": text }).to_string();
        let outer = serde_json::json!({ "message": { "content": inner, "contentType": 0 } });
        format!("id: 2\nevent: chat\ndata: {outer}\n")
    }

    #[test]
    fn test_decodes_complete_records() {
        let mut decoder = FrameDecoder::new();
        let body = format!(
            "id: 1\nevent: meta\ndata: {{\"messageId\":\"m1\",\"replyId\":\"u1\"}}\n{}",
            chat_line("hi")
        );
        let frames = decoder.push(body.as_bytes());
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event, StreamEvent::Meta);
        assert_eq!(frames[0].id, Some(1));

        match frames[0].decode().unwrap() {
            FramePayload::Meta(meta) => {
                assert_eq!(meta.message_id, "m1");
                assert_eq!(meta.reply_id.as_deref(), Some("u1"));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
        match frames[1].decode().unwrap() {
            FramePayload::Chat(content) => assert_eq!(content.text.as_deref(), Some("hi")),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_line_split_across_chunks() {
        let mut decoder = FrameDecoder::new();
        let body = chat_line("split");
        let (a, b) = body.as_bytes().split_at(17);
        assert!(decoder.push(a).is_empty());
        let frames = decoder.push(b);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, StreamEvent::Chat);
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let mut decoder = FrameDecoder::new();
        let body = chat_line("你好");
        let bytes = body.as_bytes();
        let frames: Vec<_> = bytes
            .chunks(1)
            .flat_map(|b| decoder.push(b))
            .collect();
        assert_eq!(frames.len(), 1);
        match frames[0].decode().unwrap() {
            FramePayload::Chat(content) => assert_eq!(content.text.as_deref(), Some("你好")),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_bytes_become_replacement_char() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"data: \"a\xffb\"\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "\"a\u{FFFD}b\"");
    }

    #[test]
    fn test_keepalive_and_crlf() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"id: 4\r\nevent: chat\r\ndata: {}\r\n");
        assert!(frames.is_empty());
    }

    #[test]
    fn test_finish_processes_unterminated_line() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"event: end\ndata: {\"done\":true}").is_empty());
        let frames = decoder.finish();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, StreamEvent::End);
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_unknown_event_and_fields_tolerated() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"event: suggest\ndata: {\"x\":1}\n");
        assert_eq!(frames[0].decode().unwrap(), FramePayload::Unknown("suggest".into()));

        let frames = decoder.push(b"event: meta\ndata: {\"messageId\":\"m9\",\"extra\":[1,2]}\n");
        assert!(matches!(frames[0].decode().unwrap(), FramePayload::Meta(m) if m.message_id == "m9"));
    }

    #[test]
    fn test_malformed_json_is_protocol_error() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"event: chat\ndata: {not json\n");
        assert!(matches!(frames[0].decode(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_chat_with_think_only() {
        let frame = StreamFrame {
            id: None,
            event: StreamEvent::Chat,
            data: r#"{"message":{"content":"{\"think\":\"hmm\"}","contentType":0}}"#.to_string(),
        };
        match frame.decode().unwrap() {
            FramePayload::Chat(content) => {
                assert_eq!(content.think.as_deref(), Some("hmm"));
                assert!(content.text.is_none());
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}
