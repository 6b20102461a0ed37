//! Recognition socket
//!
//! The session talks to the socket through a pair of channels so it never
//! holds the socket itself: frames queued on `outbound` are written by a
//! writer task, and everything the server sends arrives on `inbound`.
//! Dropping the outbound sender closes the socket.

use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Inbound events buffered per connection
const INBOUND_QUEUE: usize = 64;

/// Frame to write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Text frame
    Text(String),
    /// Binary frame
    Binary(Vec<u8>),
}

/// Something the socket reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Text frame from the server
    Text(String),
    /// Socket closed
    Closed,
    /// Socket failed
    Error(String),
}

/// An open recognition socket
#[derive(Debug)]
pub struct AsrConnection {
    /// Frames to send
    pub outbound: mpsc::Sender<OutboundFrame>,
    /// Server events
    pub inbound: mpsc::Receiver<InboundEvent>,
}

/// Opens recognition sockets
#[async_trait]
pub trait AsrTransport: Send + Sync {
    /// Connect to `url`; `capacity` bounds the outbound queue
    async fn connect(&self, url: &str, capacity: usize) -> Result<AsrConnection>;
}

/// WebSocket transport
#[derive(Debug, Default, Clone, Copy)]
pub struct WsTransport;

impl WsTransport {
    /// Create a WebSocket transport
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AsrTransport for WsTransport {
    async fn connect(&self, url: &str, capacity: usize) -> Result<AsrConnection> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::Transport(format!("Failed to connect: {}", e)))?;
        info!("Connected to recognition socket {}", url);

        let (mut write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundFrame>(capacity.max(1));
        let (inbound_tx, inbound_rx) = mpsc::channel::<InboundEvent>(INBOUND_QUEUE);

        let writer_events = inbound_tx.clone();
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let message = match frame {
                    OutboundFrame::Text(text) => Message::Text(text.into()),
                    OutboundFrame::Binary(bytes) => Message::Binary(bytes.into()),
                };
                if let Err(e) = write.send(message).await {
                    warn!("Recognition socket write failed: {}", e);
                    let _ = writer_events.send(InboundEvent::Error(e.to_string())).await;
                    return;
                }
            }
            debug!("Outbound queue closed, closing recognition socket");
            let _ = write.close().await;
        });

        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                let event = match message {
                    Ok(Message::Text(text)) => InboundEvent::Text(text.to_string()),
                    Ok(Message::Close(_)) => InboundEvent::Closed,
                    Ok(_) => continue,
                    Err(e) => InboundEvent::Error(e.to_string()),
                };
                let last = !matches!(event, InboundEvent::Text(_));
                if inbound_tx.send(event).await.is_err() || last {
                    return;
                }
            }
            let _ = inbound_tx.send(InboundEvent::Closed).await;
        });

        Ok(AsrConnection {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
