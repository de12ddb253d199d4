//! The callback contract the host application implements.

use crate::error::ErrorDetails;

/// Notifications delivered from the engine's I/O thread.
///
/// All four methods run on the engine's dedicated I/O thread; none may
/// block, since the engine's next suspension point waits on their return.
#[async_trait::async_trait]
pub trait SessionCallbacks: Send + Sync + 'static {
    /// A complete message was read from the WebSocket.
    async fn on_message_received(&self, message: Message);

    /// The WebSocket handshake succeeded; the session is ready to send.
    async fn on_connected(&self);

    /// The session ended, with either a recorded error or
    /// `ErrorDetails::none()` for an orderly close.
    async fn on_disconnected(&self, error: ErrorDetails);

    /// The reconnect supervisor exhausted its retry budget. No further
    /// reconnect attempts happen until the host calls `schedule_reconnect`.
    async fn signal_critical_failure(&self);
}

/// One complete inbound or outbound WebSocket message.
///
/// Fragmentation and reassembly beyond what the underlying WebSocket
/// framing already provides is out of scope; every `Message` here is
/// exactly one frame's payload as delivered by the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

impl Message {
    pub(crate) fn byte_len(&self) -> usize {
        match self {
            Message::Text(s) => s.len(),
            Message::Binary(b) => b.len(),
        }
    }
}

impl From<Message> for tokio_tungstenite::tungstenite::Message {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(s) => tokio_tungstenite::tungstenite::Message::Text(s.into()),
            Message::Binary(b) => tokio_tungstenite::tungstenite::Message::Binary(b.into()),
        }
    }
}
