//! A resilient, single-session WebSocket client engine.
//!
//! `ws-session` maintains one TLS-secured WebSocket session to a remote
//! endpoint and exposes a message-oriented interface — open, send, close,
//! stats, reconnect — plus asynchronous lifecycle callbacks. The caller owns
//! no threads and never touches a socket directly: every suspension point
//! (DNS resolve, TCP connect, optional HTTP CONNECT tunnel, TLS handshake,
//! WebSocket upgrade, reads and writes) runs on a single I/O thread the
//! engine spawns and owns.
//!
//! ```ignore
//! use std::sync::Arc;
//! use ws_session::{create, ConnectionConfig, ErrorDetails, Message, ServerSettings};
//! use ws_session::{SendBehavior, SessionCallbacks};
//!
//! struct Echo;
//!
//! #[async_trait::async_trait]
//! impl SessionCallbacks for Echo {
//!     async fn on_message_received(&self, message: Message) {
//!         println!("received {message:?}");
//!     }
//!     async fn on_connected(&self) {}
//!     async fn on_disconnected(&self, error: ErrorDetails) {
//!         eprintln!("disconnected: {error}");
//!     }
//!     async fn signal_critical_failure(&self) {}
//! }
//!
//! let server = ServerSettings::new("echo.example.com", 443, "/ws");
//! let config = ConnectionConfig::new(server);
//! let messenger = create(Arc::new(Echo), config, SendBehavior::Async).unwrap();
//! messenger.open();
//! messenger.send(Message::Text("hello".to_string()));
//! messenger.close();
//! ```
//!
//! Out of scope, by design: plaintext (non-TLS) sessions, multiple
//! concurrent sessions per engine, application-level message fragmentation
//! beyond what the WebSocket framing already provides, backpressure feedback
//! richer than accept/reject plus a queue-size metric, and persisting queued
//! messages across process restarts.

mod callbacks;
mod client;
mod connector;
mod engine;
mod error;
mod send_policy;
mod settings;
mod stats;
mod tls;

pub use callbacks::{Message, SessionCallbacks};
pub use engine::{create, Messenger, SendBehavior};
pub use error::{ConnectError, ErrorDetails};
pub use settings::{ConnectionConfig, ProxySettings, ServerSettings};
pub use stats::ConnectionStats;

/// The `User-Agent` sent with the proxy `CONNECT` request and the WebSocket
/// upgrade. Built once per process, not a per-request allocation — the
/// source's `GetDefaultUserAgent` used a process-wide mutable cache for the
/// same reason; a `OnceLock` gives the identical effect without a mutable
/// global.
pub(crate) fn user_agent() -> &'static str {
    static USER_AGENT: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    USER_AGENT.get_or_init(|| format!("ws-session/{} (Rust)", env!("CARGO_PKG_VERSION")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_is_stable_across_calls() {
        assert_eq!(user_agent(), user_agent());
        assert!(user_agent().starts_with("ws-session/"));
    }
}
