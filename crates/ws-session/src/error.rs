//! Error types surfaced by the connector, client and session engine.

use std::fmt;

/// Errors that can occur while establishing or running one session attempt.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("resolving '{host}' failed: {source}")]
    Dns {
        host: String,
        #[source]
        source: hickory_resolver::ResolveError,
    },

    #[error("no endpoint for '{host}' was reachable within the connect deadline")]
    NoReachableEndpoint { host: String },

    #[error("connect to {host}:{port} timed out")]
    ConnectTimeout { host: String, port: u16 },

    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    #[error("proxy CONNECT to {host}:{port} timed out")]
    ProxyTimeout { host: String, port: u16 },

    #[error("proxy CONNECT failed: {status} {reason}")]
    ProxyStatus { status: u16, reason: String },

    #[error("malformed proxy response: {0}")]
    ProxyProtocol(String),

    #[error("TLS setup failed: {0}")]
    TlsSetup(String),

    #[error("TLS handshake timed out")]
    TlsTimeout,

    #[error("TLS handshake failed: {0}")]
    Tls(#[from] rustls::Error),

    #[error("WebSocket handshake failed: {0}")]
    WebSocketHandshake(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("plaintext sessions are not supported; ConnectionConfig::tls_required must be true")]
    PlaintextNotSupported,
}

/// Human-readable error detail delivered to `on_disconnected`.
///
/// `code == 0` denotes an orderly close with no specific error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetails {
    pub message: String,
    pub code: u32,
}

impl ErrorDetails {
    /// The sentinel used for an orderly close with no prior error.
    pub fn none() -> Self {
        Self {
            message: "connection closed cleanly".to_string(),
            code: 0,
        }
    }

    /// Fallback used when a session ends and no specific cause was recorded.
    pub fn unspecified() -> Self {
        Self {
            message: "connection closed cleanly or an unspecified error occurred".to_string(),
            code: 0,
        }
    }
}

impl fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl From<&ConnectError> for ErrorDetails {
    fn from(err: &ConnectError) -> Self {
        let code = match err {
            ConnectError::Dns { .. } => 1,
            ConnectError::NoReachableEndpoint { .. } => 2,
            ConnectError::ConnectTimeout { .. } => 3,
            ConnectError::Socket(_) => 4,
            ConnectError::ProxyTimeout { .. } => 5,
            ConnectError::ProxyStatus { .. } => 6,
            ConnectError::ProxyProtocol(_) => 7,
            ConnectError::TlsSetup(_) => 8,
            ConnectError::TlsTimeout => 9,
            ConnectError::Tls(_) => 10,
            ConnectError::WebSocketHandshake(_) => 11,
            ConnectError::PlaintextNotSupported => 12,
        };
        Self {
            message: err.to_string(),
            code,
        }
    }
}

impl From<ConnectError> for ErrorDetails {
    fn from(err: ConnectError) -> Self {
        ErrorDetails::from(&err)
    }
}

pub type Result<T> = std::result::Result<T, ConnectError>;
