//! Connection settings: server, proxy and top-level engine configuration.

/// The remote WebSocket endpoint to connect to.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Host to resolve and connect to (never empty).
    pub host: String,
    /// TCP port, default 443.
    pub port: u16,
    /// Request target, a URI path plus optional query, must begin with `/`.
    pub target: String,
    /// Optional HTTP CONNECT proxy to tunnel through.
    pub proxy: Option<ProxySettings>,
}

impl ServerSettings {
    /// Create settings for a direct (non-proxied) connection.
    pub fn new(host: impl Into<String>, port: u16, target: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            target: target.into(),
            proxy: None,
        }
    }

    /// Attach proxy settings, selecting the proxy connector variant.
    pub fn proxy(mut self, proxy: ProxySettings) -> Self {
        self.proxy = Some(proxy);
        self
    }
}

/// An HTTP CONNECT proxy to tunnel the TCP stream through before TLS.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxySettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }

    /// Attach credentials; emitted as a `Basic` `Proxy-Authorization` header.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// The `Proxy-Authorization` header value, if credentials are present.
    pub(crate) fn authorization_header(&self) -> Option<String> {
        let username = self.username.as_ref()?;
        if username.is_empty() {
            return None;
        }
        let password = self.password.clone().unwrap_or_default();
        let raw = format!("{}:{}", username, password);
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
        Some(format!("Basic {}", encoded))
    }
}

/// Top-level configuration for one Session Engine.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub server: ServerSettings,
    /// Always true; plaintext sessions are rejected at construction.
    pub tls_required: bool,
    /// Number of consecutive failed attempts tolerated before escalating to
    /// `signal_critical_failure`.
    pub critical_failure_threshold: u32,
    /// Maximum number of queued-but-unsent messages; 0 means unbounded.
    pub max_send_queue_size: usize,
}

impl ConnectionConfig {
    pub fn new(server: ServerSettings) -> Self {
        Self {
            server,
            tls_required: true,
            critical_failure_threshold: 5,
            max_send_queue_size: 0,
        }
    }

    pub fn critical_failure_threshold(mut self, threshold: u32) -> Self {
        self.critical_failure_threshold = threshold;
        self
    }

    pub fn max_send_queue_size(mut self, size: usize) -> Self {
        self.max_send_queue_size = size;
        self
    }
}
