//! Turns `ServerSettings` into a TLS-ready TCP stream for the WebSocket
//! upgrade, either directly or through an HTTP CONNECT proxy tunnel.
//!
//! A `Connector` is constructed fresh for every session attempt; it is never
//! reused across attempts.

mod direct;
mod proxy;

use tokio::net::TcpStream;

use crate::error::Result;
use crate::settings::ServerSettings;

pub(crate) use direct::DirectConnector;
pub(crate) use proxy::ProxyConnector;

/// Lower-layer connect deadline before the TLS handshake begins.
pub(crate) const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);
/// Deadline covering the entire HTTP CONNECT request/response exchange.
pub(crate) const PROXY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// A one-shot connection strategy: direct, or tunneled through a proxy.
///
/// Closed set by design (REDESIGN FLAGS: a fixed two-variant enum is
/// preferred over a trait object here, since no third variant is expected).
pub(crate) enum Connector {
    Direct(DirectConnector),
    Proxy(ProxyConnector),
}

impl Connector {
    /// Build the connector implied by `settings.proxy`.
    pub(crate) fn for_settings(settings: &ServerSettings) -> Self {
        match &settings.proxy {
            None => Connector::Direct(DirectConnector),
            Some(proxy) => Connector::Proxy(ProxyConnector::new(proxy.clone())),
        }
    }

    /// Produce a TCP stream positioned exactly at the start of the TLS
    /// record layer: no buffered bytes belonging to TLS are left behind,
    /// and on failure the stream is unusable and must be discarded.
    pub(crate) async fn connect(&self, settings: &ServerSettings) -> Result<TcpStream> {
        match self {
            Connector::Direct(d) => d.connect(&settings.host, settings.port).await,
            Connector::Proxy(p) => p.connect(&settings.host, settings.port).await,
        }
    }
}
