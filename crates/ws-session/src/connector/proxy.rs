//! HTTP CONNECT proxy tunnel connector.
//!
//! Reads the proxy's response one byte at a time so that, on success, the
//! returned stream carries no bytes past the blank line terminating the
//! response headers — those bytes belong to the TLS layer that follows.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{ConnectError, Result};
use crate::settings::ProxySettings;

use super::{DirectConnector, PROXY_TIMEOUT};

/// The maximum size of a CONNECT response we are willing to buffer before
/// giving up; guards against a misbehaving proxy never sending a blank line.
const MAX_RESPONSE_HEADER_BYTES: usize = 8 * 1024;

pub(crate) struct ProxyConnector {
    proxy: ProxySettings,
}

impl ProxyConnector {
    pub(crate) fn new(proxy: ProxySettings) -> Self {
        Self { proxy }
    }

    pub(crate) async fn connect(&self, target_host: &str, target_port: u16) -> Result<TcpStream> {
        tokio::time::timeout(
            PROXY_TIMEOUT,
            self.connect_inner(target_host, target_port),
        )
        .await
        .map_err(|_| ConnectError::ProxyTimeout {
            host: self.proxy.host.clone(),
            port: self.proxy.port,
        })?
    }

    async fn connect_inner(&self, target_host: &str, target_port: u16) -> Result<TcpStream> {
        let mut stream = DirectConnector
            .connect(&self.proxy.host, self.proxy.port)
            .await?;

        let request = self.build_connect_request(target_host, target_port);
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(ConnectError::Socket)?;

        read_connect_response(&mut stream).await?;

        Ok(stream)
    }

    fn build_connect_request(&self, target_host: &str, target_port: u16) -> String {
        let mut request = format!(
            "CONNECT {target_host}:{target_port} HTTP/1.1\r\n\
             Host: {proxy_host}\r\n\
             User-Agent: {agent}\r\n\
             Proxy-Connection: Keep-Alive\r\n\
             Connection: Keep-Alive\r\n",
            proxy_host = self.proxy.host,
            agent = crate::user_agent(),
        );

        if let Some(auth) = self.proxy.authorization_header() {
            request.push_str("Proxy-Authorization: ");
            request.push_str(&auth);
            request.push_str("\r\n");
        }

        request.push_str("\r\n");
        request
    }
}

/// Read exactly the status line and headers of the proxy's response,
/// leaving no trailing bytes buffered for the caller.
async fn read_connect_response(stream: &mut TcpStream) -> Result<()> {
    let mut buf = Vec::with_capacity(512);
    let mut byte = [0_u8; 1];

    loop {
        if buf.len() >= MAX_RESPONSE_HEADER_BYTES {
            return Err(ConnectError::ProxyProtocol(
                "proxy response headers exceeded the size limit".to_string(),
            ));
        }

        let n = stream.read(&mut byte).await.map_err(ConnectError::Socket)?;
        if n == 0 {
            return Err(ConnectError::ProxyProtocol(
                "proxy closed the connection before sending a complete response".to_string(),
            ));
        }
        buf.push(byte[0]);

        if buf.ends_with(b"\r\n\r\n") {
            break;
        }
    }

    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut response = httparse::Response::new(&mut headers);
    let parsed = response
        .parse(&buf)
        .map_err(|e| ConnectError::ProxyProtocol(format!("malformed proxy response: {e}")))?;

    if parsed.is_partial() {
        return Err(ConnectError::ProxyProtocol(
            "proxy response headers were truncated".to_string(),
        ));
    }

    match response.code {
        Some(200) => Ok(()),
        Some(status) => Err(ConnectError::ProxyStatus {
            status,
            reason: response.reason.unwrap_or("unknown").to_string(),
        }),
        None => Err(ConnectError::ProxyProtocol(
            "proxy response had no status line".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ProxySettings;

    #[test]
    fn connect_request_headers_are_in_spec_order_without_credentials() {
        let connector = ProxyConnector::new(ProxySettings::new("proxy.example.com", 3128));
        let request = connector.build_connect_request("echo.example.com", 443);

        let lines: Vec<&str> = request.split("\r\n").collect();
        assert_eq!(lines[0], "CONNECT echo.example.com:443 HTTP/1.1");
        assert_eq!(lines[1], "Host: proxy.example.com");
        assert!(lines[2].starts_with("User-Agent: ws-session/"));
        assert_eq!(lines[3], "Proxy-Connection: Keep-Alive");
        assert_eq!(lines[4], "Connection: Keep-Alive");
        assert_eq!(lines[5], "");
        assert_eq!(lines[6], "");
        assert!(!request.contains("Proxy-Authorization"));
    }

    #[test]
    fn connect_request_adds_basic_proxy_authorization_when_credentials_present() {
        let proxy = ProxySettings::new("proxy.example.com", 3128).credentials("alice", "hunter2");
        let connector = ProxyConnector::new(proxy);
        let request = connector.build_connect_request("echo.example.com", 443);

        let expected = format!(
            "Proxy-Authorization: Basic {}",
            {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD.encode("alice:hunter2")
            }
        );
        assert!(request.contains(&expected));
        let auth_idx = request.find("Proxy-Authorization").unwrap();
        let blank_idx = request.find("\r\n\r\n").unwrap();
        assert!(auth_idx < blank_idx);
    }

    #[test]
    fn empty_username_suppresses_the_authorization_header() {
        let proxy = ProxySettings::new("proxy.example.com", 3128).credentials("", "hunter2");
        let connector = ProxyConnector::new(proxy);
        let request = connector.build_connect_request("echo.example.com", 443);

        assert!(!request.contains("Proxy-Authorization"));
    }

    async fn respond_with(response: &'static str) -> TcpStream {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(response.as_bytes()).await.unwrap();
            // Leave the connection open so the client never sees EOF before
            // the blank line is found; the client stops reading there.
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        });

        let client = TcpStream::connect(addr).await.unwrap();
        tokio::spawn(server);
        client
    }

    #[tokio::test]
    async fn a_200_response_leaves_no_buffered_bytes_behind() {
        let mut stream = respond_with("HTTP/1.1 200 Connection Established\r\n\r\n").await;
        assert!(read_connect_response(&mut stream).await.is_ok());
    }

    #[tokio::test]
    async fn a_non_200_status_maps_to_a_proxy_status_error() {
        let mut stream =
            respond_with("HTTP/1.1 407 Proxy Authentication Required\r\n\r\n").await;
        let err = read_connect_response(&mut stream).await.unwrap_err();
        match err {
            ConnectError::ProxyStatus { status, .. } => assert_eq!(status, 407),
            other => panic!("expected ProxyStatus, got {other:?}"),
        }
    }
}
