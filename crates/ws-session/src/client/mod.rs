//! Drives one TLS + WebSocket handshake, then pumps reads and forwards
//! writes for the lifetime of a single session attempt.

mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rustls_pki_types::ServerName;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use crate::callbacks::Message;
use crate::connector::Connector;
use crate::error::{ConnectError, ErrorDetails};
use crate::settings::ServerSettings;

pub(crate) use state::ClientState;
use state::AtomicState;

const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of one write attempt, reported back to the send policy.
///
/// `Timeout` is declared in the wire contract but never produced by this
/// implementation; policies treat any non-`Success` as `Failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteStatus {
    Success,
    Failure,
}

/// The narrow set of callbacks a Client drives into the owning engine.
///
/// All methods are invoked from the engine's I/O thread.
#[async_trait::async_trait]
pub(crate) trait ClientEvents: Send + Sync + 'static {
    async fn on_connected(&self);
    async fn on_message_received(&self, message: Message);
    async fn on_disconnected(&self, error: ErrorDetails);
    async fn on_message_write_completed(&self, status: WriteStatus);
}

enum Command {
    Send(Message),
    Close,
}

/// One TLS + WebSocket session attempt. Never reused after it reaches
/// `Disconnected`; a retry constructs a new `Client`.
pub(crate) struct Client {
    state: AtomicState,
    should_stop: Arc<AtomicBool>,
    close_requested: Arc<Notify>,
    terminal: Arc<Notify>,
    command_tx: mpsc::UnboundedSender<Command>,
}

impl Client {
    /// Begin the staged handshake and spawn the read/write loop on the
    /// current Tokio runtime. Returns a handle usable from the I/O thread;
    /// the handshake itself runs asynchronously.
    pub(crate) fn open<E: ClientEvents>(
        settings: ServerSettings,
        tls_config: Arc<rustls::ClientConfig>,
        events: Arc<E>,
    ) -> Arc<Client> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let should_stop = Arc::new(AtomicBool::new(false));
        let close_requested = Arc::new(Notify::new());
        let terminal = Arc::new(Notify::new());

        let client = Arc::new(Client {
            state: AtomicState::new(ClientState::Ready),
            should_stop: should_stop.clone(),
            close_requested: close_requested.clone(),
            terminal: terminal.clone(),
            command_tx,
        });

        tokio::spawn(run(
            settings,
            tls_config,
            events,
            command_rx,
            should_stop,
            close_requested,
            terminal,
            client.clone(),
        ));

        client
    }

    /// Resolves once this attempt has reached `Disconnected`. Used by the
    /// engine to avoid tearing down the I/O runtime mid-teardown.
    pub(crate) async fn wait_terminal(&self) {
        let notified = self.terminal.notified();
        if self.state.load() == ClientState::Disconnected {
            return;
        }
        notified.await;
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state.load() == ClientState::Connected
    }

    /// Submit one write. Only valid while `Connected`; the caller (a send
    /// policy) is responsible for ensuring at most one write is in flight.
    pub(crate) fn send(&self, message: Message) -> bool {
        if self.state.load() != ClientState::Connected {
            return false;
        }
        self.command_tx.send(Command::Send(message)).is_ok()
    }

    /// Idempotent, callable from any thread. Claims the close exactly once;
    /// subsequent calls are no-ops.
    pub(crate) fn close(&self) {
        if self
            .should_stop
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.close_requested.notify_one();
            let _ = self.command_tx.send(Command::Close);
        }
    }
}

async fn run<E: ClientEvents>(
    settings: ServerSettings,
    tls_config: Arc<rustls::ClientConfig>,
    events: Arc<E>,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
    should_stop: Arc<AtomicBool>,
    close_requested: Arc<Notify>,
    terminal: Arc<Notify>,
    client: Arc<Client>,
) {
    let outcome = tokio::select! {
        result = handshake(&settings, tls_config) => Some(result),
        _ = close_requested.notified() => None,
    };

    match outcome {
        Some(Ok(ws_stream)) => {
            tracing::debug!(target: "ws_session::client", host = %settings.host, "handshake complete");
            client.state.store(ClientState::Connected);
            events.on_connected().await;
            pump(ws_stream, &mut command_rx, &should_stop, &events, &client).await;
        }
        Some(Err(err)) => {
            tracing::warn!(target: "ws_session::client", host = %settings.host, %err, "handshake failed");
            client.state.store(ClientState::Disconnected);
            events.on_disconnected(ErrorDetails::from(&err)).await;
        }
        None => {
            tracing::debug!(target: "ws_session::client", host = %settings.host, "closed before the handshake completed");
            client.state.store(ClientState::Disconnected);
            events.on_disconnected(ErrorDetails::none()).await;
        }
    }

    terminal.notify_one();
}

type TlsStream = tokio_rustls::client::TlsStream<TcpStream>;

async fn handshake(
    settings: &ServerSettings,
    tls_config: Arc<rustls::ClientConfig>,
) -> Result<WebSocketStream<TlsStream>, ConnectError> {
    let connector = Connector::for_settings(settings);
    let tcp_stream = connector.connect(settings).await?;

    let server_name = ServerName::try_from(settings.host.clone())
        .map_err(|_| ConnectError::TlsSetup(format!("invalid host name '{}'", settings.host)))?;

    let tls_connector = tokio_rustls::TlsConnector::from(tls_config);
    let tls_stream = tokio::time::timeout(
        TLS_HANDSHAKE_TIMEOUT,
        tls_connector.connect(server_name, tcp_stream),
    )
    .await
    .map_err(|_| ConnectError::TlsTimeout)??;

    let request = build_upgrade_request(settings)?;
    let (ws_stream, _response) = tokio_tungstenite::client_async(request, tls_stream).await?;

    Ok(ws_stream)
}

fn build_upgrade_request(
    settings: &ServerSettings,
) -> Result<http::Request<()>, ConnectError> {
    let uri = format!("wss://{}:{}{}", settings.host, settings.port, settings.target);
    let mut request = uri
        .into_client_request()
        .map_err(ConnectError::WebSocketHandshake)?;
    request.headers_mut().insert(
        http::header::HOST,
        http::HeaderValue::from_str(&format!("{}:{}", settings.host, settings.port))
            .map_err(|e| ConnectError::TlsSetup(e.to_string()))?,
    );
    Ok(request)
}

async fn pump<E: ClientEvents>(
    mut ws_stream: WebSocketStream<TlsStream>,
    command_rx: &mut mpsc::UnboundedReceiver<Command>,
    should_stop: &Arc<AtomicBool>,
    events: &Arc<E>,
    client: &Arc<Client>,
) {
    let mut recorded_error: Option<ErrorDetails> = None;

    loop {
        if should_stop.load(Ordering::Acquire) {
            let _ = ws_stream
                .close(Some(tokio_tungstenite::tungstenite::protocol::CloseFrame {
                    code: tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::Normal,
                    reason: "".into(),
                }))
                .await;
            break;
        }

        tokio::select! {
            cmd = command_rx.recv() => {
                match cmd {
                    Some(Command::Send(message)) => {
                        let ws_message: WsMessage = message.into();
                        let status = match ws_stream.send(ws_message).await {
                            Ok(()) => WriteStatus::Success,
                            Err(err) => {
                                recorded_error = Some(ErrorDetails::from(&ConnectError::WebSocketHandshake(err)));
                                WriteStatus::Failure
                            }
                        };
                        events.on_message_write_completed(status).await;
                        if status == WriteStatus::Failure {
                            break;
                        }
                    }
                    Some(Command::Close) => continue,
                    None => break,
                }
            }
            frame = ws_stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        events.on_message_received(Message::Text(text.to_string())).await;
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        events.on_message_received(Message::Binary(data.to_vec())).await;
                    }
                    Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {}
                    Some(Ok(WsMessage::Frame(_))) => {}
                    Some(Ok(WsMessage::Close(frame))) => {
                        if let Some(frame) = frame {
                            if u16::from(frame.code) != 1000 {
                                recorded_error = Some(ErrorDetails {
                                    message: frame.reason.to_string(),
                                    code: u16::from(frame.code) as u32,
                                });
                            }
                        }
                        break;
                    }
                    Some(Err(err)) => {
                        recorded_error = Some(ErrorDetails::from(&ConnectError::WebSocketHandshake(err)));
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    should_stop.store(true, Ordering::Release);
    client.state.store(ClientState::Disconnected);
    let error = recorded_error.unwrap_or_else(ErrorDetails::unspecified);
    tracing::debug!(target: "ws_session::client", %error, "session ended");
    events.on_disconnected(error).await;
}
