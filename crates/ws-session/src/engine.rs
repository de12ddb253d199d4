//! The Session Engine (Messenger): owns the I/O runtime, the current
//! Client, statistics, and the reconnect supervisor. Implements the public
//! façade described in `lib.rs`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle};

use crate::callbacks::{Message, SessionCallbacks};
use crate::client::{Client, ClientEvents, WriteStatus};
use crate::error::{ConnectError, ErrorDetails};
use crate::send_policy::{
    AsyncSendPolicy, PolicyContext, SendPolicy, SendPolicyFactory, SyncSendPolicy,
};
use crate::settings::{ConnectionConfig, ServerSettings};
use crate::stats::{ConnectionStats, Stats};
use crate::tls;

/// The paced retry interval used by `wait_and_reconnect`.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// The floor applied when the previous attempt already consumed the delay.
const RECONNECT_FLOOR: Duration = Duration::from_secs(1);

/// Which send policy an engine was built with.
pub enum SendBehavior {
    Sync,
    Async,
    Custom(Box<dyn SendPolicyFactory>),
}

struct IoThread {
    handle: Handle,
    /// Keeps the I/O thread's runtime alive until `close` sends on it.
    shutdown: tokio::sync::oneshot::Sender<()>,
    join_handle: std::thread::JoinHandle<()>,
}

/// Owns one resilient WebSocket session. Construct with [`create`].
pub struct Messenger {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    self_weak: OnceLock<Weak<EngineInner>>,
    callbacks: Arc<dyn SessionCallbacks>,
    config: Mutex<ConnectionConfig>,

    tls_config: OnceLock<Arc<rustls::ClientConfig>>,
    io: Mutex<Option<IoThread>>,
    io_thread_id: OnceLock<ThreadId>,

    current_client: Mutex<Option<Arc<Client>>>,
    send_policy: OnceLock<Box<dyn SendPolicy>>,

    stats: Stats,
    stop_requested: Arc<AtomicBool>,
    pending_critical_failure_handling: AtomicBool,
    reconnect_attempts: Mutex<u32>,
    last_reconnect_attempt: Mutex<Instant>,
    timer_generation: AtomicU64,
    /// Claimed exactly once by the first successful `open()`; a second call
    /// without an intervening `close()` is rejected rather than silently
    /// spawning a second I/O thread and client alongside the first.
    opened: AtomicBool,
}

/// Build a new engine. Fails only on a malformed configuration: plaintext
/// sessions are rejected outright (there is no plaintext code path to
/// reject into; this simply refuses construction).
pub fn create(
    callbacks: Arc<dyn SessionCallbacks>,
    config: ConnectionConfig,
    send_behavior: SendBehavior,
) -> Result<Messenger, ConnectError> {
    if !config.tls_required {
        return Err(ConnectError::PlaintextNotSupported);
    }

    let inner = Arc::new(EngineInner {
        self_weak: OnceLock::new(),
        callbacks,
        config: Mutex::new(config),
        tls_config: OnceLock::new(),
        io: Mutex::new(None),
        io_thread_id: OnceLock::new(),
        current_client: Mutex::new(None),
        send_policy: OnceLock::new(),
        stats: Stats::new(),
        stop_requested: Arc::new(AtomicBool::new(false)),
        pending_critical_failure_handling: AtomicBool::new(false),
        reconnect_attempts: Mutex::new(0),
        last_reconnect_attempt: Mutex::new(Instant::now()),
        timer_generation: AtomicU64::new(0),
        opened: AtomicBool::new(false),
    });

    let _ = inner.self_weak.set(Arc::downgrade(&inner));

    let ctx: Arc<dyn PolicyContext> = inner.clone();
    let policy: Box<dyn SendPolicy> = match send_behavior {
        SendBehavior::Sync => Box::new(SyncSendPolicy::new(ctx)),
        SendBehavior::Async => Box::new(AsyncSendPolicy::new(ctx)),
        SendBehavior::Custom(factory) => factory.build(ctx),
    };
    let _ = inner.send_policy.set(policy);

    Ok(Messenger { inner })
}

impl Messenger {
    /// Start the I/O thread and the first session attempt.
    ///
    /// Returns `true` iff the TLS context was built and the runtime and
    /// first client were successfully scheduled; otherwise `close` is
    /// called and `false` is returned.
    pub fn open(&self) -> bool {
        let tls_config = match tls::build_client_config() {
            Ok(cfg) => cfg,
            Err(err) => {
                tracing::error!(%err, "TLS context setup failed");
                return false;
            }
        };
        self.start_io_and_first_client(tls_config)
    }

    fn start_io_and_first_client(&self, tls_config: Arc<rustls::ClientConfig>) -> bool {
        if self
            .inner
            .opened
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!(target: "ws_session::engine", "open() called twice without an intervening close(); ignoring");
            return false;
        }

        let _ = self.inner.tls_config.set(tls_config);

        match spawn_io_thread(&self.inner) {
            Ok(io) => {
                *self.inner.io.lock() = Some(io);
            }
            Err(err) => {
                tracing::error!(%err, "failed to start the I/O thread");
                self.close();
                return false;
            }
        }

        let inner = self.inner.clone();
        let handle = self.inner.io.lock().as_ref().unwrap().handle.clone();
        handle.spawn(async move {
            create_and_open_client(&inner);
        });

        true
    }

    /// Submit one message; delegates to the configured send policy.
    /// Rejects immediately if `close` has been requested.
    pub fn send(&self, message: Message) -> bool {
        if self.inner.stop_requested.load(Ordering::Acquire) {
            return false;
        }
        match self.inner.send_policy.get() {
            Some(policy) => policy.send(message),
            None => false,
        }
    }

    /// Idempotent, blocking. Tears the session down and joins the I/O
    /// thread, unless called from that thread itself (in which case the
    /// thread is left to exit on its own once the current task returns).
    pub fn close(&self) {
        if self
            .inner
            .stop_requested
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let called_from_io_thread = self.inner.is_in_io_thread();

        let io = match self.inner.io.lock().take() {
            Some(io) => io,
            None => return,
        };

        let inner = self.inner.clone();
        let handle = io.handle.clone();
        let shutdown = io.shutdown;
        handle.spawn(async move {
            inner.timer_generation.fetch_add(1, Ordering::AcqRel);
            let client = inner.current_client.lock().take();
            if let Some(client) = client {
                client.close();
                client.wait_terminal().await;
            }
            let _ = shutdown.send(());
        });

        if !called_from_io_thread {
            let _ = io.join_handle.join();
        }
    }

    /// A snapshot of all counters.
    pub fn get_connection_stats(&self) -> ConnectionStats {
        self.inner.stats.snapshot()
    }

    /// Resume retries after a critical-failure escalation, optionally
    /// replacing the server settings first. Returns `false` (and does
    /// nothing) unless a critical failure is currently pending.
    pub fn schedule_reconnect(&self, new_settings: Option<ServerSettings>) -> bool {
        if self.inner.stop_requested.load(Ordering::Acquire) {
            return false;
        }

        if self
            .inner
            .pending_critical_failure_handling
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let inner = self.inner.clone();
        if let Some(io) = self.inner.io.lock().as_ref() {
            let handle = io.handle.clone();
            handle.spawn(async move {
                if let Some(settings) = new_settings {
                    inner.config.lock().server = settings;
                }
                if let Some(client) = inner.current_client.lock().take() {
                    client.close();
                }
                *inner.reconnect_attempts.lock() = 0;
                handle_reconnect(&inner);
            });
        }

        true
    }
}

fn spawn_io_thread(inner: &Arc<EngineInner>) -> std::io::Result<IoThread> {
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Handle>();
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let thread_id_cell = inner.clone();

    let join_handle = std::thread::Builder::new()
        .name("ws-session-io".to_string())
        .spawn(move || {
            let rt = Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build the single-threaded I/O runtime");

            let _ = thread_id_cell
                .io_thread_id
                .set(std::thread::current().id());
            let _ = ready_tx.send(rt.handle().clone());

            rt.block_on(async move {
                // Keeps the runtime alive until `close` fires the shutdown signal.
                let _ = shutdown_rx.await;
            });
        })?;

    let handle = ready_rx
        .recv()
        .expect("I/O thread dropped before reporting its runtime handle");

    Ok(IoThread {
        handle,
        shutdown: shutdown_tx,
        join_handle,
    })
}

fn create_and_open_client(inner: &Arc<EngineInner>) {
    *inner.last_reconnect_attempt.lock() = Instant::now();

    let settings = inner.config.lock().server.clone();
    let tls_config = inner
        .tls_config
        .get()
        .expect("TLS context is built before the first client")
        .clone();

    let client = Client::open(settings, tls_config, inner.clone());
    *inner.current_client.lock() = Some(client);
}

/// `handle_reconnect`: advance the retry counter and either start a new
/// attempt or escalate to a critical failure.
fn handle_reconnect(inner: &Arc<EngineInner>) {
    let threshold = inner.config.lock().critical_failure_threshold;
    let attempts = {
        let mut guard = inner.reconnect_attempts.lock();
        *guard += 1;
        *guard
    };

    if attempts > threshold {
        tracing::error!(target: "ws_session::engine", attempts, threshold, "reconnect budget exhausted, signaling critical failure");
        inner
            .pending_critical_failure_handling
            .store(true, Ordering::Release);
        let callbacks = inner.callbacks.clone();
        tokio::spawn(async move {
            callbacks.signal_critical_failure().await;
        });
        return;
    }

    tracing::debug!(target: "ws_session::engine", attempts, "starting a new reconnect attempt");
    create_and_open_client(inner);
}

/// `wait_and_reconnect`: pace the next attempt, honoring the 5s delay with
/// a 1s floor, and arm a cancelable timer.
fn wait_and_reconnect(inner: &Arc<EngineInner>) {
    if inner.pending_critical_failure_handling.load(Ordering::Acquire) {
        handle_reconnect(inner);
        return;
    }

    let elapsed = inner.last_reconnect_attempt.lock().elapsed();
    let wait = RECONNECT_DELAY
        .checked_sub(elapsed)
        .filter(|d| !d.is_zero())
        .unwrap_or(RECONNECT_FLOOR);

    let generation = inner.timer_generation.fetch_add(1, Ordering::AcqRel) + 1;
    let inner = inner.clone();

    tokio::spawn(async move {
        tokio::time::sleep(wait).await;
        if inner.timer_generation.load(Ordering::Acquire) != generation {
            return; // canceled by a subsequent close/reconnect/timer rearm
        }
        if inner.stop_requested.load(Ordering::Acquire) {
            return;
        }
        handle_reconnect(&inner);
    });
}

#[async_trait::async_trait]
impl ClientEvents for EngineInner {
    async fn on_connected(&self) {
        *self.reconnect_attempts.lock() = 0;
        self.callbacks.on_connected().await;
        if let Some(policy) = self.send_policy.get() {
            policy.on_connected();
        }
    }

    async fn on_message_received(&self, message: Message) {
        self.stats.record_received(message.byte_len());
        self.callbacks.on_message_received(message).await;
    }

    async fn on_disconnected(&self, error: ErrorDetails) {
        self.callbacks.on_disconnected(error).await;
        if !self.stop_requested.load(Ordering::Acquire) {
            if let Some(inner) = self.self_weak.get().and_then(Weak::upgrade) {
                wait_and_reconnect(&inner);
            }
        }
    }

    async fn on_message_write_completed(&self, status: WriteStatus) {
        if let Some(policy) = self.send_policy.get() {
            policy.on_message_write_completed(status);
        }
    }
}

impl PolicyContext for EngineInner {
    fn is_client_connected(&self) -> bool {
        self.current_client
            .lock()
            .as_ref()
            .map(|c| c.is_connected())
            .unwrap_or(false)
    }

    fn has_client(&self) -> bool {
        self.current_client.lock().is_some()
    }

    fn is_ready_for_synchronous_send(&self) -> bool {
        !self.stop_requested.load(Ordering::Acquire) && self.has_client()
    }

    fn is_in_io_thread(&self) -> bool {
        self.io_thread_id
            .get()
            .map(|id| *id == std::thread::current().id())
            .unwrap_or(false)
    }

    fn max_send_queue_size(&self) -> usize {
        self.config.lock().max_send_queue_size
    }

    fn post_to_io(&self, task: Box<dyn FnOnce() + Send>) {
        let handle = match self.io.lock().as_ref() {
            Some(io) => io.handle.clone(),
            None => return,
        };
        handle.spawn(async move { task() });
    }

    fn client_send(&self, message: Message) -> bool {
        match self.current_client.lock().as_ref() {
            Some(client) => client.send(message),
            None => false,
        }
    }

    fn queue_incremented(&self) {
        self.stats.queue_incremented();
    }

    fn queue_decremented(&self) {
        self.stats.queue_decremented();
    }

    fn record_message_sent(&self, bytes: usize) {
        self.stats.record_sent(bytes);
    }
}

#[cfg(test)]
impl Messenger {
    /// Test-only entry point that skips the native trust-store load and
    /// installs an explicit `ClientConfig` — e.g. one trusting a freshly
    /// generated test certificate — before starting the I/O thread. No
    /// production code path takes this shortcut; `open()` always loads the
    /// platform trust store.
    pub(crate) fn open_with_tls_config(&self, tls_config: Arc<rustls::ClientConfig>) -> bool {
        self.start_io_and_first_client(tls_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use rcgen::{generate_simple_self_signed, CertifiedKey};
    use rustls::{ClientConfig, RootCertStore, ServerConfig};
    use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
    use tokio::net::TcpListener;
    use tokio::sync::Notify;
    use tokio_rustls::TlsAcceptor;

    use crate::callbacks::{Message, SessionCallbacks};
    use crate::settings::{ConnectionConfig, ServerSettings};

    fn install_crypto_provider() {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }

    /// Spins up a one-shot local WebSocket-over-TLS echo server for
    /// `localhost`, backed by a freshly generated self-signed certificate,
    /// and returns the port plus a `ClientConfig` that trusts exactly that
    /// certificate (hostname/chain verification still runs for real).
    async fn start_echo_server() -> (u16, Arc<rustls::ClientConfig>) {
        install_crypto_provider();

        let CertifiedKey { cert, signing_key } =
            generate_simple_self_signed(vec!["localhost".to_string()]).expect("self-signed cert");
        let cert_der: CertificateDer<'static> = cert.der().clone();
        let key_der = PrivatePkcs8KeyDer::from(signing_key.serialize_der());

        let server_config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der.clone()], PrivateKeyDer::Pkcs8(key_der))
            .expect("valid server cert/key pair");
        let acceptor = TlsAcceptor::from(Arc::new(server_config));

        let mut roots = RootCertStore::empty();
        roots.add(cert_der).expect("adding a freshly generated cert");
        let client_config = Arc::new(
            ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let tls_stream = acceptor.accept(stream).await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tls_stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
                if ws.send(msg).await.is_err() {
                    break;
                }
            }
        });

        (port, client_config)
    }

    struct RecordingCallbacks {
        connected: Notify,
        received: parking_lot::Mutex<Vec<Message>>,
        message_received: Notify,
    }

    impl RecordingCallbacks {
        fn new() -> Self {
            Self {
                connected: Notify::new(),
                received: parking_lot::Mutex::new(Vec::new()),
                message_received: Notify::new(),
            }
        }
    }

    #[async_trait::async_trait]
    impl SessionCallbacks for RecordingCallbacks {
        async fn on_message_received(&self, message: Message) {
            self.received.lock().push(message);
            self.message_received.notify_one();
        }
        async fn on_connected(&self) {
            self.connected.notify_one();
        }
        async fn on_disconnected(&self, _error: ErrorDetails) {}
        async fn signal_critical_failure(&self) {}
    }

    struct SilentCallbacks;

    #[async_trait::async_trait]
    impl SessionCallbacks for SilentCallbacks {
        async fn on_message_received(&self, _message: Message) {}
        async fn on_connected(&self) {}
        async fn on_disconnected(&self, _error: ErrorDetails) {}
        async fn signal_critical_failure(&self) {}
    }

    #[tokio::test]
    async fn happy_path_echo_round_trip() {
        let (port, client_config) = start_echo_server().await;

        let callbacks = Arc::new(RecordingCallbacks::new());
        let server = ServerSettings::new("localhost", port, "/");
        let config = ConnectionConfig::new(server);
        let messenger = create(callbacks.clone(), config, SendBehavior::Async).unwrap();

        assert!(messenger.open_with_tls_config(client_config));

        tokio::time::timeout(Duration::from_secs(5), callbacks.connected.notified())
            .await
            .expect("did not connect within the deadline");

        assert!(messenger.send(Message::Text("hello".to_string())));

        tokio::time::timeout(Duration::from_secs(5), callbacks.message_received.notified())
            .await
            .expect("did not receive the echo within the deadline");

        messenger.close();

        let stats = messenger.get_connection_stats();
        assert_eq!(stats.total_messages_sent, 1);
        assert_eq!(stats.total_messages_received, 1);
        assert_eq!(stats.current_send_queue_size, 0);
        assert_eq!(
            callbacks.received.lock().as_slice(),
            &[Message::Text("hello".to_string())]
        );
    }

    #[tokio::test]
    async fn queue_overflow_drops_silently_once_at_capacity() {
        install_crypto_provider();

        // Bind then drop immediately: nothing listens on this port, so
        // every connect attempt fails fast and the client never reaches
        // `Connected`.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let server = ServerSettings::new("127.0.0.1", port, "/");
        let config = ConnectionConfig::new(server).max_send_queue_size(2);
        let messenger = create(Arc::new(SilentCallbacks), config, SendBehavior::Async).unwrap();

        let client_config = Arc::new(
            ClientConfig::builder()
                .with_root_certificates(RootCertStore::empty())
                .with_no_client_auth(),
        );
        assert!(messenger.open_with_tls_config(client_config));

        for i in 0..5 {
            assert!(messenger.send(Message::Text(i.to_string())));
        }

        let mut queue_size = messenger.get_connection_stats().current_send_queue_size;
        for _ in 0..50 {
            if queue_size == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            queue_size = messenger.get_connection_stats().current_send_queue_size;
        }
        assert_eq!(queue_size, 2);

        messenger.close();
    }

    #[tokio::test]
    async fn a_second_open_without_an_intervening_close_is_rejected() {
        let (port, client_config) = start_echo_server().await;

        let server = ServerSettings::new("localhost", port, "/");
        let config = ConnectionConfig::new(server);
        let messenger = create(Arc::new(SilentCallbacks), config, SendBehavior::Async).unwrap();

        assert!(messenger.open_with_tls_config(client_config.clone()));
        assert!(!messenger.open_with_tls_config(client_config));

        messenger.close();
    }

    #[tokio::test]
    async fn schedule_reconnect_is_rejected_once_the_engine_has_been_closed() {
        install_crypto_provider();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let server = ServerSettings::new("127.0.0.1", port, "/");
        let config = ConnectionConfig::new(server).critical_failure_threshold(0);
        let messenger = create(Arc::new(SilentCallbacks), config, SendBehavior::Async).unwrap();

        let client_config = Arc::new(
            ClientConfig::builder()
                .with_root_certificates(RootCertStore::empty())
                .with_no_client_auth(),
        );
        assert!(messenger.open_with_tls_config(client_config));

        // Drive the engine to critical failure so `pending_critical_failure_handling`
        // would otherwise be set when `close` races past it.
        tokio::time::sleep(Duration::from_millis(200)).await;

        messenger.close();

        assert!(!messenger.schedule_reconnect(None));
    }
}
