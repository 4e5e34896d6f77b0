//! One live TCP (or any byte stream) session.
//!
//! A connection owns two tasks:
//! - a reader that decodes frames, resolves replies to pending calls and
//!   dispatches commands to the registry, one frame at a time
//! - a writer that drains a bounded outbound queue into the stream
//!
//! Everything a handler or caller sends goes through the queue, so a slow
//! peer only ever blocks its own writer.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cmdwire_frame::{
    CipherSlot, Frame, FrameCodec, FrameError, FrameKind, FromValue, IntoArgs, SessionCipher,
    Value,
};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::config::{ConnectionConfig, OverflowPolicy};
use crate::dispatch::dispatch;
use crate::error::{PeerError, Result};
use crate::fault::Fault;
use crate::handler::CallContext;
use crate::handshake::{HandshakePhase, HandshakeState};
use crate::pending::{PendingCalls, PendingGuard};
use crate::registry::CommandRegistry;
use crate::server::{ClientSet, WeakClientSet};

/// How long the writer keeps flushing queued frames after shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Shared handle to a [`Connection`].
pub type ConnectionHandle = Arc<Connection>;

/// Items consumed by the writer task, in order.
#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(Frame),
    /// Encrypt every frame after this point.
    InstallCipher(SessionCipher),
}

/// A live session with one remote peer.
pub struct Connection {
    id: ConnectionId,
    endpoint: SocketAddr,
    outbound: mpsc::Sender<Outbound>,
    queue_capacity: usize,
    overflow_policy: OverflowPolicy,
    call_timeout: Option<Duration>,
    pending: PendingCalls,
    inbound_cipher: Arc<CipherSlot>,
    handshake: Mutex<HandshakeState>,
    owner: Option<WeakClientSet>,
    shutdown: CancellationToken,
    flushed: CancellationToken,
    closed: AtomicBool,
}

impl Connection {
    /// Start a session over `stream` and return its handle.
    ///
    /// Must be called from within a Tokio runtime. Incoming commands are
    /// dispatched to `registry`.
    pub fn spawn<S>(
        stream: S,
        endpoint: SocketAddr,
        registry: Arc<CommandRegistry>,
        config: &ConnectionConfig,
    ) -> ConnectionHandle
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::spawn_with_owner(stream, endpoint, registry, config, None)
    }

    /// Like [`spawn`](Self::spawn), but the connection joins `owner` before
    /// its tasks start and leaves it when it closes.
    pub(crate) fn spawn_with_owner<S>(
        stream: S,
        endpoint: SocketAddr,
        registry: Arc<CommandRegistry>,
        config: &ConnectionConfig,
        owner: Option<&ClientSet>,
    ) -> ConnectionHandle
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let queue_capacity = config.outbound_queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(queue_capacity);
        let inbound_cipher = Arc::new(CipherSlot::new());

        let connection = Arc::new(Self {
            id: ConnectionId::next(),
            endpoint,
            outbound: tx,
            queue_capacity,
            overflow_policy: config.overflow_policy,
            call_timeout: config.call_timeout,
            pending: PendingCalls::new(),
            inbound_cipher: Arc::clone(&inbound_cipher),
            handshake: Mutex::new(HandshakeState::NoHandshake),
            owner: owner.map(ClientSet::downgrade),
            shutdown: CancellationToken::new(),
            flushed: CancellationToken::new(),
            closed: AtomicBool::new(false),
        });
        if let Some(owner) = owner {
            owner.insert(Arc::clone(&connection));
        }

        let (read_half, write_half) = tokio::io::split(stream);
        let reader = FramedRead::new(
            read_half,
            FrameCodec::with_inbound_slot(config.frame.clone(), inbound_cipher),
        );
        let writer = FramedWrite::new(write_half, FrameCodec::with_config(config.frame.clone()));

        tokio::spawn(read_loop(Arc::clone(&connection), reader, registry));
        tokio::spawn(write_loop(Arc::clone(&connection), writer, rx));

        tracing::info!(
            connection = %connection.id,
            endpoint = %endpoint,
            "connection established"
        );
        connection
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address of the peer.
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of calls still waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    pub fn handshake_phase(&self) -> HandshakePhase {
        self.handshake_state().phase()
    }

    pub fn is_inbound_encrypted(&self) -> bool {
        self.inbound_cipher.is_installed()
    }

    pub(crate) fn handshake_state(&self) -> MutexGuard<'_, HandshakeState> {
        self.handshake.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn client_set(&self) -> Option<ClientSet> {
        self.owner.as_ref().and_then(WeakClientSet::upgrade)
    }

    /// Fire-and-forget: queue `command` with `args`. No reply is expected.
    pub fn send(&self, command: &str, args: impl IntoArgs) -> Result<()> {
        self.send_values(command, args.into_args()?)
    }

    pub(crate) fn send_values(&self, command: &str, args: Vec<Value>) -> Result<()> {
        check_command(command)?;
        self.enqueue(Outbound::Frame(Frame::fire(command, args)))?;
        tracing::trace!(connection = %self.id, command, "fire queued");
        Ok(())
    }

    /// Call `command` and wait for its typed result, using the configured
    /// call timeout.
    pub async fn call<R: FromValue>(&self, command: &str, args: impl IntoArgs) -> Result<R> {
        self.call_with_timeout(command, args, self.call_timeout).await
    }

    /// Call `command` with an explicit timeout. `None` waits until the
    /// reply arrives or the connection closes; a zero timeout sends the
    /// request and fails with [`PeerError::Timeout`] at once.
    ///
    /// A reply that arrives after the timeout is discarded.
    pub async fn call_with_timeout<R: FromValue>(
        &self,
        command: &str,
        args: impl IntoArgs,
        timeout: Option<Duration>,
    ) -> Result<R> {
        check_command(command)?;
        let args = args.into_args()?;

        let (id, rx) = self.pending.register();
        let mut guard = PendingGuard::new(&self.pending, id);
        self.enqueue(Outbound::Frame(Frame::request(id, command, args)))?;
        tracing::debug!(connection = %self.id, command, correlation_id = id, "request sent");

        let received = match timeout {
            Some(limit) if limit.is_zero() => return Err(PeerError::Timeout(limit)),
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_elapsed) => {
                    tracing::warn!(
                        connection = %self.id,
                        command,
                        correlation_id = id,
                        timeout_ms = limit.as_millis() as u64,
                        "call timed out waiting for response"
                    );
                    return Err(PeerError::Timeout(limit));
                }
            },
            None => rx.await,
        };
        guard.disarm();

        match received {
            Ok(Ok(value)) => Ok(R::from_value(value)?),
            Ok(Err(fault)) => Err(PeerError::Fault(fault)),
            Err(_) => Err(PeerError::Disconnected(format!(
                "{} closed while '{command}' was pending",
                self.id
            ))),
        }
    }

    /// Install the session cipher in both directions.
    ///
    /// Inbound packets are decrypted as soon as they carry the encrypted
    /// flag; outbound frames queued before this call still leave in clear.
    pub fn install_cipher(&self, cipher: SessionCipher) -> Result<()> {
        self.install_inbound_cipher(cipher.clone())?;
        self.install_outbound_cipher(cipher)
    }

    pub fn install_inbound_cipher(&self, cipher: SessionCipher) -> Result<()> {
        self.inbound_cipher.install(cipher)?;
        tracing::debug!(connection = %self.id, "inbound cipher installed");
        Ok(())
    }

    /// Queue the outbound switch behind everything already queued.
    ///
    /// If the switch cannot be queued the connection is closed, since the
    /// peer would otherwise see cleartext after agreeing to encrypt.
    pub fn install_outbound_cipher(&self, cipher: SessionCipher) -> Result<()> {
        self.enqueue(Outbound::InstallCipher(cipher)).inspect_err(|err| {
            tracing::warn!(connection = %self.id, error = %err, "outbound cipher could not be queued");
            self.close("outbound cipher install failed");
        })
    }

    /// Close the connection. Idempotent: returns `true` only for the call
    /// that actually closed it.
    pub fn disconnect(&self) -> bool {
        self.close("disconnected locally")
    }

    /// Resolves once the connection has closed.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await;
    }

    /// Resolves once the writer has stopped: queued frames are flushed (or
    /// abandoned after a bounded wait) and the write side is shut down.
    pub async fn flushed(&self) {
        self.flushed.cancelled().await;
    }

    fn close(&self, reason: &str) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.shutdown.cancel();
        let abandoned = self.pending.fail_all();
        if let Some(owner) = self.client_set() {
            owner.remove(self.id);
        }
        tracing::info!(
            connection = %self.id,
            endpoint = %self.endpoint,
            reason,
            abandoned_calls = abandoned,
            "connection closed"
        );
        true
    }

    fn enqueue(&self, item: Outbound) -> Result<()> {
        if self.is_closed() {
            return Err(PeerError::Disconnected(format!("{} is closed", self.id)));
        }
        match self.outbound.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                match self.overflow_policy {
                    OverflowPolicy::Disconnect => {
                        tracing::warn!(
                            connection = %self.id,
                            capacity = self.queue_capacity,
                            "outbound queue full; disconnecting slow peer"
                        );
                        self.close("outbound queue overflow");
                    }
                    OverflowPolicy::DropFrame => {
                        tracing::warn!(
                            connection = %self.id,
                            capacity = self.queue_capacity,
                            "outbound queue full; dropping frame"
                        );
                    }
                }
                Err(PeerError::QueueFull {
                    capacity: self.queue_capacity,
                })
            }
            Err(TrySendError::Closed(_)) => {
                Err(PeerError::Disconnected(format!("{} writer stopped", self.id)))
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("closed", &self.is_closed())
            .field("pending_calls", &self.pending.len())
            .finish_non_exhaustive()
    }
}

/// Route one decoded inbound frame.
fn on_frame(connection: &ConnectionHandle, frame: Frame, registry: &CommandRegistry) {
    match frame.kind() {
        FrameKind::Request | FrameKind::Fire => {
            let ctx = CallContext::new(Arc::clone(connection));
            if let Some(reply) = dispatch(registry, &ctx, frame) {
                if let Err(err) = connection.enqueue(Outbound::Frame(reply)) {
                    tracing::warn!(connection = %connection.id, error = %err, "failed to queue reply");
                }
            }
        }
        FrameKind::Response | FrameKind::Fault => {
            let Some(id) = frame.correlation_id() else {
                return;
            };
            let command = frame.command().to_string();
            let outcome = if frame.kind() == FrameKind::Response {
                Ok(frame.into_payload().into_iter().next().unwrap_or(Value::Null))
            } else {
                Err(Fault::from_payload(frame.into_payload()))
            };
            if !connection.pending.resolve(id, outcome) {
                tracing::debug!(
                    connection = %connection.id,
                    command = %command,
                    correlation_id = id,
                    "discarding reply with no waiting call"
                );
            }
        }
    }
}

fn check_command(command: &str) -> Result<()> {
    if command.is_empty() || command.len() > usize::from(u16::MAX) {
        return Err(PeerError::InvalidCommand(command.to_string()));
    }
    Ok(())
}

async fn read_loop<R>(
    connection: ConnectionHandle,
    mut reader: FramedRead<R, FrameCodec>,
    registry: Arc<CommandRegistry>,
) where
    R: AsyncRead + Unpin,
{
    let reason = loop {
        tokio::select! {
            _ = connection.shutdown.cancelled() => return,
            next = reader.next() => match next {
                Some(Ok(frame)) => on_frame(&connection, frame, &registry),
                Some(Err(FrameError::ConnectionClosed)) | None => {
                    break "peer closed the stream".to_string();
                }
                Some(Err(err)) => {
                    tracing::warn!(connection = %connection.id, error = %err, "inbound stream failed");
                    break format!("inbound error: {err}");
                }
            },
        }
    };
    connection.close(&reason);
}

async fn write_loop<W>(
    connection: ConnectionHandle,
    mut writer: FramedWrite<W, FrameCodec>,
    mut queue: mpsc::Receiver<Outbound>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let item = tokio::select! {
            biased;
            item = queue.recv() => item,
            _ = connection.shutdown.cancelled() => break,
        };
        let Some(item) = item else {
            break;
        };
        if let Err(err) = write_item(&connection, &mut writer, item).await {
            tracing::warn!(connection = %connection.id, error = %err, "outbound stream failed");
            connection.close(&format!("outbound error: {err}"));
            connection.flushed.cancel();
            return;
        }
    }

    // Best effort: flush what was queued before the close, then shut down
    // the write side so the peer sees EOF.
    let drain = async {
        while let Ok(item) = queue.try_recv() {
            if write_item(&connection, &mut writer, item).await.is_err() {
                return;
            }
        }
        let _ = writer.close().await;
    };
    if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
        tracing::debug!(connection = %connection.id, "gave up draining outbound queue");
    }
    connection.flushed.cancel();
}

async fn write_item<W>(
    connection: &Connection,
    writer: &mut FramedWrite<W, FrameCodec>,
    item: Outbound,
) -> std::result::Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    match item {
        Outbound::Frame(frame) => {
            let kind = frame.kind();
            let correlation_id = frame.correlation_id();
            let command = (kind == FrameKind::Response).then(|| frame.command().to_string());
            match writer.send(frame).await {
                Ok(()) => Ok(()),
                Err(FrameError::Io(err)) => Err(FrameError::Io(err)),
                Err(err) => {
                    // Rejected by the encoder before any byte was written.
                    tracing::warn!(connection = %connection.id, error = %err, "dropping unencodable frame");
                    match (kind, correlation_id, command) {
                        (FrameKind::Request, Some(id), _) => {
                            connection
                                .pending
                                .resolve(id, Err(Fault::rejected(err.to_string())));
                        }
                        // The remote caller still waits on this id.
                        (FrameKind::Response, Some(id), Some(command)) => {
                            let fault = Fault::rejected(format!("response could not be sent: {err}"));
                            match writer.send(fault.to_frame(id, &command)).await {
                                Ok(()) => {}
                                Err(err @ FrameError::Io(_)) => return Err(err),
                                Err(err) => {
                                    tracing::warn!(
                                        connection = %connection.id,
                                        correlation_id = id,
                                        error = %err,
                                        "dropping unencodable fault"
                                    );
                                }
                            }
                        }
                        _ => {}
                    }
                    Ok(())
                }
            }
        }
        Outbound::InstallCipher(cipher) => {
            writer.encoder_mut().install_outbound(cipher)?;
            tracing::debug!(connection = %connection.id, "outbound cipher installed");
            Ok(())
        }
    }
}
