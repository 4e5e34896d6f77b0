use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use cmdwire_frame::IntoArgs;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionHandle, ConnectionId};
use crate::error::{PeerError, Result};
use crate::registry::CommandRegistry;

type ClientMap = HashMap<ConnectionId, ConnectionHandle>;

/// The live connections of a server.
///
/// Connections join when accepted and leave when they close, however the
/// close happens. Cloning yields another handle to the same set.
#[derive(Debug, Clone, Default)]
pub struct ClientSet {
    inner: Arc<RwLock<ClientMap>>,
}

/// Non-owning reference held by each connection, so the set and its members
/// do not keep each other alive.
#[derive(Debug, Clone)]
pub(crate) struct WeakClientSet {
    inner: Weak<RwLock<ClientMap>>,
}

impl WeakClientSet {
    pub(crate) fn upgrade(&self) -> Option<ClientSet> {
        self.inner.upgrade().map(|inner| ClientSet { inner })
    }
}

/// Result of a broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the frame was queued on.
    pub delivered: usize,
    /// Connections that refused it, with the reason.
    pub failed: Vec<(ConnectionId, String)>,
}

impl ClientSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, ClientMap> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ClientMap> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn downgrade(&self) -> WeakClientSet {
        WeakClientSet {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn insert(&self, connection: ConnectionHandle) {
        self.write().insert(connection.id(), connection);
    }

    pub(crate) fn remove(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.write().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.read().contains_key(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.read().get(&id).cloned()
    }

    /// Current members, ordered by connection id.
    ///
    /// The snapshot is taken under the lock and is safe to iterate while
    /// connections join or leave.
    pub fn snapshot(&self) -> Vec<ConnectionHandle> {
        let mut members: Vec<ConnectionHandle> = self.read().values().cloned().collect();
        members.sort_by_key(|connection| connection.id());
        members
    }

    /// Fire `command` with `args` on every member except `except`.
    ///
    /// A member that cannot take the frame is reported in
    /// [`BroadcastReport::failed`] and does not stop delivery to the rest.
    pub fn broadcast(
        &self,
        command: &str,
        args: impl IntoArgs,
        except: Option<ConnectionId>,
    ) -> Result<BroadcastReport> {
        let args = args.into_args()?;
        let mut report = BroadcastReport::default();
        for connection in self.snapshot() {
            if Some(connection.id()) == except {
                continue;
            }
            match connection.send_values(command, args.clone()) {
                Ok(()) => report.delivered += 1,
                Err(err @ PeerError::InvalidCommand(_)) => return Err(err),
                Err(err) => {
                    tracing::debug!(
                        connection = %connection.id(),
                        command,
                        error = %err,
                        "broadcast skipped connection"
                    );
                    report.failed.push((connection.id(), err.to_string()));
                }
            }
        }
        tracing::debug!(
            command,
            delivered = report.delivered,
            failed = report.failed.len(),
            "broadcast queued"
        );
        Ok(report)
    }

    /// Disconnect every member.
    pub fn disconnect_all(&self) -> usize {
        self.snapshot()
            .into_iter()
            .filter(|connection| connection.disconnect())
            .count()
    }
}

/// Accepts TCP connections and runs each as a [`Connection`] against a shared
/// command registry.
pub struct Server {
    listener: TcpListener,
    registry: Arc<CommandRegistry>,
    config: ServerConfig,
    clients: ClientSet,
    shutdown: CancellationToken,
}

impl Server {
    /// Bind a listening socket. The registry is frozen from here on.
    pub async fn bind(addr: impl ToSocketAddrs, registry: CommandRegistry) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "server listening");
        Ok(Self {
            listener,
            registry: Arc::new(registry),
            config: ServerConfig::default(),
            clients: ClientSet::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Override server config.
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn clients(&self) -> ClientSet {
        self.clients.clone()
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    /// Token that stops [`run`](Self::run) when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accept connections until the shutdown token fires, then disconnect
    /// every client.
    pub async fn run(self) -> Result<()> {
        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            let (socket, addr) = match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    tracing::error!(error = %err, "accept failed");
                    continue;
                }
            };

            if let Some(max) = self.config.max_connections {
                if self.clients.len() >= max {
                    tracing::debug!(peer = %addr, max, "refusing connection; too many clients");
                    drop(socket);
                    continue;
                }
            }
            if let Err(err) = socket.set_nodelay(true) {
                tracing::debug!(peer = %addr, error = %err, "could not set TCP_NODELAY");
            }

            Connection::spawn_with_owner(
                socket,
                addr,
                Arc::clone(&self.registry),
                &self.config.connection,
                Some(&self.clients),
            );
        }

        let closed = self.clients.disconnect_all();
        tracing::info!(disconnected = closed, "server stopped");
        Ok(())
    }

    /// Run the accept loop on a background task.
    pub fn spawn(self) -> Result<ServerHandle> {
        let local_addr = self.local_addr()?;
        let clients = self.clients();
        let shutdown = self.shutdown_token();
        let task = tokio::spawn(self.run());
        Ok(ServerHandle {
            local_addr,
            clients,
            shutdown,
            task,
        })
    }
}

/// Control handle for a server running in the background.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    clients: ClientSet,
    shutdown: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn clients(&self) -> &ClientSet {
        &self.clients
    }

    /// Stop accepting, disconnect all clients and wait for the accept loop.
    pub async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        self.task.await.map_err(|err| {
            PeerError::Io(std::io::Error::other(format!("server task failed: {err}")))
        })?
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::ConnectionConfig;
    use crate::handler::{CallContext, HandlerResult};

    fn addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    async fn wait_for(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition should become true");
    }

    fn duplex_member(set: &ClientSet) -> (ConnectionHandle, tokio::io::DuplexStream) {
        member_with(set, &ConnectionConfig::default())
    }

    fn member_with(
        set: &ClientSet,
        config: &ConnectionConfig,
    ) -> (ConnectionHandle, tokio::io::DuplexStream) {
        let (local, remote) = tokio::io::duplex(4096);
        let connection = Connection::spawn_with_owner(
            local,
            addr(),
            Arc::new(CommandRegistry::new()),
            config,
            Some(set),
        );
        (connection, remote)
    }

    #[tokio::test]
    async fn members_leave_on_disconnect() {
        let set = ClientSet::new();
        let (a, _ra) = duplex_member(&set);
        let (b, _rb) = duplex_member(&set);
        assert_eq!(set.len(), 2);
        assert!(set.contains(a.id()));

        assert!(a.disconnect());
        assert_eq!(set.len(), 1);
        assert!(!a.disconnect());
        assert_eq!(set.len(), 1);
        assert!(set.get(b.id()).is_some());
    }

    #[tokio::test]
    async fn member_leaves_when_peer_hangs_up() {
        let set = ClientSet::new();
        let (_a, remote) = duplex_member(&set);
        drop(remote);
        wait_for(|| set.is_empty()).await;
    }

    #[tokio::test]
    async fn broadcast_skips_excluded_and_closed() {
        let set = ClientSet::new();
        let (a, _ra) = duplex_member(&set);
        let (b, _rb) = duplex_member(&set);
        let (_c, _rc) = duplex_member(&set);

        let report = set
            .broadcast("Note", ("x",), Some(a.id()))
            .expect("broadcast should succeed");
        assert_eq!(report.delivered, 2);
        assert!(report.failed.is_empty());

        b.disconnect();
        let report = set
            .broadcast("Note", ("y",), None)
            .expect("broadcast should succeed");
        assert_eq!(report.delivered, 2);

        assert!(set.broadcast("", (), None).is_err());
    }

    #[tokio::test]
    async fn broadcast_continues_past_a_full_queue() {
        let set = ClientSet::new();
        let (slow, _rs) = member_with(
            &set,
            &ConnectionConfig {
                outbound_queue_capacity: 1,
                ..ConnectionConfig::default()
            },
        );
        let (_b, _rb) = duplex_member(&set);
        let (_c, _rc) = duplex_member(&set);

        // Nothing has yielded yet, so the writer has not taken this frame.
        slow.send("Note", ("backlog",)).expect("first frame fits");

        let report = set
            .broadcast("Note", ("hello",), None)
            .expect("broadcast should succeed");
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, slow.id());
        assert!(report.failed[0].1.contains("queue full"), "{:?}", report.failed);

        // Disconnect is the default overflow policy.
        assert!(slow.is_closed());
        assert_eq!(set.len(), 2);
        assert!(!set.contains(slow.id()));
    }

    #[tokio::test]
    async fn server_stop_disconnects_clients() {
        let mut registry = CommandRegistry::new();
        registry
            .register("Ping", |_: &CallContext| -> HandlerResult<String> {
                Ok("pong".to_string())
            })
            .expect("Ping should register");
        let server = Server::bind(addr(), registry)
            .await
            .expect("server should bind")
            .spawn()
            .expect("server should start");

        let client = crate::client::Client::connect(server.local_addr(), CommandRegistry::new())
            .await
            .expect("client should connect");
        let reply: String = client.call("Ping", ()).await.expect("Ping should answer");
        assert_eq!(reply, "pong");
        wait_for(|| server.clients().len() == 1).await;

        let clients = server.clients().clone();
        server.stop().await.expect("server should stop");
        assert!(clients.is_empty());
        tokio::time::timeout(Duration::from_secs(5), client.closed())
            .await
            .expect("client should observe server shutdown");
    }

    #[tokio::test]
    async fn max_connections_refuses_extra_sockets() {
        let server = Server::bind(addr(), CommandRegistry::new())
            .await
            .expect("server should bind")
            .with_config(ServerConfig {
                max_connections: Some(1),
                ..ServerConfig::default()
            })
            .spawn()
            .expect("server should start");

        let _first = crate::client::Client::connect(server.local_addr(), CommandRegistry::new())
            .await
            .expect("first client should connect");
        wait_for(|| server.clients().len() == 1).await;

        let second = crate::client::Client::connect(server.local_addr(), CommandRegistry::new())
            .await
            .expect("TCP connect succeeds before the server refuses");
        tokio::time::timeout(Duration::from_secs(5), second.closed())
            .await
            .expect("refused client should be closed");
        assert_eq!(server.clients().len(), 1);
        server.stop().await.expect("server should stop");
    }
}
