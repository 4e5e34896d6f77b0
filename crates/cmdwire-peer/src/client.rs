use std::sync::Arc;
use std::time::Duration;

use cmdwire_frame::{FromValue, IntoArgs};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::config::ConnectionConfig;
use crate::connection::{Connection, ConnectionHandle};
use crate::error::{PeerError, Result};
use crate::handshake::{client_handshake, HandshakeConfig, KeyPair};
use crate::registry::CommandRegistry;

/// The connecting side of a session.
///
/// Commands the server sends to this client are dispatched to the registry
/// given at connect time. Dropping the client disconnects it.
#[derive(Debug)]
pub struct Client {
    connection: ConnectionHandle,
}

impl Client {
    /// Connect with default settings.
    pub async fn connect(addr: impl ToSocketAddrs, registry: CommandRegistry) -> Result<Self> {
        Self::connect_with_config(addr, registry, &ConnectionConfig::default()).await
    }

    /// Connect with explicit configuration.
    pub async fn connect_with_config(
        addr: impl ToSocketAddrs,
        registry: CommandRegistry,
        config: &ConnectionConfig,
    ) -> Result<Self> {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                PeerError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect timed out after {:?}", config.connect_timeout),
                ))
            })??;
        stream.set_nodelay(true)?;
        let endpoint = stream.peer_addr()?;

        let connection = Connection::spawn(stream, endpoint, Arc::new(registry), config);
        Ok(Self { connection })
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Fire-and-forget send.
    pub fn send(&self, command: &str, args: impl IntoArgs) -> Result<()> {
        self.connection.send(command, args)
    }

    /// Correlated call with the configured timeout.
    pub async fn call<R: FromValue>(&self, command: &str, args: impl IntoArgs) -> Result<R> {
        self.connection.call(command, args).await
    }

    pub async fn call_with_timeout<R: FromValue>(
        &self,
        command: &str,
        args: impl IntoArgs,
        timeout: Option<Duration>,
    ) -> Result<R> {
        self.connection
            .call_with_timeout(command, args, timeout)
            .await
    }

    /// Run the key exchange and switch this session to the shared cipher.
    pub async fn handshake(&self, keys: &KeyPair, config: &HandshakeConfig) -> Result<()> {
        client_handshake(&self.connection, keys, config).await
    }

    pub fn disconnect(&self) -> bool {
        self.connection.disconnect()
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    /// Resolves once the session has closed from either side.
    pub async fn closed(&self) {
        self.connection.closed().await;
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.connection.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("port should bind");
        let addr = listener.local_addr().expect("bound address");
        drop(listener);

        let err = Client::connect(addr, CommandRegistry::new())
            .await
            .expect_err("nothing listens on the port");
        assert!(matches!(err, PeerError::Io(_)));
    }
}
