//! Two clients join an in-process chat server, switch to encrypted sessions
//! and exchange one broadcast.
//!
//! Run: `cargo run -p cmdwire --example key-exchange`

use std::sync::Arc;
use std::time::Duration;

use cmdwire::chat::{client_registry, server_registry, BROADCAST_TO_ALL};
use cmdwire::peer::{Client, HandshakeConfig, HandshakePhase, KeyPair, Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let handshake = HandshakeConfig::default();
    let server = Server::bind(
        "127.0.0.1:0",
        server_registry(Arc::new(KeyPair::generate()), handshake.clone())?,
    )
    .await?
    .spawn()?;
    println!("server listening on {}", server.local_addr());

    let mut clients = Vec::new();
    for name in ["alice", "bob"] {
        let registry = client_registry(move |line| println!("[{name}] {line}"))?;
        let client = Client::connect(server.local_addr(), registry).await?;
        client.handshake(&KeyPair::generate(), &handshake).await?;
        assert_eq!(
            client.connection().handshake_phase(),
            HandshakePhase::CipherInstalled
        );
        clients.push(client);
    }

    clients[0].send(BROADCAST_TO_ALL, ("hello, encrypted world",))?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    server.stop().await?;
    Ok(())
}
