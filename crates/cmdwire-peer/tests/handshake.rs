use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cmdwire_frame::IvMode;
use cmdwire_peer::{
    register_server_handshake, CallContext, Client, CommandRegistry, HandlerResult,
    HandshakeConfig, HandshakePhase, KeyPair, PeerError, Server, ServerHandle,
    COMPLETE_KEY_EXCHANGE,
};
use tokio::sync::mpsc;

async fn wait_for(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition should become true");
}

async fn start_server(config: HandshakeConfig) -> ServerHandle {
    let mut registry = CommandRegistry::new();
    register_server_handshake(&mut registry, Arc::new(KeyPair::generate()), config)
        .expect("handshake commands should register");
    registry
        .register(
            "Echo",
            |_: &CallContext, text: String| -> HandlerResult<String> { Ok(text) },
        )
        .expect("Echo should register");
    registry
        .register(
            "Shout",
            |ctx: &CallContext, text: String| -> HandlerResult<()> {
                ctx.connection().send("Heard", (text.to_uppercase(),))?;
                Ok(())
            },
        )
        .expect("Shout should register");
    Server::bind(SocketAddr::from(([127, 0, 0, 1], 0)), registry)
        .await
        .expect("server should bind")
        .spawn()
        .expect("server should start")
}

fn listening_registry() -> (CommandRegistry, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut registry = CommandRegistry::new();
    registry
        .register(
            "Heard",
            move |_: &CallContext, text: String| -> HandlerResult<()> {
                tx.send(text)?;
                Ok(())
            },
        )
        .expect("Heard should register");
    (registry, rx)
}

#[tokio::test]
async fn session_is_encrypted_after_key_exchange() {
    for iv_mode in [IvMode::Zero, IvMode::Derived] {
        let config = HandshakeConfig {
            iv_mode,
            ..HandshakeConfig::default()
        };
        let server = start_server(config.clone()).await;
        let (registry, mut heard) = listening_registry();
        let client = Client::connect(server.local_addr(), registry)
            .await
            .expect("client should connect");

        client
            .handshake(&KeyPair::generate(), &config)
            .await
            .expect("handshake should succeed");
        assert_eq!(
            client.connection().handshake_phase(),
            HandshakePhase::CipherInstalled
        );
        assert!(client.connection().is_inbound_encrypted());

        let echoed: String = client
            .call("Echo", ("over the wire",))
            .await
            .expect("encrypted call should succeed");
        assert_eq!(echoed, "over the wire");

        client.send("Shout", ("psst",)).expect("send should queue");
        let line = tokio::time::timeout(Duration::from_secs(5), heard.recv())
            .await
            .expect("server push should arrive")
            .expect("inbox should stay open");
        assert_eq!(line, "PSST");

        wait_for(|| {
            server.clients().snapshot().iter().all(|connection| {
                connection.handshake_phase() == HandshakePhase::CipherInstalled
            })
        })
        .await;

        server.stop().await.expect("server should stop");
    }
}

#[tokio::test]
async fn second_handshake_is_refused() {
    let server = start_server(HandshakeConfig::default()).await;
    let client = Client::connect(server.local_addr(), CommandRegistry::new())
        .await
        .expect("client should connect");
    let keys = KeyPair::generate();
    client
        .handshake(&keys, &HandshakeConfig::default())
        .await
        .expect("first handshake should succeed");

    let err = client
        .handshake(&keys, &HandshakeConfig::default())
        .await
        .expect_err("second handshake must fail");
    assert!(matches!(err, PeerError::Handshake(_)));

    let echoed: String = client
        .call("Echo", ("still fine",))
        .await
        .expect("session should keep working");
    assert_eq!(echoed, "still fine");

    server.stop().await.expect("server should stop");
}

#[tokio::test]
async fn complete_without_start_keeps_plaintext_session() {
    let server = start_server(HandshakeConfig::default()).await;
    let client = Client::connect(server.local_addr(), CommandRegistry::new())
        .await
        .expect("client should connect");

    client
        .send(COMPLETE_KEY_EXCHANGE, ())
        .expect("send should queue");
    let echoed: String = client
        .call("Echo", ("plain",))
        .await
        .expect("plaintext call should still work");
    assert_eq!(echoed, "plain");
    assert_eq!(
        client.connection().handshake_phase(),
        HandshakePhase::NoHandshake
    );

    server.stop().await.expect("server should stop");
}

#[tokio::test]
async fn low_order_client_key_faults() {
    let server = start_server(HandshakeConfig::default()).await;
    let client = Client::connect(server.local_addr(), CommandRegistry::new())
        .await
        .expect("client should connect");

    let err = client
        .call::<[u8; 32]>("StartKeyExchange", ([0u8; 32],))
        .await
        .expect_err("identity point must be refused");
    assert!(matches!(err, PeerError::Fault(_)));

    server.stop().await.expect("server should stop");
}

#[tokio::test]
async fn mismatched_iv_mode_breaks_the_session() {
    let server = start_server(HandshakeConfig {
        iv_mode: IvMode::Derived,
        ..HandshakeConfig::default()
    })
    .await;
    let client = Client::connect(server.local_addr(), CommandRegistry::new())
        .await
        .expect("client should connect");

    client
        .handshake(&KeyPair::generate(), &HandshakeConfig::default())
        .await
        .expect("key exchange itself succeeds");

    let result = client
        .call_with_timeout::<String>("Echo", ("garbled",), Some(Duration::from_secs(2)))
        .await;
    assert!(result.is_err());

    server.stop().await.expect("server should stop");
}
