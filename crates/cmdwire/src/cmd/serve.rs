use std::sync::Arc;

use cmdwire::chat::server_registry;
use cmdwire_peer::{KeyPair, Server, ServerConfig, ServerHandle};

use crate::cmd::{KeyExchangeArgs, ServeArgs};
use crate::exit::{io_error, peer_error, CliResult, SUCCESS};
use crate::output::{print_listening, OutputFormat};

pub async fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let server = start_server(&args.addr, args.max_connections, &args.key_exchange).await?;
    print_listening(server.local_addr(), format);

    tokio::signal::ctrl_c()
        .await
        .map_err(|err| io_error("signal handler setup failed", err))?;
    tracing::info!(clients = server.clients().len(), "interrupt received; stopping server");

    server
        .stop()
        .await
        .map_err(|err| peer_error("server shutdown failed", err))?;
    Ok(SUCCESS)
}

/// Bind the chat server with a fresh key pair and run it in the background.
pub async fn start_server(
    addr: &str,
    max_connections: Option<usize>,
    key_exchange: &KeyExchangeArgs,
) -> CliResult<ServerHandle> {
    let keys = Arc::new(KeyPair::generate());
    let registry = server_registry(keys, key_exchange.handshake_config())
        .map_err(|err| peer_error("command registration failed", err))?;

    Server::bind(addr, registry)
        .await
        .map_err(|err| peer_error(&format!("bind {addr} failed"), err))?
        .with_config(ServerConfig {
            max_connections,
            ..ServerConfig::default()
        })
        .spawn()
        .map_err(|err| peer_error("server start failed", err))
}
