use cmdwire::chat::{
    classify_input, client_registry, InputLine, BROADCAST_TO_ALL, EXIT_COMMAND, WRITE_TO_CONSOLE,
};
use cmdwire_peer::{Client, KeyPair};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cmd::{ChatArgs, KeyExchangeArgs};
use crate::exit::{io_error, peer_error, CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{print_connected, print_message, OutputFormat};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

pub async fn run(args: ChatArgs, format: OutputFormat) -> CliResult<i32> {
    session(&args.addr, args.plaintext, &args.key_exchange, format).await
}

/// Connect, optionally run the key exchange, then relay stdin lines until
/// `/exit`, end of input or the server hanging up.
pub async fn session(
    addr: &str,
    plaintext: bool,
    key_exchange: &KeyExchangeArgs,
    format: OutputFormat,
) -> CliResult<i32> {
    let registry = client_registry(move |line| print_message(WRITE_TO_CONSOLE, line, format))
        .map_err(|err| peer_error("command registration failed", err))?;
    let client = Client::connect(addr, registry)
        .await
        .map_err(|err| peer_error(&format!("connect {addr} failed"), err))?;

    if !plaintext {
        client
            .handshake(&KeyPair::generate(), &key_exchange.handshake_config())
            .await
            .map_err(|err| peer_error("key exchange failed", err))?;
    }
    print_connected(client.connection().endpoint(), !plaintext, format);
    eprintln!("{EXIT_COMMAND} to exit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = client.closed() => {
                return Err(CliError::new(FAILURE, "server closed the connection"));
            }
            line = lines.next_line() => line.map_err(|err| io_error("stdin read failed", err))?,
        };
        let Some(line) = line else {
            break;
        };
        match classify_input(&line) {
            InputLine::Skip => continue,
            InputLine::Exit => break,
            InputLine::Say(text) => client
                .send(BROADCAST_TO_ALL, (text,))
                .map_err(|err| peer_error("send failed", err))?,
        }
    }

    client.disconnect();
    if tokio::time::timeout(FLUSH_TIMEOUT, client.connection().flushed())
        .await
        .is_err()
    {
        tracing::debug!("outbound frames not flushed before exit");
    }
    Ok(SUCCESS)
}
