//! A broadcast chat room built from two commands.
//!
//! Clients send `BroadcastToAll(message)`; the server fans it out to every
//! connected client, the sender included, as
//! `WriteToConsole("<sender endpoint>: <message>")`.

use std::sync::Arc;

use cmdwire_peer::{
    register_server_handshake, CallContext, CommandRegistry, HandlerFault, HandlerResult,
    HandshakeConfig, KeyPair, Result,
};

/// Client to server: relay a line to the whole room.
pub const BROADCAST_TO_ALL: &str = "BroadcastToAll";
/// Server to client: show a relayed line.
pub const WRITE_TO_CONSOLE: &str = "WriteToConsole";

/// Address used when none is given.
pub const DEFAULT_ADDR: &str = "127.0.0.1:1805";

/// Line that ends an interactive session (any case).
pub const EXIT_COMMAND: &str = "/exit";

/// Server registry: key exchange plus `BroadcastToAll`.
pub fn server_registry(keys: Arc<KeyPair>, handshake: HandshakeConfig) -> Result<CommandRegistry> {
    let mut registry = CommandRegistry::new();
    register_server_handshake(&mut registry, keys, handshake)?;
    registry.register(BROADCAST_TO_ALL, broadcast_to_all)?;
    Ok(registry)
}

/// Client registry: `WriteToConsole` hands each line to `on_line`.
pub fn client_registry<F>(on_line: F) -> Result<CommandRegistry>
where
    F: Fn(&str) + Send + Sync + 'static,
{
    let mut registry = CommandRegistry::new();
    registry.register(
        WRITE_TO_CONSOLE,
        move |_: &CallContext, line: String| -> HandlerResult<()> {
            on_line(&line);
            Ok(())
        },
    )?;
    Ok(registry)
}

fn broadcast_to_all(ctx: &CallContext, message: String) -> HandlerResult<()> {
    let clients = ctx
        .clients()
        .ok_or_else(|| HandlerFault::new("broadcast is only available on a server"))?;
    let line = format!("{}: {message}", ctx.endpoint());
    let report = clients.broadcast(WRITE_TO_CONSOLE, (line,), None)?;
    tracing::debug!(
        sender = %ctx.connection_id(),
        delivered = report.delivered,
        failed = report.failed.len(),
        "chat line relayed"
    );
    Ok(())
}

/// What an input line asks the session to do.
#[derive(Debug, PartialEq, Eq)]
pub enum InputLine<'a> {
    Skip,
    Exit,
    Say(&'a str),
}

/// Classify one line read from the terminal.
pub fn classify_input(line: &str) -> InputLine<'_> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        InputLine::Skip
    } else if line.eq_ignore_ascii_case(EXIT_COMMAND) {
        InputLine::Exit
    } else {
        InputLine::Say(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdwire_peer::{COMPLETE_KEY_EXCHANGE, START_KEY_EXCHANGE};

    #[test]
    fn server_registry_has_room_and_handshake_commands() {
        let registry = server_registry(Arc::new(KeyPair::generate()), HandshakeConfig::default())
            .expect("server registry should build");
        assert_eq!(
            registry.names(),
            vec![BROADCAST_TO_ALL, COMPLETE_KEY_EXCHANGE, START_KEY_EXCHANGE]
        );
    }

    #[test]
    fn client_registry_has_console_command() {
        let registry = client_registry(|_| {}).expect("client registry should build");
        assert!(registry.contains(WRITE_TO_CONSOLE));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn input_classification() {
        assert_eq!(classify_input(""), InputLine::Skip);
        assert_eq!(classify_input("\r\n"), InputLine::Skip);
        assert_eq!(classify_input("/exit"), InputLine::Exit);
        assert_eq!(classify_input("/EXIT\n"), InputLine::Exit);
        assert_eq!(classify_input("/exit now"), InputLine::Say("/exit now"));
        assert_eq!(classify_input("  hi "), InputLine::Say("  hi "));
    }
}
