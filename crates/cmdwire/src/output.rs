use std::io::{IsTerminal, Write};
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One JSON object per line.
    Json,
    /// Human-readable lines.
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Event<'a> {
    Listening { addr: SocketAddr },
    Connected { addr: SocketAddr, encrypted: bool },
    Message { command: &'a str, text: &'a str, timestamp: String },
}

fn emit(event: &Event<'_>, pretty: impl FnOnce() -> String, format: OutputFormat) {
    let line = match format {
        OutputFormat::Json => serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string()),
        OutputFormat::Pretty => pretty(),
    };
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{line}");
    let _ = out.flush();
}

pub fn print_listening(addr: SocketAddr, format: OutputFormat) {
    emit(
        &Event::Listening { addr },
        || format!("listening on {addr}"),
        format,
    );
}

pub fn print_connected(addr: SocketAddr, encrypted: bool, format: OutputFormat) {
    emit(
        &Event::Connected { addr, encrypted },
        || {
            let mode = if encrypted { "encrypted" } else { "plaintext" };
            format!("connected to {addr} ({mode})")
        },
        format,
    );
}

/// Print one relayed chat line.
pub fn print_message(command: &str, text: &str, format: OutputFormat) {
    emit(
        &Event::Message {
            command,
            text,
            timestamp: now_unix_seconds(),
        },
        || text.to_string(),
        format,
    );
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
