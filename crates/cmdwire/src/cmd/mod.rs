use std::future::Future;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use cmdwire::chat::DEFAULT_ADDR;
use cmdwire_frame::IvMode;
use cmdwire_peer::HandshakeConfig;

use crate::exit::{io_error, CliResult};
use crate::output::OutputFormat;

pub mod chat;
pub mod demo;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a chat server until interrupted.
    Serve(ServeArgs),
    /// Join a chat server and relay stdin lines to the room.
    Chat(ChatArgs),
    /// Run a server and an interactive client in one process.
    Demo(DemoArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => block_on(serve::run(args, format)),
        Command::Chat(args) => block_on(chat::run(args, format)),
        Command::Demo(args) => block_on(demo::run(args, format)),
        Command::Version(args) => version::run(args),
    }
}

fn block_on<F>(future: F) -> CliResult<i32>
where
    F: Future<Output = CliResult<i32>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime setup failed", err))?;
    let result = runtime.block_on(future);
    // A pending stdin read cannot be cancelled; do not wait for it.
    runtime.shutdown_timeout(Duration::from_millis(200));
    result
}

/// IV policy for the session cipher. Both ends must agree.
#[derive(Copy, Clone, Debug, Default, ValueEnum)]
pub enum IvModeArg {
    /// All-zero IV.
    #[default]
    Zero,
    /// IV derived from the shared key.
    Derived,
}

impl From<IvModeArg> for IvMode {
    fn from(mode: IvModeArg) -> Self {
        match mode {
            IvModeArg::Zero => IvMode::Zero,
            IvModeArg::Derived => IvMode::Derived,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct KeyExchangeArgs {
    /// IV policy for the session cipher.
    #[arg(long, value_enum, default_value = "zero")]
    pub iv_mode: IvModeArg,
    /// Timeout for the key exchange (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub handshake_timeout: Duration,
}

impl KeyExchangeArgs {
    pub fn handshake_config(&self) -> HandshakeConfig {
        HandshakeConfig {
            timeout: self.handshake_timeout,
            iv_mode: self.iv_mode.into(),
        }
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(env = "CMDWIRE_ADDR", default_value = DEFAULT_ADDR)]
    pub addr: String,
    /// Refuse clients beyond this many.
    #[arg(long)]
    pub max_connections: Option<usize>,
    #[command(flatten)]
    pub key_exchange: KeyExchangeArgs,
}

#[derive(Args, Debug)]
pub struct ChatArgs {
    /// Server address.
    #[arg(env = "CMDWIRE_ADDR", default_value = DEFAULT_ADDR)]
    pub addr: String,
    /// Skip the key exchange and talk in clear.
    #[arg(long)]
    pub plaintext: bool,
    #[command(flatten)]
    pub key_exchange: KeyExchangeArgs,
}

#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Address for the in-process server.
    #[arg(default_value = DEFAULT_ADDR)]
    pub addr: String,
    /// Skip the key exchange and talk in clear.
    #[arg(long)]
    pub plaintext: bool,
    #[command(flatten)]
    pub key_exchange: KeyExchangeArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `500ms`, `5s`, `2m` or a bare number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    let (digits, unit) = match input.find(|c: char| !c.is_ascii_digit()) {
        Some(split) => input.split_at(split),
        None => (input, "s"),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{input}'"))?;
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value.saturating_mul(60))),
        _ => Err(format!("invalid duration unit in '{input}' (use ms, s or m)")),
    }
}
