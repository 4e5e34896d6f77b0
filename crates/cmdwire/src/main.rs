mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "cmdwire", version, about = "Named-command RPC over TCP")]
struct Cli {
    /// Output format (stdout).
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "warn", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serve_subcommand() {
        let cli = Cli::try_parse_from(["cmdwire", "serve", "0.0.0.0:9000", "--max-connections", "8"])
            .expect("serve args should parse");
        match cli.command {
            Command::Serve(args) => {
                assert_eq!(args.addr, "0.0.0.0:9000");
                assert_eq!(args.max_connections, Some(8));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_chat_with_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "cmdwire",
            "chat",
            "127.0.0.1:1805",
            "--plaintext",
            "--format",
            "json",
            "--iv-mode",
            "derived",
        ])
        .expect("chat args should parse");
        assert_eq!(cli.format, Some(OutputFormat::Json));
        match cli.command {
            Command::Chat(args) => {
                assert!(args.plaintext);
                assert!(matches!(args.key_exchange.iv_mode, cmd::IvModeArg::Derived));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn demo_address_defaults() {
        let cli = Cli::try_parse_from(["cmdwire", "demo"]).expect("demo args should parse");
        match cli.command {
            Command::Demo(args) => assert_eq!(args.addr, "127.0.0.1:1805"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_iv_mode() {
        let err = Cli::try_parse_from(["cmdwire", "serve", "--iv-mode", "random"])
            .expect_err("unknown iv mode should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }
}
