use crate::cmd::chat::session;
use crate::cmd::serve::start_server;
use crate::cmd::DemoArgs;
use crate::exit::{peer_error, CliResult};
use crate::output::{print_listening, OutputFormat};

pub async fn run(args: DemoArgs, format: OutputFormat) -> CliResult<i32> {
    let server = start_server(&args.addr, None, &args.key_exchange).await?;
    let addr = server.local_addr();
    print_listening(addr, format);

    let result = session(&addr.to_string(), args.plaintext, &args.key_exchange, format).await;

    server
        .stop()
        .await
        .map_err(|err| peer_error("server shutdown failed", err))?;
    result
}
