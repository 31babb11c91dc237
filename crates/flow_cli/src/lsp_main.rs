use std::process;

use flow_driver::LanguageServer;
use tracing_subscriber::EnvFilter;

fn main() {
    // The protocol owns stdout; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let mut server = LanguageServer::new();
    if let Err(e) = server.run_stdio() {
        eprintln!("flow-lsp: {e}");
        process::exit(1);
    }
}
