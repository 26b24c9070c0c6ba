//! ctforge CLI: declarative content type provisioning.

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "ctforge",
    version,
    about = "Declarative, additive provisioning of content types, fields and field links"
)]
struct Cli {
    #[command(subcommand)]
    command: ctforge::cli::Commands,
}

fn main() {
    let filter = EnvFilter::try_from_env("CTFORGE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = ctforge::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
