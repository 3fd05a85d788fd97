// Minimal proof-of-work node - CLI

use clap::Parser;
use simple_chain::{cli, Cli};

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse();

    if let Err(e) = cli::execute(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
