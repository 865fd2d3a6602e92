//! PeerLink node binary.

mod cli;
mod config;
mod logging;
mod message;
mod node;

use clap::Parser;
use tracing::info;

use crate::cli::{Cli, Commands};
use crate::config::NodeConfig;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    logging::init_logging(&cli.logs)?;

    match cli.command {
        Commands::Node(args) => {
            let config = NodeConfig::from_args(&args)?;
            info!("Starting PeerLink {}", env!("CARGO_PKG_VERSION"));
            node::run(config).await?;
        }
        Commands::Config(args) => {
            print!("{}", NodeConfig::from_args(&args)?.to_toml()?);
        }
    }

    Ok(())
}
