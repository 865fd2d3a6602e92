//! Command line interface.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use peerlink_net::Endpoint;

/// PeerLink - exchange messages with directly connected peers
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub(crate) struct Cli {
    /// Logging configuration (applies to all subcommands).
    #[command(flatten)]
    pub(crate) logs: LogArgs,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub(crate) command: Commands,
}

/// Logging configuration
#[derive(Debug, Args, Clone)]
pub(crate) struct LogArgs {
    /// Silence all output
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Verbose mode (-v, -vv, -vvv, etc.)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub(crate) verbosity: u8,

    /// Include timestamps in logs
    #[arg(long, global = true)]
    pub(crate) timestamps: bool,

    /// Log filter
    #[arg(long = "log.filter", value_name = "DIRECTIVE", global = true)]
    pub(crate) filter: Option<String>,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Commands {
    /// Run a node: listen, dial peers and relay stdin lines to every peer
    Node(NodeArgs),

    /// Print the effective configuration as TOML
    Config(NodeArgs),
}

#[derive(Debug, Args, Clone, Default)]
pub(crate) struct NodeArgs {
    /// Configuration file (TOML)
    #[arg(long, short, value_name = "FILE")]
    pub(crate) config: Option<PathBuf>,

    /// Address to accept peers on
    #[arg(long, value_name = "ADDR")]
    pub(crate) listen: Option<SocketAddr>,

    /// Allow any number of distinct peers instead of a single link
    #[arg(long)]
    pub(crate) allow_multi: bool,

    /// Seconds to wait for a replaced channel to confirm its disconnect
    #[arg(long, value_name = "SECS")]
    pub(crate) disconnect_timeout: Option<u64>,

    /// Seconds before a dial is abandoned
    #[arg(long, value_name = "SECS")]
    pub(crate) connect_timeout: Option<u64>,

    /// Seconds between heartbeats, 0 disables
    #[arg(long, value_name = "SECS")]
    pub(crate) heartbeat_interval: Option<u64>,

    /// Peer to dial at startup (repeatable)
    #[arg(long = "peer", value_name = "HOST:PORT")]
    pub(crate) peers: Vec<Endpoint>,
}
