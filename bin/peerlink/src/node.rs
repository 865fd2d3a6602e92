//! The `node` command: run a link service over TCP and relay stdin.

use std::time::Duration;

use eyre::Result;
use peerlink_net::{Endpoint, LinkEvent, PeerLinkHandle, spawn_peerlink};
use peerlink_net_tcp::TcpTransport;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::message::{ChatLine, Heartbeat, Payload};

/// Operator input read from stdin.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Say(String),
    Dial(Endpoint),
    Close(Endpoint),
    Multi(bool),
    Peers,
    Quit,
    Invalid(String),
}

impl Input {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Some(Self::Say(line.to_string()));
        };

        let mut parts = command.split_whitespace();
        let input = match (parts.next(), parts.next()) {
            (Some("dial"), Some(addr)) => addr.parse().map(Self::Dial).ok(),
            (Some("close"), Some(addr)) => addr.parse().map(Self::Close).ok(),
            (Some("multi"), Some("on")) => Some(Self::Multi(true)),
            (Some("multi"), Some("off")) => Some(Self::Multi(false)),
            (Some("peers"), None) => Some(Self::Peers),
            (Some("quit"), None) => Some(Self::Quit),
            _ => None,
        };
        Some(input.unwrap_or_else(|| Self::Invalid(line.to_string())))
    }
}

pub(crate) async fn run(config: NodeConfig) -> Result<()> {
    let transport = TcpTransport::<Payload>::new(config.tcp.clone());
    let link = spawn_peerlink::<Payload, _>(config.link.clone(), transport);

    tokio::spawn(log_events(link.clone()));
    tokio::spawn(print_chat(link.clone()));
    tokio::spawn(track_heartbeats(link.clone()));
    let heartbeats = config
        .heartbeat()
        .map(|interval| tokio::spawn(send_heartbeats(link.clone(), interval)));

    for peer in &config.peers {
        info!(%peer, "dialing configured peer");
        link.dial(*peer)?;
    }

    info!("Starting node... (type a line to send it, /quit or Ctrl+C to stop)");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = read_stdin(&link) => {
            result?;
        }
    }

    shutdown(link, heartbeats).await
}

/// Close every channel and release the last handles so the service exits.
async fn shutdown(link: PeerLinkHandle<Payload>, heartbeats: Option<JoinHandle<()>>) -> Result<()> {
    if let Some(task) = heartbeats {
        task.abort();
    }

    // Round-trip so the service has closed every channel before the runtime stops.
    link.close_all()?;
    link.peers().await?;
    Ok(())
}

async fn read_stdin(link: &PeerLinkHandle<Payload>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let Some(input) = Input::parse(&line) else {
            continue;
        };
        match input {
            Input::Say(text) => link.broadcast(ChatLine { text })?,
            Input::Dial(endpoint) => link.dial(endpoint)?,
            Input::Close(endpoint) => link.close(endpoint)?,
            Input::Multi(allow_multi) => link.set_allow_multi(allow_multi)?,
            Input::Peers => {
                let peers = link.peers().await?;
                info!(count = peers.len(), "connected peers");
                for peer in peers {
                    println!("  {peer}");
                }
            }
            Input::Quit => return Ok(()),
            Input::Invalid(line) => warn!(%line, "unknown command"),
        }
    }

    debug!("stdin closed");
    Ok(())
}

async fn log_events(link: PeerLinkHandle<Payload>) {
    let mut events = link.subscribe_events();
    drop(link);
    loop {
        match events.recv().await {
            Ok(LinkEvent::Connected { endpoint }) => info!(%endpoint, "peer connected"),
            Ok(LinkEvent::Disconnected { endpoint }) => info!(%endpoint, "peer disconnected"),
            Ok(LinkEvent::Error { endpoint, cause }) => {
                warn!(%endpoint, %cause, "peer link failed")
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "link events dropped"),
            Err(RecvError::Closed) => return,
        }
    }
}

async fn print_chat(link: PeerLinkHandle<Payload>) {
    let mut chat = link.subscribe::<ChatLine>();
    drop(link);
    while let Some(delivery) = chat.recv().await {
        println!("[{}] {}", delivery.endpoint, delivery.payload.text);
    }
}

async fn track_heartbeats(link: PeerLinkHandle<Payload>) {
    let mut beats = link.subscribe::<Heartbeat>();
    drop(link);
    while let Some(delivery) = beats.recv().await {
        debug!(endpoint = %delivery.endpoint, seq = delivery.payload.seq, "heartbeat");
    }
}

async fn send_heartbeats(link: PeerLinkHandle<Payload>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    for seq in 0u64.. {
        interval.tick().await;
        if link.broadcast(Heartbeat { seq }).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input() {
        assert_eq!(Input::parse("  "), None);
        assert_eq!(Input::parse("hello there"), Some(Input::Say("hello there".into())));
        assert_eq!(
            Input::parse("/dial 10.0.0.2:7000"),
            Some(Input::Dial("10.0.0.2:7000".parse().unwrap()))
        );
        assert_eq!(Input::parse("/multi on"), Some(Input::Multi(true)));
        assert_eq!(Input::parse("/peers"), Some(Input::Peers));
        assert_eq!(Input::parse("/quit"), Some(Input::Quit));
        assert_eq!(Input::parse("/dial nowhere"), Some(Input::Invalid("/dial nowhere".into())));
    }

    #[tokio::test]
    async fn test_shutdown_stops_service() {
        let link = spawn_peerlink::<Payload, _>(Default::default(), TcpTransport::default());
        let mut events = link.subscribe_events();
        let heartbeats = tokio::spawn(send_heartbeats(link.clone(), Duration::from_secs(1)));

        shutdown(link, Some(heartbeats)).await.unwrap();

        // The service drops its event sender once no handle is left.
        let closed = tokio::time::timeout(Duration::from_secs(5), events.recv()).await;
        assert!(matches!(closed, Ok(Err(RecvError::Closed))));
    }
}
