use std::{
    net::SocketAddr,
    thread,
    time::{Duration, Instant},
};

use clap::Parser;
use rodl::{ChannelKind, ClientBuilder, ClientConfig, ConnectionResult, Event};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const TICK: Duration = Duration::from_millis(5);
const STAT_INTERVAL: Duration = Duration::from_secs(1);
const CHANNEL: u8 = 0;

/// Echoes every message back to its sender, or talks to such an echo peer.
#[derive(Parser)]
struct Args {
    #[arg(long, default_value = "0.0.0.0:19479")]
    listen: SocketAddr,
    /// Peer to send numbered messages to.
    #[arg(long)]
    connect: Option<SocketAddr>,
    #[arg(long, default_value_t = 500)]
    interval_ms: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let args = Args::parse();

    let mut client = ClientBuilder {
        config: ClientConfig::default(),
        channels: vec![ChannelKind::ReliableOrdered],
    }
    .bind(args.listen)?;
    info!("listening on {}", client.local_addr()?);

    let interval = Duration::from_millis(args.interval_ms);
    let mut next_message = Instant::now();
    let mut next_stat = Instant::now() + STAT_INTERVAL;
    let mut counter = 0u64;
    if let Some(peer) = args.connect {
        client.connect(peer, Instant::now());
    }

    loop {
        let now = Instant::now();
        client.receive(now)?;
        while let Some(event) = client.poll() {
            match event {
                Event::IncomingConnection { from } if args.connect.is_none() => {
                    client.connect(from, now);
                }
                Event::Data {
                    from,
                    channel,
                    data,
                } => {
                    info!("{}: {}", from, String::from_utf8_lossy(&data));
                    if args.connect.is_none() {
                        if let Err(e) = client.send_to(from, channel, data) {
                            warn!("cannot echo to {}: {}", from, e);
                        }
                    }
                }
                Event::Connection {
                    from,
                    result: result @ (ConnectionResult::Refused | ConnectionResult::TimedOut),
                } if Some(from) == args.connect => {
                    anyhow::bail!("cannot connect to {}: {:?}", from, result);
                }
                Event::Disconnection { from, reason } if Some(from) == args.connect => {
                    anyhow::bail!("lost {}: {:?}", from, reason);
                }
                event => info!("{:?}", event),
            }
        }

        if let Some(peer) = args.connect {
            if now >= next_message && client.peer_state(peer).is_some() {
                client.send_to(peer, CHANNEL, format!("message #{}", counter).into_bytes())?;
                counter += 1;
                next_message = now + interval;
            }
            if now >= next_stat {
                if let Some(stat) = client.peer_stat(peer) {
                    info!("{:?}", stat);
                }
                next_stat = now + STAT_INTERVAL;
            }
        }

        client.process_send(now);
        thread::sleep(TICK);
    }
}
