#![forbid(unsafe_code)]

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use muninn_relay_lib::{
    engine, proxy, ClientEndpoint, Collaborators, Config, ProxyAddrs, ProxyConfig, RelayError,
    RemoteEndpoint, Result, Shard,
};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "UDP multipath bonding relay")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Client-side engine: intercept the game's UDP flow and fan it out
    /// over the best proxy paths
    Run(RunArgs),
    /// Standalone proxy endpoint bridging one client and one server flow
    Proxy(ProxyArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Data listen addresses, one per proxy, comma separated
    #[arg(long, value_delimiter = ',', required = true)]
    proxy_listen_addr: Vec<SocketAddr>,

    /// Ping listen addresses, index-aligned with the data list
    #[arg(long, value_delimiter = ',', required = true)]
    proxy_ping_listen_addr: Vec<SocketAddr>,

    /// Game shard: NA, LAN, LAS, EUW, EUNE, OCE, RU, TR, JP or KR
    #[arg(long, default_value = "NA", value_parser = parse_shard)]
    server: Shard,

    /// First-selection RTT cutoff multiplier
    #[arg(long, default_value_t = 1.4)]
    threshold_factor: f64,

    /// Maximum fan-out per payload
    #[arg(long, default_value_t = 2)]
    max_connections: usize,

    /// Seconds between dynamic re-selections
    #[arg(long, default_value_t = 30)]
    update_interval: u64,

    /// Seconds between probes of down paths
    #[arg(long, default_value_t = 10)]
    probe_interval: u64,

    /// RTT probe timeout in seconds
    #[arg(long, default_value_t = 1)]
    timeout: u64,

    /// Seconds before cached packet fingerprints are evicted
    #[arg(long, default_value_t = 1)]
    cleanup_interval: u64,

    /// Re-select the best paths periodically
    #[arg(long)]
    dynamic: bool,

    /// Local interface IPs to bind paths to, comma separated; defaults
    /// to the client address IP
    #[arg(long, value_delimiter = ',')]
    local_ip: Vec<IpAddr>,

    /// UDP endpoint of the game client (stand-in for the game-process
    /// locator)
    #[arg(long)]
    client_addr: SocketAddr,

    /// Game server endpoint (stand-in for the capture-based remote
    /// resolver)
    #[arg(long)]
    remote_addr: SocketAddr,

    /// Also run the proxy endpoints in-process on the listen addresses
    #[arg(long)]
    spawn_proxies: bool,
}

#[derive(Args, Debug)]
struct ProxyArgs {
    /// Data listen address
    #[arg(long)]
    listen_addr: SocketAddr,

    /// Ping listen address
    #[arg(long)]
    ping_listen_addr: SocketAddr,

    /// Game server endpoint this proxy forwards to
    #[arg(long)]
    remote_addr: SocketAddr,

    /// Client endpoint server replies are forwarded to
    #[arg(long)]
    client_addr: SocketAddr,

    /// Game shard: NA, LAN, LAS, EUW, EUNE, OCE, RU, TR, JP or KR
    #[arg(long, default_value = "NA", value_parser = parse_shard)]
    server: Shard,

    /// Seconds before cached packet fingerprints are evicted
    #[arg(long, default_value_t = 1)]
    cleanup_interval: u64,
}

fn parse_shard(s: &str) -> std::result::Result<Shard, String> {
    s.parse::<Shard>().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Run(args) => run_engine(args).await,
        Command::Proxy(args) => run_proxy(args).await,
    };
    if let Err(err) = outcome {
        error!(%err, "fatal");
        let code = match err {
            RelayError::Config(_) => 2,
            _ => 1,
        };
        std::process::exit(code);
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            trigger.cancel();
        }
    });
    cancel
}

async fn run_engine(args: RunArgs) -> Result<()> {
    if args.proxy_listen_addr.len() != args.proxy_ping_listen_addr.len() {
        return Err(RelayError::Config(format!(
            "--proxy-listen-addr and --proxy-ping-listen-addr must have the same number of entries ({} vs {})",
            args.proxy_listen_addr.len(),
            args.proxy_ping_listen_addr.len()
        )));
    }

    let cfg = Config {
        shard: args.server,
        threshold_factor: args.threshold_factor,
        max_connections: args.max_connections,
        update_interval: Duration::from_secs(args.update_interval),
        probe_interval: Duration::from_secs(args.probe_interval),
        timeout: Duration::from_secs(args.timeout),
        cleanup_interval: Duration::from_secs(args.cleanup_interval),
        dynamic: args.dynamic,
        ..Config::default()
    };
    cfg.validate()?;

    let proxies: Vec<ProxyAddrs> = args
        .proxy_listen_addr
        .iter()
        .zip(&args.proxy_ping_listen_addr)
        .map(|(data, ping)| ProxyAddrs {
            data: *data,
            ping: *ping,
        })
        .collect();

    // The real locator and resolver are external; the flags feed their
    // channels directly.
    let (client_tx, client_rx) = oneshot::channel();
    let (remote_tx, remote_rx) = oneshot::channel();
    let _ = client_tx.send(ClientEndpoint {
        ip: args.client_addr.ip(),
        port: args.client_addr.port(),
    });
    let _ = remote_tx.send(RemoteEndpoint {
        remote_addr: args.remote_addr,
        client_local_ip: args.client_addr.ip(),
    });

    engine::run(
        Arc::new(cfg),
        proxies,
        args.local_ip,
        Collaborators {
            client: client_rx,
            remote: remote_rx,
        },
        args.spawn_proxies,
        shutdown_token(),
    )
    .await
}

async fn run_proxy(args: ProxyArgs) -> Result<()> {
    let cfg = Config {
        shard: args.server,
        cleanup_interval: Duration::from_secs(args.cleanup_interval),
        ..Config::default()
    };
    cfg.validate()?;

    let (flow_tx, flow_rx) = oneshot::channel();
    let _ = flow_tx.send(ProxyConfig {
        remote_addr: args.remote_addr,
        client_addr: args.client_addr,
    });

    proxy::run(
        Arc::new(cfg),
        args.listen_addr,
        args.ping_listen_addr,
        flow_rx,
        shutdown_token(),
    )
    .await
}
