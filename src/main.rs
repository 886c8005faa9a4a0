//! Slow Tunnel CLI
//!
//! Runs either end of a versioned tunnel over WebSocket, or both ends
//! in-process over a simulated slow transport:
//! - `serve` - Accept clients and answer every message
//! - `send` - Connect, send messages and wait for the newest reply
//! - `demo` - Loopback run showing coalescing and stale reply handling

#![deny(clippy::correctness)]
#![warn(clippy::suspicious)]
#![warn(clippy::style)]
#![warn(clippy::complexity)]
#![warn(clippy::perf)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use slow_tunnel::{LoopbackTransport, TunnelId, WsTransport};

mod config;
mod session;

use config::{Config, DEFAULT_LATENCY_MS, DEFAULT_LISTEN, DEFAULT_TIMEOUT_MS, DEFAULT_URL};
use session::{client_endpoint, exchange, spawn_responder};

#[derive(Parser, Debug)]
#[command(name = "slow-tunnel")]
#[command(author, version, about = "Versioned message tunnel over a slow sync transport")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Accept tunnel clients and answer every message
    Serve(ServeArgs),

    /// Connect to a server and send messages
    Send(SendArgs),

    /// Run both sides in-process over a slow loopback transport
    Demo(DemoArgs),

    /// Show or initialise the config file
    Config {
        /// Write a config file with all defaults
        #[arg(long)]
        init: bool,
    },
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Address to listen on
    #[arg(short, long, env = "SLOW_TUNNEL_LISTEN")]
    listen: Option<String>,

    /// Delay before each reply, in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Tunnel id to announce (random if omitted)
    #[arg(long)]
    tunnel_id: Option<String>,
}

#[derive(Parser, Debug)]
struct SendArgs {
    /// Server WebSocket URL
    #[arg(short, long, env = "SLOW_TUNNEL_URL")]
    url: Option<String>,

    /// How long to wait for the newest reply, in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Tunnel id to announce (random if omitted)
    #[arg(long)]
    tunnel_id: Option<String>,

    /// Messages to send, in order
    #[arg(required = true)]
    payloads: Vec<String>,
}

#[derive(Parser, Debug)]
struct DemoArgs {
    /// Simulated transport latency, in milliseconds
    #[arg(long)]
    latency_ms: Option<u64>,

    /// Delay before each reply, in milliseconds
    #[arg(long)]
    reply_delay_ms: Option<u64>,

    /// Messages to send (defaults to a few samples)
    payloads: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = Config::load().unwrap_or_default();

    match cli.command {
        Some(Commands::Serve(args)) => run_serve(args, &config).await,
        Some(Commands::Send(args)) => run_send(args, &config).await,
        Some(Commands::Demo(args)) => run_demo(args, &config).await,
        Some(Commands::Config { init }) => run_config(init),
        None => {
            eprintln!("No command specified. Use --help for usage information.");
            eprintln!();
            eprintln!("Quick start:");
            eprintln!("  slow-tunnel demo                      Run both sides in-process");
            eprintln!("  slow-tunnel serve                     Listen on {}", DEFAULT_LISTEN);
            eprintln!("  slow-tunnel send ping                 Send to {}", DEFAULT_URL);
            std::process::exit(1);
        }
    }
}

async fn run_serve(args: ServeArgs, config: &Config) -> Result<()> {
    let listen = args
        .listen
        .or(config.server.listen.clone())
        .unwrap_or_else(|| DEFAULT_LISTEN.to_string());
    let delay = Duration::from_millis(
        args.delay_ms
            .or(config.server.reply_delay_ms)
            .unwrap_or(0),
    );
    let tunnel_id = args.tunnel_id.or(config.server.tunnel_id.clone());

    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("Failed to listen on {}", listen))?;
    info!("Listening on ws://{}", listen);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = accepted.context("Failed to accept connection")?;
                debug!("TCP connection from {}", addr);

                let tunnel_id = tunnel_id.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_peer(stream, delay, tunnel_id).await {
                        error!("Peer {} failed: {:#}", addr, e);
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
        }
    }

    Ok(())
}

async fn serve_peer(stream: TcpStream, delay: Duration, tunnel_id: Option<String>) -> Result<()> {
    let transport = WsTransport::accept(stream)
        .await
        .context("WebSocket handshake failed")?;

    let stop = CancellationToken::new();
    let (id, responder) = spawn_responder(
        transport.clone(),
        tunnel_id.map(TunnelId::from),
        delay,
        stop.clone(),
    );
    info!("Serving tunnel {} for {}", id, transport.peer());

    transport.closed().await;
    stop.cancel();
    let _ = responder.await;

    info!("Tunnel {} closed", id);
    Ok(())
}

async fn run_send(args: SendArgs, config: &Config) -> Result<()> {
    let url = args
        .url
        .or(config.client.url.clone())
        .unwrap_or_else(|| DEFAULT_URL.to_string());
    let timeout = Duration::from_millis(
        args.timeout_ms
            .or(config.client.timeout_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS),
    );
    let tunnel_id = args
        .tunnel_id
        .or(config.client.tunnel_id.clone())
        .map(TunnelId::from);

    let transport = WsTransport::connect(&url)
        .await
        .with_context(|| format!("Failed to connect to {}", url))?;

    let (tunnel, filter, mut replies) = client_endpoint(transport.clone(), tunnel_id);
    info!("Tunnel {} attached to {}", tunnel.id(), url);

    let result = exchange(
        &tunnel,
        &filter,
        &mut replies,
        &args.payloads,
        timeout,
        transport.closed(),
    )
    .await;

    if !tunnel.is_confirmed() {
        match tunnel.peer_id() {
            Some(peer) => warn!("Server announced tunnel id {} (ours is {})", peer, tunnel.id()),
            None => debug!("Server never announced a tunnel id"),
        }
    }

    transport.shutdown();
    result
}

async fn run_demo(args: DemoArgs, config: &Config) -> Result<()> {
    let latency = Duration::from_millis(
        args.latency_ms
            .or(config.demo.latency_ms)
            .unwrap_or(DEFAULT_LATENCY_MS),
    );
    let reply_delay = Duration::from_millis(
        args.reply_delay_ms
            .or(config.demo.reply_delay_ms)
            .unwrap_or(0),
    );
    let payloads = if args.payloads.is_empty() {
        vec!["ping".to_string(), "status".to_string(), "hello".to_string()]
    } else {
        args.payloads
    };

    let shutdown = CancellationToken::new();
    let (client_transport, server_transport) = LoopbackTransport::pair();

    let pumps: Vec<JoinHandle<()>> = [client_transport.clone(), server_transport.clone()]
        .into_iter()
        .map(|transport| {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { transport.run(latency, shutdown).await })
        })
        .collect();

    let id = TunnelId::generate();
    let (_, responder) = spawn_responder(
        server_transport,
        Some(id.clone()),
        reply_delay,
        shutdown.clone(),
    );
    let (tunnel, filter, mut replies) = client_endpoint(client_transport, Some(id));

    println!("Tunnel {} ({:?} latency each way)", tunnel.id(), latency);

    // Each leg takes one latency period; allow generous slack on top
    let timeout = latency * 4 + reply_delay * payloads.len() as u32 + Duration::from_secs(1);
    let result = exchange(
        &tunnel,
        &filter,
        &mut replies,
        &payloads,
        timeout,
        std::future::pending::<()>(),
    )
    .await;

    println!(
        "Last sent {:?}, last received {:?}, confirmed: {}",
        tunnel.last_sent(),
        tunnel.last_received(),
        tunnel.is_confirmed()
    );

    shutdown.cancel();
    for handle in pumps {
        let _ = handle.await;
    }
    let _ = responder.await;

    result
}

fn run_config(init: bool) -> Result<()> {
    let path = Config::config_path()?;

    if init {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }
        Config::with_defaults().save()?;
        println!("Config written to {}", path.display());
        return Ok(());
    }

    let config = Config::load()?;
    println!("# {}", path.display());
    print!(
        "{}",
        toml::to_string_pretty(&config).context("Failed to serialize config")?
    );
    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
