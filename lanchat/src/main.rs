// LAN chat: find peers by multicast/broadcast solicitation, then chat over unicast UDP.

mod config;
mod discovery;
mod event_loop;
mod net;

use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::{CommandFactory, Parser};
use lanchat_core::{ChatCore, PeerSet};
use tokio::io::BufReader;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use event_loop::{EventLoop, LoopSettings};

/// Serverless LAN chat.
#[derive(Parser, Debug)]
#[command(name = "lanchat", version, about, long_about = None)]
struct Args {
    /// Broadcast or multicast address peers are solicited on
    #[arg(short, long)]
    target: Option<Ipv4Addr>,

    /// Display name (at most 10 characters)
    #[arg(short, long)]
    name: Option<String>,

    /// This host's interface address, used to ignore our own solicitations
    #[arg(short, long)]
    bind_address: Option<Ipv4Addr>,

    /// Chat and discovery UDP port
    #[arg(short, long)]
    port: Option<u16>,

    /// Discovery collection window in milliseconds
    #[arg(long)]
    discovery_timeout_ms: Option<u64>,

    /// Skip the discovery round at start
    #[arg(long)]
    no_initial_discovery: bool,

    /// Repeat discovery every N seconds
    #[arg(long)]
    rediscover_secs: Option<u64>,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn apply(&self, c: &mut config::Config) {
        if let Some(t) = self.target {
            c.target = t;
        }
        if let Some(n) = &self.name {
            c.name = n.clone();
        }
        if let Some(b) = self.bind_address {
            c.bind_address = Some(b);
        }
        if let Some(p) = self.port {
            c.port = p;
        }
        if let Some(ms) = self.discovery_timeout_ms {
            c.discovery_timeout_ms = ms;
        }
        if self.no_initial_discovery {
            c.discover_on_start = false;
        }
        if let Some(s) = self.rediscover_secs {
            c.rediscover_interval_secs = Some(s);
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let mut cfg = match config::load(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => Args::command()
            .error(clap::error::ErrorKind::Io, e)
            .exit(),
    };
    args.apply(&mut cfg);
    if let Err(e) = cfg.validate() {
        Args::command()
            .error(clap::error::ErrorKind::ValueValidation, e)
            .exit();
    }

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = rt.block_on(run(cfg));
    // Stdin is read on a blocking thread that may never return; don't wait for it.
    rt.shutdown_background();
    if let Err(e) = &result {
        error!(error = %e, "chat loop failed");
    }
    result
}

async fn run(cfg: config::Config) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        name = %cfg.name,
        port = cfg.port,
        target = %cfg.target,
        "starting lanchat"
    );

    let socket = net::bind_chat_socket(cfg.port, cfg.target)?;
    let mut core = ChatCore::with_peer_set(cfg.name.clone(), PeerSet::with_capacity(cfg.max_peers));
    net::identify_self(&mut core, &socket, cfg.target_addr(), cfg.bind_address)?;
    for peer in &cfg.peers {
        if let Err(e) = core.add_peer((*peer).into()) {
            warn!(peer = %peer, error = %e, "static peer not admitted");
        }
    }

    let settings = LoopSettings {
        target: cfg.target_addr(),
        discovery_window: cfg.discovery_timeout(),
        discover_on_start: cfg.discover_on_start,
        rediscover_every: cfg.rediscover_interval(),
    };
    let mut chat = EventLoop::new(
        socket,
        core,
        settings,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    );

    tokio::select! {
        result = chat.run() => result?,
        signal = shutdown_signal() => {
            signal?;
            info!("interrupted");
        }
    }
    info!(peers = chat.core().peers().len(), "chat loop finished");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn sigterm_ends_shutdown_wait() {
        let wait = shutdown_signal();
        tokio::pin!(wait);
        // The first poll installs the handlers.
        assert!(tokio::time::timeout(Duration::from_millis(50), &mut wait)
            .await
            .is_err());
        std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        tokio::time::timeout(Duration::from_secs(2), wait)
            .await
            .unwrap()
            .unwrap();
    }
}
