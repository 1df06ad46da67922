//! RMonitor Relay CLI - Decode a timing feed and republish it over WebSocket.

use anyhow::Result;
use clap::Parser;
use rmonitor_relay::{
    client::{TimingClient, TimingEvent},
    config::Config,
    decoder::Decoder,
    metrics::start_metrics_server,
    publisher::Publisher,
    relay::{ForwardMode, Relay},
    stats::RelayStats,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// RMonitor Relay - Decode a motorsport timing feed and republish it
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, env = "RMONITOR_CONFIG")]
    config: Option<PathBuf>,

    /// Timing system hostname
    #[arg(long, env = "RMONITOR_HOST")]
    host: Option<String>,

    /// Timing system port
    #[arg(long, env = "RMONITOR_PORT")]
    port: Option<u16>,

    /// WebSocket URL to publish to
    #[arg(short, long, env = "RMONITOR_PUBLISH_URL")]
    publish_url: Option<String>,

    /// Forward raw lines or decoded JSON envelopes
    #[arg(short, long, value_enum)]
    forward: Option<ForwardMode>,

    /// Print statistics every N seconds
    #[arg(short, long)]
    stats_interval: Option<u64>,

    /// Print each decoded record (verbose)
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Disable auto-reconnect
    #[arg(long)]
    no_reconnect: bool,

    /// Connection timeout in seconds
    #[arg(long)]
    connect_timeout: Option<u64>,

    /// Serve Prometheus metrics on this port
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Maximum runtime in seconds (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    max_runtime: u64,
}

impl Args {
    /// Overlay command-line settings on top of the config file.
    fn apply(self, mut config: Config) -> Config {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.publish_url.is_some() {
            config.publish_url = self.publish_url;
        }
        if let Some(forward) = self.forward {
            config.forward = forward;
        }
        if let Some(interval) = self.stats_interval {
            config.stats_interval = interval;
        }
        if self.no_reconnect {
            config.reconnect = false;
        }
        if let Some(timeout) = self.connect_timeout {
            config.connect_timeout = timeout;
        }
        if let Some(port) = self.metrics_port {
            config.metrics_enabled = true;
            config.metrics_port = port;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let file_config = match args.config {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let verbose = args.verbose;
    let max_runtime = args.max_runtime;
    let config = args.apply(file_config);
    config.validate()?;

    info!("RMonitor relay starting...");
    info!("Timing feed: {}:{}", config.host, config.port);
    match config.publish_url {
        Some(ref url) => info!("Publishing to {} ({:?})", url, config.forward),
        None => warn!("No publish URL configured, decoding only"),
    }

    // Create shared statistics
    let stats = Arc::new(RelayStats::new());

    // Create shutdown signal
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    // Handle Ctrl+C
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            return;
        }
        info!("Shutdown signal received");
        let _ = shutdown_tx_clone.send(true);
    });

    // Optional max runtime
    if max_runtime > 0 {
        let shutdown_tx_clone = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(max_runtime)).await;
            info!("Max runtime reached");
            let _ = shutdown_tx_clone.send(true);
        });
    }

    // Start stats printer
    if config.stats_interval > 0 {
        let stats_clone = Arc::clone(&stats);
        let stats_interval = config.stats_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(stats_interval));
            interval.tick().await;
            loop {
                interval.tick().await;
                println!("\n{}", stats_clone.summary());
            }
        });
    }

    // Start metrics server
    if config.metrics_enabled {
        let stats_clone = Arc::clone(&stats);
        let metrics_port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(metrics_port, stats_clone).await {
                error!("Metrics server failed: {}", e);
            }
        });
    }

    let relay = Relay::new(Decoder::new(), Arc::clone(&stats), config.forward).with_verbose(verbose);
    let mut publisher = config
        .publish_url
        .as_ref()
        .map(|url| {
            Publisher::new(url.as_str(), Duration::from_secs(config.connect_timeout))
                .with_retry_delay(Duration::from_secs(config.reconnect_delay))
        });

    let client = TimingClient::new(config.client_config());
    let mut events = client.connect().await?;

    // Main event loop
    loop {
        tokio::select! {
            // Check for shutdown
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }

            // Process feed events
            event = events.recv() => {
                match event {
                    Some(TimingEvent::Line(line)) => {
                        let Some(message) = relay.process_line(&line) else {
                            continue;
                        };
                        if let Some(ref mut publisher) = publisher {
                            match publisher.send(message).await {
                                Ok(()) => stats.record_forwarded(),
                                Err(e) => {
                                    stats.record_forward_failure();
                                    warn!("Publish failed: {:#}", e);
                                }
                            }
                        }
                    }
                    Some(TimingEvent::Connected) => {
                        info!("Connected to timing feed");
                    }
                    Some(TimingEvent::Disconnected(reason)) => {
                        warn!("Disconnected: {}", reason);
                    }
                    Some(TimingEvent::Error(e)) => {
                        error!("Error: {}", e);
                    }
                    None => {
                        // Channel closed
                        break;
                    }
                }
            }
        }
    }

    if let Some(ref mut publisher) = publisher {
        publisher.close().await;
    }

    // Print final statistics
    println!("\n\nFINAL STATISTICS");
    println!("{}", stats.summary());

    Ok(())
}
