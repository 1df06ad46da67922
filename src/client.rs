//! TCP client for reading an RMonitor timing feed.
//!
//! This module handles the connection to the timing system's scoreboard
//! port and streams raw lines to the relay over a channel.

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Default host of the timing system.
pub const DEFAULT_HOST: &str = "localhost";

/// Default RMonitor scoreboard port.
pub const DEFAULT_PORT: u16 = 5001;

/// Configuration for the feed client.
#[derive(Debug, Clone)]
pub struct TimingClientConfig {
    /// Hostname of the timing system.
    pub host: String,

    /// Port number.
    pub port: u16,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Read timeout for individual lines.
    pub read_timeout: Duration,

    /// Whether to automatically reconnect on disconnect.
    pub auto_reconnect: bool,

    /// Delay between reconnection attempts.
    pub reconnect_delay: Duration,
}

impl Default for TimingClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(120),
            auto_reconnect: true,
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

impl TimingClientConfig {
    /// Set the host and port.
    pub fn with_server(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }
}

/// Events from the feed client.
#[derive(Debug)]
pub enum TimingEvent {
    /// A line was received, terminator included. Bytes that are not valid
    /// UTF-8 are replaced with U+FFFD.
    Line(String),

    /// Connection was established.
    Connected,

    /// Connection was lost.
    Disconnected(String),

    /// An error occurred.
    Error(String),
}

/// Async RMonitor feed client.
pub struct TimingClient {
    config: TimingClientConfig,
}

impl TimingClient {
    /// Create a new client with the given configuration.
    pub fn new(config: TimingClientConfig) -> Self {
        Self { config }
    }

    /// Connect to the timing system and start streaming lines.
    ///
    /// Returns a receiver channel that will receive `TimingEvent`s.
    /// The connection runs in a background task.
    pub async fn connect(self) -> Result<mpsc::Receiver<TimingEvent>> {
        let (tx, rx) = mpsc::channel(1000);

        tokio::spawn(async move {
            self.run_connection_loop(tx).await;
        });

        Ok(rx)
    }

    /// Run the main connection loop with auto-reconnect.
    async fn run_connection_loop(self, tx: mpsc::Sender<TimingEvent>) {
        loop {
            match self.connect_and_stream(&tx).await {
                Ok(()) => {
                    info!("Connection closed normally");
                }
                Err(e) => {
                    error!("Connection error: {:#}", e);
                    let _ = tx.send(TimingEvent::Error(format!("{:#}", e))).await;
                }
            }

            if tx
                .send(TimingEvent::Disconnected("Connection lost".to_string()))
                .await
                .is_err()
            {
                // Receiver dropped, nobody is listening any more
                break;
            }

            if !self.config.auto_reconnect {
                break;
            }

            info!(
                "Reconnecting in {} seconds...",
                self.config.reconnect_delay.as_secs()
            );
            tokio::time::sleep(self.config.reconnect_delay).await;
        }
    }

    /// Connect to the timing system and stream lines until disconnected.
    async fn connect_and_stream(&self, tx: &mpsc::Sender<TimingEvent>) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        info!("Connecting to {}...", addr);

        let stream = timeout(self.config.connect_timeout, TcpStream::connect(&addr))
            .await
            .context("Connection timeout")?
            .context("Failed to connect")?;

        info!("Connected to {}", addr);
        if tx.send(TimingEvent::Connected).await.is_err() {
            return Ok(());
        }

        let mut reader = BufReader::new(stream);
        let mut line_buf = Vec::with_capacity(256);

        loop {
            line_buf.clear();

            let read_result =
                timeout(self.config.read_timeout, reader.read_until(b'\n', &mut line_buf)).await;

            match read_result {
                Ok(Ok(0)) => {
                    // EOF - connection closed
                    return Ok(());
                }
                Ok(Ok(_n)) => {
                    // Invalid UTF-8 stays local to its line
                    let line = String::from_utf8_lossy(&line_buf).into_owned();
                    debug!("Received: {}", line.trim_end());
                    if tx.send(TimingEvent::Line(line)).await.is_err() {
                        // Receiver dropped
                        return Ok(());
                    }
                }
                Ok(Err(e)) => {
                    return Err(e).context("Read error");
                }
                Err(_) => {
                    warn!("Read timeout, connection may be stale");
                    return Err(anyhow::anyhow!("Read timeout"));
                }
            }
        }
    }
}
