//! WebSocket publisher for relayed timing data.
//!
//! Connects lazily to the publish endpoint and reconnects on the next send
//! after any failure, so a restart of the endpoint only drops the messages
//! sent while it was down. After a failed connect, sends fail fast until the
//! retry delay has passed.

use anyhow::{Context, Result};
use futures_util::SinkExt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default wait after a failed connect before trying again.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Sends text frames to a `ws://` or `wss://` endpoint.
pub struct Publisher {
    url: String,
    connect_timeout: Duration,
    retry_delay: Duration,
    retry_at: Option<Instant>,
    stream: Option<WsStream>,
}

impl Publisher {
    /// Create a publisher for `url`. No connection is made until the first send.
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
            retry_delay: DEFAULT_RETRY_DELAY,
            retry_at: None,
            stream: None,
        }
    }

    /// Set how long to wait after a failed connect before reconnecting.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// The endpoint this publisher sends to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether a connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn open(&mut self) -> Result<WsStream> {
        if let Some(retry_at) = self.retry_at {
            let now = Instant::now();
            if now < retry_at {
                anyhow::bail!(
                    "Publish endpoint unavailable, backing off for {:?}",
                    retry_at - now
                );
            }
        }

        info!("Connecting to publish endpoint {}...", self.url);
        let result = timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .context("Publish connection timeout")
            .and_then(|r| r.with_context(|| format!("Failed to connect to {}", self.url)));

        match result {
            Ok((stream, _response)) => {
                info!("Connected to publish endpoint {}", self.url);
                self.retry_at = None;
                Ok(stream)
            }
            Err(e) => {
                self.retry_at = Some(Instant::now() + self.retry_delay);
                Err(e)
            }
        }
    }

    /// Send one text message, connecting first if needed.
    ///
    /// On failure the connection is dropped and the next call reconnects.
    pub async fn send(&mut self, text: impl Into<String>) -> Result<()> {
        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => self.open().await?,
        };

        match stream.send(Message::Text(text.into())).await {
            Ok(()) => {
                self.stream = Some(stream);
                Ok(())
            }
            Err(e) => {
                warn!("Publish connection lost: {}", e);
                Err(e).context("Failed to publish message")
            }
        }
    }

    /// Close the connection, if open.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }
}
