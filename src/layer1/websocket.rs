// WebSocket Feed Client - live price transport with reconnect/backoff
// Authenticates, subscribes to one symbol and hands every text frame to a callback

use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::config::FeedConfig;
use crate::core::ConnectionStatus;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("remote reported error: {0}")]
    Remote(String),
}

/// What the frame handler wants the transport to do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameAction {
    Continue,
    /// Drop the connection and go through backoff
    Reconnect(String),
    /// Close the connection and return from `run`
    Stop,
}

// ============================================================================
// Reconnect Backoff
// ============================================================================

/// Exponential reconnect delay: initial, ×multiplier, capped, reset on success
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    initial: Duration,
    max: Duration,
    multiplier: u32,
    current: Duration,
}

impl ReconnectBackoff {
    pub fn new(initial: Duration, max: Duration, multiplier: u32) -> Self {
        Self { initial, max, multiplier: multiplier.max(1), current: initial }
    }

    pub fn from_config(cfg: &FeedConfig) -> Self {
        Self::new(
            Duration::from_secs(cfg.backoff_initial_secs),
            Duration::from_secs(cfg.backoff_max_secs),
            cfg.backoff_multiplier,
        )
    }

    /// Delay to wait now; the following call returns the next step
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(self.multiplier).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    pub fn current(&self) -> Duration {
        self.current
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), 2)
    }
}

// ============================================================================
// Protocol messages
// ============================================================================

pub fn authenticate_message(api_key: &str) -> String {
    serde_json::json!({
        "action": "authenticate",
        "params": { "apikey": api_key }
    })
    .to_string()
}

pub fn subscribe_message(symbol: &str) -> String {
    serde_json::json!({
        "action": "subscribe",
        "params": { "symbols": symbol }
    })
    .to_string()
}

// ============================================================================
// Live Feed Client
// ============================================================================

enum SessionEnd {
    Cancelled,
    Stopped,
    Closed,
}

/// Single-symbol streaming client
pub struct LiveFeedClient {
    url: String,
    symbol: String,
    api_key: String,
    ping_interval: Duration,
    backoff: ReconnectBackoff,
    state: Arc<RwLock<ConnectionStatus>>,
    stats: Arc<RwLock<LiveFeedStats>>,
}

#[derive(Debug, Clone, Default)]
pub struct LiveFeedStats {
    pub connects: u64,
    pub connect_failures: u64,
    pub remote_errors: u64,
    pub frames_received: u64,
    pub last_backoff_ms: u64,
}

impl fmt::Display for LiveFeedStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LiveFeedStats(connects={}, failures={}, remote_errors={}, frames={}, last_backoff_ms={})",
            self.connects, self.connect_failures, self.remote_errors, self.frames_received, self.last_backoff_ms
        )
    }
}

impl LiveFeedClient {
    pub fn new(url: &str, symbol: &str, api_key: &str, backoff: ReconnectBackoff) -> Self {
        Self {
            url: url.to_string(),
            symbol: symbol.to_string(),
            api_key: api_key.to_string(),
            ping_interval: Duration::from_secs(30),
            backoff,
            state: Arc::new(RwLock::new(ConnectionStatus::Disconnected)),
            stats: Arc::new(RwLock::new(LiveFeedStats::default())),
        }
    }

    pub fn from_config(cfg: &FeedConfig, symbol: &str, api_key: &str) -> Self {
        let mut client = Self::new(&cfg.ws_url, symbol, api_key, ReconnectBackoff::from_config(cfg));
        client.ping_interval = Duration::from_secs(cfg.ws_ping_interval_secs.max(1));
        client
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.state.read()
    }

    pub fn get_stats(&self) -> LiveFeedStats {
        self.stats.read().clone()
    }

    /// Stream until cancelled, reconnecting with backoff after every failure.
    ///
    /// `on_frame` sees each text frame in arrival order. Returning
    /// `FrameAction::Stop` ends the run without reconnecting.
    pub async fn run<F>(&self, cancel: CancellationToken, mut on_frame: F)
    where
        F: FnMut(&str) -> FrameAction + Send,
    {
        let mut backoff = self.backoff.clone();

        loop {
            if cancel.is_cancelled() {
                break;
            }

            *self.state.write() = ConnectionStatus::Connecting;
            match self.session(&cancel, &mut on_frame, &mut backoff).await {
                Ok(SessionEnd::Cancelled) => break,
                Ok(SessionEnd::Stopped) => {
                    info!(symbol = %self.symbol, "Frame handler stopped the feed");
                    break;
                }
                Ok(SessionEnd::Closed) => {
                    info!(symbol = %self.symbol, "Feed connection closed by server");
                }
                Err(e) => {
                    error!(symbol = %self.symbol, error = %e, "Feed connection error");
                    let mut stats = self.stats.write();
                    match e {
                        TransportError::Remote(_) => stats.remote_errors += 1,
                        TransportError::WebSocket(_) => stats.connect_failures += 1,
                    }
                }
            }

            let delay = backoff.next_delay();
            self.stats.write().last_backoff_ms = delay.as_millis() as u64;
            *self.state.write() = ConnectionStatus::Reconnecting;
            warn!(symbol = %self.symbol, delay_secs = delay.as_secs_f64(), "Reconnecting");

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        *self.state.write() = ConnectionStatus::Disconnected;
        info!(symbol = %self.symbol, "Feed client stopped");
    }

    /// One connection lifetime
    async fn session<F>(
        &self,
        cancel: &CancellationToken,
        on_frame: &mut F,
        backoff: &mut ReconnectBackoff,
    ) -> Result<SessionEnd, TransportError>
    where
        F: FnMut(&str) -> FrameAction + Send,
    {
        debug!(url = %self.url, "Connecting to feed");

        let ws_stream = tokio::select! {
            _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
            result = connect_async(self.url.as_str()) => result?.0,
        };

        backoff.reset();
        self.stats.write().connects += 1;
        *self.state.write() = ConnectionStatus::Connected;
        info!(url = %self.url, symbol = %self.symbol, "Feed connected");

        let (mut write, mut read) = ws_stream.split();
        write.send(Message::Text(authenticate_message(&self.api_key))).await?;
        write.send(Message::Text(subscribe_message(&self.symbol))).await?;

        let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + self.ping_interval, self.ping_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Cancelled);
                }

                _ = ping.tick() => {
                    write.send(Message::Ping(Vec::new())).await?;
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.stats.write().frames_received += 1;
                            match on_frame(&text) {
                                FrameAction::Continue => {}
                                FrameAction::Reconnect(reason) => return Err(TransportError::Remote(reason)),
                                FrameAction::Stop => {
                                    let _ = write.send(Message::Close(None)).await;
                                    return Ok(SessionEnd::Stopped);
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Closed),
                        Some(Ok(Message::Binary(data))) => {
                            warn!(bytes = data.len(), "Received unexpected binary message");
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                    }
                }
            }
        }
    }
}
