// Stream Server - websocket endpoint that relays hub messages to clients
// Each connection holds one hub subscription for as long as it stays open

use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::config::BroadcastConfig;
use crate::core::events::{BroadcastHub, BroadcastMessage};

#[derive(Debug, Error)]
pub enum StreamServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid bind address: {0}")]
    Address(String),
}

/// Stream server statistics
#[derive(Debug, Clone, Default)]
pub struct StreamServerStats {
    pub connections_accepted: u64,
    pub handshake_failures: u64,
    pub active_connections: u64,
    pub messages_sent: u64,
    pub keepalives_sent: u64,
    pub send_failures: u64,
}

impl fmt::Display for StreamServerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StreamServer(active={}, accepted={}, rejected={}, sent={}, keepalives={})",
            self.active_connections,
            self.connections_accepted,
            self.handshake_failures,
            self.messages_sent,
            self.keepalives_sent
        )
    }
}

pub struct StreamServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    path: String,
    hub: Arc<BroadcastHub>,
    stats: Arc<RwLock<StreamServerStats>>,
}

impl StreamServer {
    /// Bind the listener; upgrades are accepted on `path` only
    pub async fn bind(addr: &str, path: &str, hub: Arc<BroadcastHub>) -> Result<Self, StreamServerError> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|_| StreamServerError::Address(addr.to_string()))?;
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            path: path.to_string(),
            hub,
            stats: Arc::new(RwLock::new(StreamServerStats::default())),
        })
    }

    /// Server for the configured address, or None when streaming is disabled
    pub async fn from_config(cfg: &BroadcastConfig, hub: Arc<BroadcastHub>) -> Result<Option<Self>, StreamServerError> {
        match &cfg.stream_bind_addr {
            Some(addr) => Ok(Some(Self::bind(addr, &cfg.stream_path, hub).await?)),
            None => Ok(None),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn get_stats(&self) -> StreamServerStats {
        self.stats.read().clone()
    }

    /// Accept clients until cancelled. Open connections close with the same token.
    pub async fn serve(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            addr = %self.local_addr,
            path = %self.path,
            keepalive_secs = self.hub.keepalive_interval().as_secs_f64(),
            "Stream server listening"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let server = Arc::clone(&self);
                        tokio::spawn(server.handle_connection(stream, peer, cancel.child_token()));
                    }
                    Err(e) => warn!(error = %e, "Stream server accept failed"),
                },
            }
        }

        info!(stats = %self.get_stats(), "Stream server stopped");
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr, cancel: CancellationToken) {
        let expected = self.path.clone();
        let check_path = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            if request.uri().path() == expected {
                Ok(response)
            } else {
                let mut rejection = ErrorResponse::new(Some(format!("no stream at {}", request.uri().path())));
                *rejection.status_mut() = StatusCode::NOT_FOUND;
                Err(rejection)
            }
        };

        let ws = match accept_hdr_async(stream, check_path).await {
            Ok(ws) => ws,
            Err(e) => {
                self.stats.write().handshake_failures += 1;
                warn!(%peer, error = %e, "Stream handshake rejected");
                return;
            }
        };

        let mut subscription = self.hub.subscribe();
        {
            let mut stats = self.stats.write();
            stats.connections_accepted += 1;
            stats.active_connections += 1;
        }
        info!(%peer, subscriber = %subscription.id(), "Stream client connected");

        let (mut write, mut read) = ws.split();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }

                message = subscription.next_or_keepalive() => {
                    let Some(message) = message else {
                        warn!(%peer, "Stream client dropped by hub");
                        break;
                    };
                    let json = match message.to_json() {
                        Ok(json) => json,
                        Err(e) => {
                            error!(kind = message.kind(), error = %e, "Failed to encode stream message");
                            continue;
                        }
                    };
                    if let Err(e) = write.send(Message::Text(json)).await {
                        self.stats.write().send_failures += 1;
                        debug!(%peer, error = %e, "Stream send failed");
                        break;
                    }
                    let mut stats = self.stats.write();
                    stats.messages_sent += 1;
                    if matches!(message, BroadcastMessage::Keepalive(_)) {
                        stats.keepalives_sent += 1;
                    }
                }

                incoming = read.next() => match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if write.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(%peer, error = %e, "Stream client read failed");
                        break;
                    }
                },
            }
        }

        let id = subscription.id();
        drop(subscription);
        self.stats.write().active_connections -= 1;
        info!(%peer, subscriber = %id, "Stream client disconnected");
    }
}
