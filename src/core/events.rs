// Broadcast Hub for Divergence Bot
// Fan-out of candle, signal and keepalive messages to live subscribers

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::types::{now_ms, Candle, DivergenceKind};

pub type SubscriberId = Uuid;

pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 1024;
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

// ============================================================================
// Messages
// ============================================================================

/// Candle update as sent to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleMessage {
    pub event: String,
    pub symbol: String,
    pub tf: String,
    pub ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl CandleMessage {
    pub fn new(symbol: &str, timeframe: &str, candle: &Candle) -> Self {
        Self {
            event: "candle".to_string(),
            symbol: symbol.to_string(),
            tf: timeframe.to_string(),
            ts: candle.timestamp_ms,
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            volume: candle.volume,
        }
    }
}

/// Immutable record of one emitted divergence signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPacket {
    pub signal_bit: u8,
    #[serde(rename = "ts_unix_ms")]
    pub timestamp_ms: i64,
    pub symbol: String,
    #[serde(rename = "tf")]
    pub timeframe: String,
    pub divergence_type: DivergenceKind,
    pub score: u8,
}

impl fmt::Display for SignalPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Signal({} {} {} score={} bit={} ts={})",
            self.symbol, self.timeframe, self.divergence_type, self.score, self.signal_bit, self.timestamp_ms
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeepaliveMessage {
    pub event: String,
    pub ts: i64,
}

impl KeepaliveMessage {
    pub fn now() -> Self {
        Self { event: "keepalive".to_string(), ts: now_ms() }
    }
}

/// Anything the hub delivers; serializes to the bare inner object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BroadcastMessage {
    Candle(CandleMessage),
    Signal(SignalPacket),
    Keepalive(KeepaliveMessage),
}

impl BroadcastMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BroadcastMessage::Candle(_) => "candle",
            BroadcastMessage::Signal(_) => "signal",
            BroadcastMessage::Keepalive(_) => "keepalive",
        }
    }
}

impl From<SignalPacket> for BroadcastMessage {
    fn from(packet: SignalPacket) -> Self {
        BroadcastMessage::Signal(packet)
    }
}

impl From<CandleMessage> for BroadcastMessage {
    fn from(candle: CandleMessage) -> Self {
        BroadcastMessage::Candle(candle)
    }
}

// ============================================================================
// Broadcast Hub
// ============================================================================

type Registry = Arc<Mutex<HashMap<SubscriberId, mpsc::Sender<BroadcastMessage>>>>;

/// Subscriber set behind a single lock.
///
/// Each subscriber owns a bounded inbox. A subscriber whose inbox is full when a
/// message arrives is disconnected rather than allowed to stall the broadcaster;
/// closed inboxes are pruned the same way.
pub struct BroadcastHub {
    subscribers: Registry,
    capacity: usize,
    keepalive: Duration,
    stats: Arc<RwLock<HubStats>>,
}

#[derive(Debug, Clone, Default)]
struct HubStats {
    total_broadcasts: u64,
    total_delivered: u64,
    total_subscribed: u64,
    total_unsubscribed: u64,
    evicted_slow: u64,
    pruned_closed: u64,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_SUBSCRIBER_CAPACITY, DEFAULT_KEEPALIVE)
    }

    pub fn with_settings(capacity: usize, keepalive: Duration) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
            keepalive,
            stats: Arc::new(RwLock::new(HubStats::default())),
        }
    }

    /// Register a new subscriber. Dropping the returned handle unsubscribes it.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = Uuid::new_v4();

        let count = {
            let mut subscribers = self.subscribers.lock();
            subscribers.insert(id, tx);
            subscribers.len()
        };
        self.stats.write().total_subscribed += 1;

        info!(subscriber = %id, subscribers = count, "Subscriber registered");

        Subscription {
            id,
            rx,
            registry: Arc::clone(&self.subscribers),
            keepalive: self.keepalive,
        }
    }

    /// Remove a subscriber; returns false if it was already gone
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.lock().remove(&id).is_some();
        if removed {
            self.stats.write().total_unsubscribed += 1;
            info!(subscriber = %id, "Subscriber removed");
        }
        removed
    }

    /// Deliver one message to every current subscriber, returning how many accepted it
    pub fn broadcast(&self, message: BroadcastMessage) -> usize {
        let mut delivered = 0usize;
        let mut evicted = 0u64;
        let mut pruned = 0u64;

        {
            let mut subscribers = self.subscribers.lock();
            subscribers.retain(|id, tx| match tx.try_send(message.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber = %id, kind = message.kind(), "Subscriber inbox full, disconnecting");
                    evicted += 1;
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber = %id, "Pruning closed subscriber");
                    pruned += 1;
                    false
                }
            });
        }

        let mut stats = self.stats.write();
        stats.total_broadcasts += 1;
        stats.total_delivered += delivered as u64;
        stats.evicted_slow += evicted;
        stats.pruned_closed += pruned;

        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn keepalive_interval(&self) -> Duration {
        self.keepalive
    }

    /// Get hub statistics
    pub fn get_stats(&self) -> HubStatsSnapshot {
        let stats = self.stats.read();
        HubStatsSnapshot {
            total_broadcasts: stats.total_broadcasts,
            total_delivered: stats.total_delivered,
            total_subscribed: stats.total_subscribed,
            total_unsubscribed: stats.total_unsubscribed,
            evicted_slow: stats.evicted_slow,
            pruned_closed: stats.pruned_closed,
            subscriber_count: self.subscriber_count(),
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of hub statistics
#[derive(Debug, Clone, Serialize)]
pub struct HubStatsSnapshot {
    pub total_broadcasts: u64,
    pub total_delivered: u64,
    pub total_subscribed: u64,
    pub total_unsubscribed: u64,
    pub evicted_slow: u64,
    pub pruned_closed: u64,
    pub subscriber_count: usize,
}

// ============================================================================
// Subscription
// ============================================================================

/// Receiving end of a hub registration
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<BroadcastMessage>,
    registry: Registry,
    keepalive: Duration,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next broadcast. None once the hub has dropped this subscriber.
    pub async fn recv(&mut self) -> Option<BroadcastMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<BroadcastMessage> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next broadcast, yielding a keepalive after the idle interval
    pub async fn next_or_keepalive(&mut self) -> Option<BroadcastMessage> {
        match tokio::time::timeout(self.keepalive, self.rx.recv()).await {
            Ok(message) => message,
            Err(_) => Some(BroadcastMessage::Keepalive(KeepaliveMessage::now())),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
