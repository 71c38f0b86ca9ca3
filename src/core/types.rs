// Core Type Definitions for Divergence Bot
// Market data primitives shared by the feed, the pipeline and the broadcast hub

use serde::{Deserialize, Serialize};
use std::fmt;

/// Current wall-clock time in unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Where the feed aggregator sources its data from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedMode {
    Live,
    Simulated,
}

impl fmt::Display for FeedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedMode::Live => write!(f, "live"),
            FeedMode::Simulated => write!(f, "simulated"),
        }
    }
}

/// Lifecycle of a feed aggregator instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedState {
    Idle,
    Running,
    Stopped,
}

impl fmt::Display for FeedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Price/indicator divergence classification.
///
/// Serialized by variant name, which is also the `divergence_type` column of
/// persisted signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DivergenceKind {
    BearishRegular,
    BullishRegular,
    BearishHidden,
    BullishHidden,
    NoDivergence,
}

impl DivergenceKind {
    pub fn is_bullish(&self) -> bool {
        matches!(self, DivergenceKind::BullishRegular | DivergenceKind::BullishHidden)
    }

    pub fn is_regular(&self) -> bool {
        matches!(self, DivergenceKind::BearishRegular | DivergenceKind::BullishRegular)
    }

    /// 1 = buy, 0 = sell or nothing
    pub fn signal_bit(&self) -> u8 {
        if self.is_bullish() { 1 } else { 0 }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DivergenceKind::BearishRegular => "BearishRegular",
            DivergenceKind::BullishRegular => "BullishRegular",
            DivergenceKind::BearishHidden => "BearishHidden",
            DivergenceKind::BullishHidden => "BullishHidden",
            DivergenceKind::NoDivergence => "NoDivergence",
        }
    }
}

impl fmt::Display for DivergenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Tick
// ============================================================================

/// A single price observation from the feed transport
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub price: f64,
    pub timestamp_ms: i64,
    pub volume: f64,
}

impl Tick {
    pub fn new(price: f64, timestamp_ms: i64, volume: f64) -> Self {
        Self { price, timestamp_ms, volume }
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tick(ts={}, price={:.5}, vol={:.2})", self.timestamp_ms, self.price, self.volume)
    }
}

// ============================================================================
// Candle
// ============================================================================

/// OHLCV aggregate over one time bucket.
///
/// A finalized candle is stamped with its bucket's last millisecond; an interim
/// snapshot carries the timestamp of the tick that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(timestamp_ms: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self { timestamp_ms, open, high, low, close, volume }
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }
}

impl fmt::Display for Candle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Candle(ts={}, O={:.5}, H={:.5}, L={:.5}, C={:.5}, V={:.2})",
            self.timestamp_ms, self.open, self.high, self.low, self.close, self.volume
        )
    }
}

/// Element of the aggregator's internal candle stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandleUpdate {
    pub candle: Candle,
    /// true for a finished bucket (or a complete bar from the source),
    /// false for an intra-bucket snapshot
    pub closed: bool,
}

impl CandleUpdate {
    pub fn interim(candle: Candle) -> Self {
        Self { candle, closed: false }
    }

    pub fn closed(candle: Candle) -> Self {
        Self { candle, closed: true }
    }
}

impl fmt::Display for CandleUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = if self.closed { "closed" } else { "interim" };
        write!(f, "{} [{}]", self.candle, tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candle_helpers() {
        let candle = Candle::new(59_999, 100.0, 101.0, 99.5, 100.5, 12.0);
        assert_eq!(candle.range(), 1.5);
        assert!(candle.is_bullish());
    }

    #[test]
    fn test_candle_update_constructors() {
        let candle = Candle::new(1, 1.0, 1.0, 1.0, 1.0, 0.0);
        assert!(!CandleUpdate::interim(candle).closed);
        assert!(CandleUpdate::closed(candle).closed);
    }

    #[test]
    fn test_display_traits() {
        assert_eq!(format!("{}", FeedMode::Live), "live");
        assert_eq!(format!("{}", FeedMode::Simulated), "simulated");
        assert_eq!(format!("{}", FeedState::Running), "Running");
        assert_eq!(format!("{}", ConnectionStatus::Connected), "Connected");
        let tick = Tick::new(1.23456, 42, 0.0);
        assert!(format!("{}", tick).contains("ts=42"));
    }

    #[test]
    fn test_divergence_kind_flags() {
        assert_eq!(DivergenceKind::BullishHidden.signal_bit(), 1);
        assert_eq!(DivergenceKind::BearishRegular.signal_bit(), 0);
        assert_eq!(DivergenceKind::NoDivergence.signal_bit(), 0);
        assert!(DivergenceKind::BullishRegular.is_regular());
        assert!(!DivergenceKind::BearishHidden.is_regular());
        assert_eq!(
            serde_json::to_string(&DivergenceKind::BearishHidden).unwrap(),
            "\"BearishHidden\""
        );
    }

    #[test]
    fn test_now_ms_is_recent() {
        // 2020-01-01 in unix ms
        assert!(now_ms() > 1_577_836_800_000);
    }
}
