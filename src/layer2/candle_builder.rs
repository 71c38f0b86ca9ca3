// Candle Builder - folds price ticks into fixed-width time buckets
// One update per accepted tick: interim while the bucket is open, closed when it rolls

use std::fmt;
use tracing::debug;

use crate::core::types::{Candle, CandleUpdate, Tick};

pub const DEFAULT_BUCKET_MS: i64 = 60_000;

/// Bucket width for a timeframe label of the form `<N>min`.
/// Anything else falls back to one minute.
pub fn bucket_ms_for(timeframe: &str) -> i64 {
    timeframe
        .trim()
        .strip_suffix("min")
        .and_then(|n| n.parse::<i64>().ok())
        .filter(|n| *n > 0)
        .map(|n| n * 60_000)
        .unwrap_or(DEFAULT_BUCKET_MS)
}

#[derive(Debug, Clone)]
struct OpenBucket {
    start_ms: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl OpenBucket {
    fn seeded(start_ms: i64, tick: &Tick) -> Self {
        Self {
            start_ms,
            open: tick.price,
            high: tick.price,
            low: tick.price,
            close: tick.price,
            volume: tick.volume,
        }
    }

    fn absorb(&mut self, tick: &Tick) {
        self.high = self.high.max(tick.price);
        self.low = self.low.min(tick.price);
        self.close = tick.price;
        self.volume += tick.volume;
    }

    fn snapshot(&self, timestamp_ms: i64) -> Candle {
        Candle::new(timestamp_ms, self.open, self.high, self.low, self.close, self.volume)
    }
}

/// Builder statistics
#[derive(Debug, Clone, Default)]
pub struct CandleBuilderStats {
    pub ticks_processed: u64,
    pub interim_emitted: u64,
    pub candles_closed: u64,
    pub late_ticks_dropped: u64,
}

impl fmt::Display for CandleBuilderStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CandleBuilder(ticks={}, interim={}, closed={}, late={})",
            self.ticks_processed, self.interim_emitted, self.candles_closed, self.late_ticks_dropped
        )
    }
}

pub struct CandleBuilder {
    bucket_ms: i64,
    bucket: Option<OpenBucket>,
    stats: CandleBuilderStats,
}

impl CandleBuilder {
    pub fn new(bucket_ms: i64) -> Self {
        Self {
            bucket_ms: bucket_ms.max(1),
            bucket: None,
            stats: CandleBuilderStats::default(),
        }
    }

    pub fn from_timeframe(timeframe: &str) -> Self {
        Self::new(bucket_ms_for(timeframe))
    }

    pub fn bucket_ms(&self) -> i64 {
        self.bucket_ms
    }

    fn bucket_start(&self, ts: i64) -> i64 {
        ts.div_euclid(self.bucket_ms) * self.bucket_ms
    }

    /// Fold one tick. Returns `None` only for ticks older than the open bucket.
    pub fn on_tick(&mut self, tick: Tick) -> Option<CandleUpdate> {
        self.stats.ticks_processed += 1;
        let start = self.bucket_start(tick.timestamp_ms);

        let Some(bucket) = self.bucket.as_mut() else {
            let seeded = OpenBucket::seeded(start, &tick);
            let interim = seeded.snapshot(tick.timestamp_ms);
            self.bucket = Some(seeded);
            self.stats.interim_emitted += 1;
            return Some(CandleUpdate::interim(interim));
        };

        if tick.timestamp_ms < bucket.start_ms {
            self.stats.late_ticks_dropped += 1;
            debug!(ts = tick.timestamp_ms, bucket_start = bucket.start_ms, "Dropping late tick");
            return None;
        }

        if tick.timestamp_ms >= bucket.start_ms + self.bucket_ms {
            let finished = bucket.snapshot(bucket.start_ms + self.bucket_ms - 1);
            *bucket = OpenBucket::seeded(start, &tick);
            self.stats.candles_closed += 1;
            return Some(CandleUpdate::closed(finished));
        }

        bucket.absorb(&tick);
        self.stats.interim_emitted += 1;
        Some(CandleUpdate::interim(bucket.snapshot(tick.timestamp_ms)))
    }

    /// Current state of the open bucket, if any
    pub fn current(&self) -> Option<Candle> {
        self.bucket.as_ref().map(|b| b.snapshot(b.start_ms))
    }

    pub fn reset(&mut self) {
        self.bucket = None;
    }

    pub fn get_stats(&self) -> CandleBuilderStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_040_000;

    #[test]
    fn test_bucket_width() {
        assert_eq!(bucket_ms_for("1min"), 60_000);
        assert_eq!(bucket_ms_for("5min"), 300_000);
        assert_eq!(bucket_ms_for("1m"), 60_000);
        assert_eq!(bucket_ms_for("0min"), 60_000);
        assert_eq!(bucket_ms_for("abc"), 60_000);
    }

    #[test]
    fn test_interim_then_closed() {
        let mut b = CandleBuilder::from_timeframe("1min");

        let first = b.on_tick(Tick::new(100.0, T0, 0.0)).unwrap();
        assert!(!first.closed);
        assert_eq!(first.candle.close, 100.0);

        let second = b.on_tick(Tick::new(101.0, T0 + 500, 0.0)).unwrap();
        assert!(!second.closed);
        assert_eq!(second.candle.timestamp_ms, T0 + 500);
        assert_eq!(second.candle.high, 101.0);

        let rolled = b.on_tick(Tick::new(102.0, T0 + 60_000, 0.0)).unwrap();
        assert!(rolled.closed);
        let bucket_start = (T0 / 60_000) * 60_000;
        assert_eq!(
            rolled.candle,
            Candle::new(bucket_start + 59_999, 100.0, 101.0, 100.0, 101.0, 0.0)
        );

        // new bucket is seeded with the rolling tick
        let open = b.current().unwrap();
        assert_eq!(open.open, 102.0);
        assert_eq!(b.get_stats().candles_closed, 1);
        assert_eq!(b.get_stats().interim_emitted, 2);
    }

    #[test]
    fn test_late_tick_dropped() {
        let mut b = CandleBuilder::new(60_000);
        b.on_tick(Tick::new(100.0, T0 + 60_000, 1.0));
        assert!(b.on_tick(Tick::new(99.0, T0, 1.0)).is_none());
        assert_eq!(b.get_stats().late_ticks_dropped, 1);
        assert_eq!(b.current().unwrap().low, 100.0);
    }

    #[test]
    fn test_volume_accumulates() {
        let mut b = CandleBuilder::new(60_000);
        b.on_tick(Tick::new(1.0, T0, 2.0));
        b.on_tick(Tick::new(2.0, T0 + 1, 3.0));
        let closed = b.on_tick(Tick::new(3.0, T0 + 120_000, 1.0)).unwrap();
        assert_eq!(closed.candle.volume, 5.0);
        assert_eq!(closed.candle.low, 1.0);
    }
}
