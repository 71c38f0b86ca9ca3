// Unified Metrics - Collects and formats stats from all pipeline components
// Aggregates existing per-component stats into a single view

use std::fmt;
use tracing::info;

use crate::core::events::HubStatsSnapshot;
use crate::layer2::feed_aggregator::FeedStats;
use crate::layer2::pipeline::PipelineStats;
use crate::layer3::signal_engine::SignalEngineStats;

/// Unified metrics snapshot from all pipeline components
#[derive(Debug, Clone)]
pub struct UnifiedMetrics {
    pub feed: Option<FeedStats>,
    pub pipeline: PipelineStats,
    pub signals: SignalEngineStats,
    pub hub: HubStatsSnapshot,
}

impl UnifiedMetrics {
    pub fn from_stats(
        feed: Option<FeedStats>,
        pipeline: PipelineStats,
        signals: SignalEngineStats,
        hub: HubStatsSnapshot,
    ) -> Self {
        Self { feed, pipeline, signals, hub }
    }

    /// Total frames the live parser accepted
    pub fn total_parsed(&self) -> u64 {
        self.feed
            .as_ref()
            .and_then(|f| f.parser.as_ref())
            .map(|p| p.messages_parsed)
            .unwrap_or(0)
    }

    /// Total errors across all components
    pub fn total_errors(&self) -> u64 {
        let parse_errs = self
            .feed
            .as_ref()
            .and_then(|f| f.parser.as_ref())
            .map(|p| p.parse_errors + p.validation_failures)
            .unwrap_or(0);
        let transport_errs = self
            .feed
            .as_ref()
            .and_then(|f| f.live.as_ref())
            .map(|l| l.connect_failures + l.remote_errors)
            .unwrap_or(0);
        parse_errs + transport_errs + self.pipeline.analysis_errors + self.signals.persist_failures
    }

    /// Print detailed multi-line report
    pub fn print_report(&self) {
        info!("=== UNIFIED METRICS ===");

        if let Some(feed) = &self.feed {
            let mode = feed.mode.map(|m| m.to_string()).unwrap_or_else(|| "none".to_string());
            info!("  Feed:         {} {} mode={} state={} closed={} interim={} stale={}",
                feed.symbol, feed.timeframe, mode, feed.state, feed.closed_emitted, feed.interim_emitted,
                feed.stale_dropped);

            if let Some(live) = &feed.live {
                let status = feed.connection.map(|s| s.to_string()).unwrap_or_default();
                info!("  Transport:    status={} connects={} failures={} remote_errs={} frames={}",
                    status, live.connects, live.connect_failures, live.remote_errors, live.frames_received);
            }
            if let Some(p) = &feed.parser {
                info!("  Parser:       parsed={} errs={} invalid={} prices={} bars={} ignored={}",
                    p.messages_parsed, p.parse_errors, p.validation_failures,
                    p.price_count, p.bar_count, p.ignored_count);
            }
            if let Some(b) = &feed.builder {
                info!("  Candles:      ticks={} closed={} late={}",
                    b.ticks_processed, b.candles_closed, b.late_ticks_dropped);
            }
        }

        let last = self.pipeline.last_outcome
            .map(|o| o.to_string())
            .unwrap_or_else(|| "-".to_string());
        info!("  Pipeline:     closed={} history={} analyses={} divergences={} errs={} last={}",
            self.pipeline.closed_candles, self.pipeline.history_len, self.pipeline.analyses_run,
            self.pipeline.divergences_found, self.pipeline.analysis_errors, last);

        info!("  Signals:      emitted={} persisted={} persist_fail={} delivered={}",
            self.signals.signals_emitted, self.signals.persisted,
            self.signals.persist_failures, self.signals.broadcast_deliveries);

        info!("  Hub:          subscribers={} broadcasts={} delivered={} evicted={} pruned={}",
            self.hub.subscriber_count, self.hub.total_broadcasts, self.hub.total_delivered,
            self.hub.evicted_slow, self.hub.pruned_closed);
    }

    /// Print compact single-line stats for periodic logging
    pub fn print_compact(&self, elapsed_secs: u64) {
        let closed = self.feed.as_ref().map(|f| f.closed_emitted).unwrap_or(0);
        info!("[{:>3}s] candles={} analyses={} signals={} subs={} | errs={}",
            elapsed_secs, closed, self.pipeline.analyses_run,
            self.signals.signals_emitted, self.hub.subscriber_count, self.total_errors());
    }
}

impl fmt::Display for UnifiedMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnifiedMetrics(signals={}, errors={})", self.signals.signals_emitted, self.total_errors())
    }
}
