// Pipeline Driver - candle stream -> indicators -> divergence -> signals
// Feed aggregator output is forwarded to subscribers; closed candles are analysed

use parking_lot::RwLock;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::config::{ConfigManager, DivergenceConfig, FeedConfig, IndicatorConfig};
use crate::core::events::{BroadcastHub, BroadcastMessage, CandleMessage, SignalPacket};
use crate::core::types::{Candle, CandleUpdate};
use crate::layer1::secrets::SecretStore;
use crate::layer2::feed_aggregator::{FeedAggregator, FeedError};
use crate::layer2::metrics::UnifiedMetrics;
use crate::layer3::common::error::AnalysisError;
use crate::layer3::divergence::{DivergenceDetector, DivergenceOutcome};
use crate::layer3::indicators::{IndicatorSnapshot, IndicatorSource};
use crate::layer3::signal_engine::SignalEngine;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Analysis setup failed: {0}")]
    Analysis(#[from] AnalysisError),
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),
}

// ============================================================================
// Pipeline State
// ============================================================================

/// Closed-candle history owned by the pipeline task
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    closes: Vec<f64>,
    highs: Vec<f64>,
    lows: Vec<f64>,
    last_timestamp_ms: Option<i64>,
    max_history: usize,
}

impl PipelineState {
    /// `max_history` of 0 keeps every candle
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history,
            ..Self::default()
        }
    }

    pub fn push(&mut self, candle: &Candle) {
        self.closes.push(candle.close);
        self.highs.push(candle.high);
        self.lows.push(candle.low);
        self.last_timestamp_ms = Some(candle.timestamp_ms);

        if self.max_history > 0 && self.closes.len() > self.max_history {
            let excess = self.closes.len() - self.max_history;
            self.closes.drain(..excess);
            self.highs.drain(..excess);
            self.lows.drain(..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.closes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }

    pub fn clear(&mut self) {
        self.closes.clear();
        self.highs.clear();
        self.lows.clear();
        self.last_timestamp_ms = None;
    }

    pub fn closes(&self) -> &[f64] {
        &self.closes
    }

    pub fn highs(&self) -> &[f64] {
        &self.highs
    }

    pub fn lows(&self) -> &[f64] {
        &self.lows
    }

    pub fn last_timestamp_ms(&self) -> Option<i64> {
        self.last_timestamp_ms
    }
}

/// Pipeline statistics
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub symbol: String,
    pub timeframe: String,
    pub is_running: bool,
    pub restarts: u64,
    pub candles_forwarded: u64,
    pub closed_candles: u64,
    pub analyses_run: u64,
    pub divergences_found: u64,
    pub analysis_errors: u64,
    pub history_len: usize,
    pub last_outcome: Option<DivergenceOutcome>,
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pipeline(symbol={}, tf={}, running={}, candles={}, closed={}, divergences={}, errors={})",
            self.symbol,
            self.timeframe,
            self.is_running,
            self.candles_forwarded,
            self.closed_candles,
            self.divergences_found,
            self.analysis_errors
        )
    }
}

// ============================================================================
// Candle Processor - per-update work, shared by the task and tests
// ============================================================================

pub struct CandleProcessor {
    symbol: String,
    timeframe: String,
    source: IndicatorSource,
    indicators: IndicatorConfig,
    detector: DivergenceDetector,
    min_candles: usize,
    hub: Arc<BroadcastHub>,
    engine: Arc<SignalEngine>,
    stats: Arc<RwLock<PipelineStats>>,
}

impl CandleProcessor {
    pub fn new(
        feed: &FeedConfig,
        indicators: &IndicatorConfig,
        divergence: &DivergenceConfig,
        hub: Arc<BroadcastHub>,
        engine: Arc<SignalEngine>,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            symbol: feed.symbol.clone(),
            timeframe: feed.timeframe.clone(),
            source: IndicatorSource::from_str(&divergence.source)?,
            indicators: indicators.clone(),
            detector: DivergenceDetector::new(divergence.lookback)?,
            min_candles: divergence.min_candles.max(2),
            hub,
            engine,
            stats: Arc::new(RwLock::new(PipelineStats {
                symbol: feed.symbol.clone(),
                timeframe: feed.timeframe.clone(),
                ..PipelineStats::default()
            })),
        })
    }

    pub fn source(&self) -> IndicatorSource {
        self.source
    }

    pub fn get_stats(&self) -> PipelineStats {
        self.stats.read().clone()
    }

    /// Forward one update to subscribers and analyse it when it closes a candle
    pub async fn process(&self, state: &mut PipelineState, update: CandleUpdate) -> Option<SignalPacket> {
        self.hub.broadcast(BroadcastMessage::Candle(CandleMessage::new(
            &self.symbol,
            &self.timeframe,
            &update.candle,
        )));
        self.stats.write().candles_forwarded += 1;

        if !update.closed {
            return None;
        }

        state.push(&update.candle);
        {
            let mut stats = self.stats.write();
            stats.closed_candles += 1;
            stats.history_len = state.len();
        }
        if state.len() < self.min_candles {
            return None;
        }

        let outcome = match self.analyse(state) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.stats.write().analysis_errors += 1;
                error!(symbol = %self.symbol, source = %self.source, error = %e, "Analysis failed, skipping candle");
                return None;
            }
        };

        {
            let mut stats = self.stats.write();
            stats.analyses_run += 1;
            stats.last_outcome = Some(outcome);
            if outcome.is_divergence() {
                stats.divergences_found += 1;
            }
        }

        if !outcome.is_divergence() {
            return None;
        }

        if let Ok(snapshot) = IndicatorSnapshot::compute(state.closes(), state.highs(), state.lows(), &self.indicators) {
            debug!(
                rsi = ?snapshot.rsi,
                macd_histogram = ?snapshot.macd_histogram,
                cci = ?snapshot.cci,
                atr = ?snapshot.atr,
                "Indicators at divergence"
            );
        }

        self.engine.handle_divergence(&outcome).await
    }

    fn analyse(&self, state: &PipelineState) -> Result<DivergenceOutcome, AnalysisError> {
        let series = self
            .source
            .compute(state.closes(), state.highs(), state.lows(), &self.indicators)?;
        self.detector.detect(state.closes(), &series)
    }
}

async fn run_pipeline(
    processor: Arc<CandleProcessor>,
    mut stream: mpsc::UnboundedReceiver<CandleUpdate>,
    cancel: CancellationToken,
    max_history: usize,
) {
    let mut state = PipelineState::new(max_history);
    info!(symbol = %processor.symbol, timeframe = %processor.timeframe, source = %processor.source, "Pipeline task started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            update = stream.recv() => match update {
                Some(update) => {
                    processor.process(&mut state, update).await;
                }
                None => {
                    warn!("Candle stream closed");
                    break;
                }
            },
        }
    }

    info!(candles = state.len(), "Pipeline task stopped");
}

// ============================================================================
// Pipeline Driver
// ============================================================================

struct RunningPipeline {
    feed: FeedAggregator,
    processor: Arc<CandleProcessor>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct PipelineDriver {
    feed_config: FeedConfig,
    indicator_config: IndicatorConfig,
    divergence_config: DivergenceConfig,
    secrets: Arc<dyn SecretStore>,
    hub: Arc<BroadcastHub>,
    engine: Arc<SignalEngine>,

    running: Option<RunningPipeline>,
    last_stats: PipelineStats,
    restarts: u64,
    started_at: Option<Instant>,
}

impl PipelineDriver {
    pub fn new(
        config: &ConfigManager,
        secrets: Arc<dyn SecretStore>,
        hub: Arc<BroadcastHub>,
        engine: Arc<SignalEngine>,
    ) -> Self {
        let feed_config = config.feed();
        engine.set_stream(&feed_config.symbol, &feed_config.timeframe);
        Self {
            last_stats: PipelineStats {
                symbol: feed_config.symbol.clone(),
                timeframe: feed_config.timeframe.clone(),
                ..PipelineStats::default()
            },
            feed_config,
            indicator_config: config.indicators(),
            divergence_config: config.divergence(),
            secrets,
            hub,
            engine,
            running: None,
            restarts: 0,
            started_at: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.feed_config.symbol
    }

    pub fn timeframe(&self) -> &str {
        &self.feed_config.timeframe
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn hub(&self) -> Arc<BroadcastHub> {
        Arc::clone(&self.hub)
    }

    /// Start the feed and the pipeline task. No-op while running.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.running.is_some() {
            return Ok(());
        }

        let processor = Arc::new(CandleProcessor::new(
            &self.feed_config,
            &self.indicator_config,
            &self.divergence_config,
            Arc::clone(&self.hub),
            Arc::clone(&self.engine),
        )?);

        let mut feed = FeedAggregator::new(self.feed_config.clone(), Arc::clone(&self.secrets));
        let stream = feed.take_stream()?;
        feed.start();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_pipeline(
            Arc::clone(&processor),
            stream,
            cancel.clone(),
            self.divergence_config.max_history,
        ));

        self.running = Some(RunningPipeline { feed, processor, cancel, task });
        self.started_at = Some(Instant::now());

        info!(
            symbol = %self.feed_config.symbol,
            timeframe = %self.feed_config.timeframe,
            "Pipeline started"
        );
        Ok(())
    }

    /// Stop the pipeline task, then the feed
    pub async fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };

        running.cancel.cancel();
        if let Err(e) = running.task.await {
            error!(error = %e, "Pipeline task ended abnormally");
        }
        running.feed.stop().await;

        self.last_stats = running.processor.get_stats();
        self.last_stats.restarts = self.restarts;
        self.started_at = None;
        info!(stats = %self.last_stats, "Pipeline stopped");
    }

    /// Switch instrument: stop, recreate the feed with fresh state, restart
    pub async fn reconfigure(&mut self, symbol: &str, timeframe: &str) -> Result<(), PipelineError> {
        info!(
            from_symbol = %self.feed_config.symbol,
            to_symbol = symbol,
            to_timeframe = timeframe,
            "Reconfiguring pipeline"
        );

        let was_running = self.is_running();
        self.stop().await;

        self.feed_config.symbol = symbol.to_string();
        self.feed_config.timeframe = timeframe.to_string();
        self.engine.set_stream(symbol, timeframe);
        self.last_stats = PipelineStats {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            ..PipelineStats::default()
        };

        if was_running {
            self.restarts += 1;
        }
        self.start()
    }

    pub fn get_stats(&self) -> PipelineStats {
        match &self.running {
            Some(running) => {
                let mut stats = running.processor.get_stats();
                stats.is_running = true;
                stats.restarts = self.restarts;
                stats
            }
            None => self.last_stats.clone(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Snapshot of every component's stats
    pub fn collect_metrics(&self) -> UnifiedMetrics {
        UnifiedMetrics::from_stats(
            self.running.as_ref().map(|r| r.feed.get_stats()),
            self.get_stats(),
            self.engine.get_stats(),
            self.hub.get_stats(),
        )
    }
}
