// Feed Aggregator - single entry point for candles, live or simulated
// Owns the background transport task and the channel it writes into

use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::core::config::FeedConfig;
use crate::core::types::{CandleUpdate, ConnectionStatus, FeedMode, FeedState, Tick};
use crate::layer1::secrets::SecretStore;
use crate::layer1::simulator::SineWaveSimulator;
use crate::layer1::websocket::{FrameAction, LiveFeedClient, LiveFeedStats};
use crate::layer2::candle_builder::{CandleBuilder, CandleBuilderStats};
use crate::layer2::parser::{FeedMessage, FeedMessageParser, ParserStats};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Candle stream already taken")]
    StreamTaken,
}

/// Aggregator statistics
#[derive(Debug, Clone, Default)]
pub struct FeedStats {
    pub symbol: String,
    pub timeframe: String,
    pub mode: Option<FeedMode>,
    pub state: String,
    pub starts: u64,
    pub closed_emitted: u64,
    pub interim_emitted: u64,
    /// Updates older than the last one emitted, never forwarded
    pub stale_dropped: u64,
    pub last_emitted_ms: Option<i64>,
    pub connection: Option<ConnectionStatus>,
    pub parser: Option<ParserStats>,
    pub builder: Option<CandleBuilderStats>,
    pub live: Option<LiveFeedStats>,
}

impl fmt::Display for FeedStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = self.mode.map(|m| m.to_string()).unwrap_or_else(|| "none".to_string());
        write!(
            f,
            "Feed(symbol={}, tf={}, mode={}, state={}, closed={}, interim={}, stale={})",
            self.symbol,
            self.timeframe,
            mode,
            self.state,
            self.closed_emitted,
            self.interim_emitted,
            self.stale_dropped
        )
    }
}

#[derive(Default)]
struct EmitCounters {
    closed: u64,
    interim: u64,
    stale: u64,
    last_ts: Option<i64>,
}

/// Counts and forwards one update; false once the consumer is gone.
/// Updates stamped before the last forwarded one are dropped so the
/// stream stays in timestamp order across reconnects and restarts.
fn emit(tx: &mpsc::UnboundedSender<CandleUpdate>, counters: &Mutex<EmitCounters>, update: CandleUpdate) -> bool {
    {
        let mut c = counters.lock();
        let ts = update.candle.timestamp_ms;
        if let Some(last) = c.last_ts.filter(|last| ts < *last) {
            c.stale += 1;
            debug!(ts, last, "Dropping candle older than the last one emitted");
            return true;
        }
        c.last_ts = Some(ts);
        if update.closed {
            c.closed += 1;
        } else {
            c.interim += 1;
        }
    }
    tx.send(update).is_ok()
}

fn forward(tx: &mpsc::UnboundedSender<CandleUpdate>, counters: &Mutex<EmitCounters>, update: CandleUpdate) -> FrameAction {
    if emit(tx, counters, update) {
        FrameAction::Continue
    } else {
        debug!("Candle consumer gone, stopping live feed");
        FrameAction::Stop
    }
}

pub struct FeedAggregator {
    symbol: String,
    timeframe: String,
    config: FeedConfig,
    secrets: Arc<dyn SecretStore>,

    state: FeedState,
    mode: Option<FeedMode>,
    starts: u64,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,

    tx: mpsc::UnboundedSender<CandleUpdate>,
    rx: Option<mpsc::UnboundedReceiver<CandleUpdate>>,

    counters: Arc<Mutex<EmitCounters>>,
    parser: Arc<Mutex<FeedMessageParser>>,
    builder: Arc<Mutex<CandleBuilder>>,
    live: Arc<RwLock<Option<Arc<LiveFeedClient>>>>,
}

impl FeedAggregator {
    pub fn new(config: FeedConfig, secrets: Arc<dyn SecretStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let symbol = config.symbol.clone();
        let timeframe = config.timeframe.clone();
        Self {
            parser: Arc::new(Mutex::new(FeedMessageParser::new(&symbol))),
            builder: Arc::new(Mutex::new(CandleBuilder::from_timeframe(&timeframe))),
            symbol,
            timeframe,
            config,
            secrets,
            state: FeedState::Idle,
            mode: None,
            starts: 0,
            cancel: None,
            task: None,
            tx,
            rx: Some(rx),
            counters: Arc::new(Mutex::new(EmitCounters::default())),
            live: Arc::new(RwLock::new(None)),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> &str {
        &self.timeframe
    }

    pub fn state(&self) -> FeedState {
        self.state
    }

    /// Mode chosen by the most recent `start`
    pub fn mode(&self) -> Option<FeedMode> {
        self.mode
    }

    pub fn is_running(&self) -> bool {
        self.state == FeedState::Running
    }

    /// Hand the candle stream to its single consumer
    pub fn take_stream(&mut self) -> Result<mpsc::UnboundedReceiver<CandleUpdate>, FeedError> {
        self.rx.take().ok_or(FeedError::StreamTaken)
    }

    /// Next update, for callers that did not take the stream
    pub async fn recv(&mut self) -> Result<Option<CandleUpdate>, FeedError> {
        let rx = self.rx.as_mut().ok_or(FeedError::StreamTaken)?;
        Ok(rx.recv().await)
    }

    /// Launch the live client when a credential exists, else the simulator.
    /// No-op while already running.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }

        let credential = if self.config.force_simulation {
            None
        } else {
            self.secrets.get_secret(&self.config.api_key_secret)
        };

        let cancel = CancellationToken::new();
        let task = match credential {
            Some(api_key) => {
                self.mode = Some(FeedMode::Live);
                self.spawn_live(cancel.clone(), &api_key)
            }
            None => {
                self.mode = Some(FeedMode::Simulated);
                self.spawn_simulator(cancel.clone())
            }
        };

        self.cancel = Some(cancel);
        self.task = Some(task);
        self.state = FeedState::Running;
        self.starts += 1;

        info!(
            symbol = %self.symbol,
            timeframe = %self.timeframe,
            mode = %self.mode.unwrap_or(FeedMode::Simulated),
            "Feed aggregator started"
        );
    }

    fn spawn_simulator(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let last_ts = self.counters.lock().last_ts;
        let mut simulator = SineWaveSimulator::resume_after(&self.config, last_ts);
        let tx = self.tx.clone();
        let counters = Arc::clone(&self.counters);

        tokio::spawn(async move {
            simulator.run(cancel, move |update| emit(&tx, &counters, update)).await;
        })
    }

    fn spawn_live(&self, cancel: CancellationToken, api_key: &str) -> JoinHandle<()> {
        let client = Arc::new(LiveFeedClient::from_config(&self.config, &self.symbol, api_key));
        *self.live.write() = Some(Arc::clone(&client));

        *self.builder.lock() = CandleBuilder::from_timeframe(&self.timeframe);
        let parser = Arc::clone(&self.parser);
        let builder = Arc::clone(&self.builder);
        let tx = self.tx.clone();
        let counters = Arc::clone(&self.counters);

        tokio::spawn(async move {
            client
                .run(cancel, move |text| {
                    let parsed = parser.lock().parse(text);
                    match parsed {
                        Ok(FeedMessage::Price { price, received_ms }) => {
                            let update = builder.lock().on_tick(Tick::new(price, received_ms, 0.0));
                            match update {
                                Some(update) => forward(&tx, &counters, update),
                                None => FrameAction::Continue,
                            }
                        }
                        Ok(FeedMessage::Bar(candle)) => forward(&tx, &counters, CandleUpdate::closed(candle)),
                        Ok(FeedMessage::Error(message)) => FrameAction::Reconnect(message),
                        Ok(FeedMessage::Ignored(_)) | Err(_) => FrameAction::Continue,
                    }
                })
                .await;
        })
    }

    /// Cancel the background task and wait for it to finish
    pub async fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "Feed task ended abnormally");
            }
        }
        if self.state == FeedState::Running {
            self.state = FeedState::Stopped;
            info!(symbol = %self.symbol, "Feed aggregator stopped");
        }
    }

    pub fn get_stats(&self) -> FeedStats {
        let counters = self.counters.lock();
        let live = self.live.read().clone();
        let is_live = self.mode == Some(FeedMode::Live);
        FeedStats {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe.clone(),
            mode: self.mode,
            state: self.state.to_string(),
            starts: self.starts,
            closed_emitted: counters.closed,
            interim_emitted: counters.interim,
            stale_dropped: counters.stale,
            last_emitted_ms: counters.last_ts,
            connection: live.as_ref().map(|c| c.status()),
            parser: is_live.then(|| self.parser.lock().stats.clone()),
            builder: is_live.then(|| self.builder.lock().get_stats()),
            live: live.as_ref().map(|c| c.get_stats()),
        }
    }
}

impl Drop for FeedAggregator {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}
