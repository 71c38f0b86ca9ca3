// Sine Wave Simulator - synthetic candle source used when no live credential exists

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::config::FeedConfig;
use crate::core::types::{now_ms, Candle, CandleUpdate};

const WICK: f64 = 0.2;
const BASE_VOLUME: f64 = 1000.0;
const VOLUME_SWING: f64 = 100.0;

/// Deterministic candle generator: one bar per step, one degree of phase per step
#[derive(Debug, Clone)]
pub struct SineWaveSimulator {
    base: f64,
    amplitude: f64,
    step_ms: i64,
    step_delay: Duration,
    step: u64,
    last_close: f64,
    next_ts: i64,
}

impl SineWaveSimulator {
    pub fn new(base: f64, amplitude: f64, step_ms: i64, step_delay: Duration, start_ts: i64) -> Self {
        Self {
            base,
            amplitude,
            step_ms,
            step_delay,
            step: 0,
            last_close: base,
            next_ts: start_ts,
        }
    }

    /// Simulator starting at the current wall-clock second
    pub fn from_config(cfg: &FeedConfig) -> Self {
        Self::resume_after(cfg, None)
    }

    /// Simulator whose first bar lands one step after `last_ts`, or at the
    /// current wall-clock second when that is later
    pub fn resume_after(cfg: &FeedConfig, last_ts: Option<i64>) -> Self {
        let now = (now_ms() / 1000) * 1000;
        let start = match last_ts {
            Some(last) => now.max(last.saturating_add(cfg.sim_step_ms)),
            None => now,
        };
        Self::new(
            cfg.sim_base_price,
            cfg.sim_amplitude,
            cfg.sim_step_ms,
            Duration::from_millis(cfg.sim_step_delay_ms),
            start,
        )
    }

    pub fn steps_taken(&self) -> u64 {
        self.step
    }

    /// Produce the next bar and advance
    pub fn next_candle(&mut self) -> Candle {
        let angle = ((self.step % 360) as f64).to_radians();
        let close = self.base + self.amplitude * angle.sin();
        let candle = Candle {
            timestamp_ms: self.next_ts,
            open: self.last_close,
            high: self.last_close.max(close) + WICK,
            low: self.last_close.min(close) - WICK,
            close,
            volume: BASE_VOLUME + VOLUME_SWING * angle.cos(),
        };

        self.last_close = close;
        self.next_ts += self.step_ms;
        self.step += 1;
        candle
    }

    /// Emit closed bars until cancelled or `emit` returns false
    pub async fn run<F>(&mut self, cancel: CancellationToken, mut emit: F)
    where
        F: FnMut(CandleUpdate) -> bool + Send,
    {
        info!(base = self.base, amplitude = self.amplitude, step_ms = self.step_ms, "Simulator started");

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let candle = self.next_candle();
            if !emit(CandleUpdate::closed(candle)) {
                debug!("Candle consumer gone, stopping simulator");
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.step_delay) => {}
            }
        }

        info!(steps = self.step, "Simulator stopped");
    }
}
