// Indicator Library - pure series functions over price data
// Every function returns a series the same length as its input, None before warm-up

pub mod ema;
pub mod rsi;
pub mod macd;
pub mod stochastic;
pub mod cci;
pub mod atr;

pub use ema::ema;
pub use rsi::rsi;
pub use macd::macd_histogram;
pub use stochastic::{stochastic, StochasticSeries};
pub use cci::cci;
pub use atr::atr;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::config::IndicatorConfig;
use crate::layer3::common::error::{AnalysisError, AnalysisResult};

/// Indicator series compared against price by the divergence detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorSource {
    #[default]
    Rsi,
    MacdHistogram,
    Cci,
    StochasticK,
}

impl IndicatorSource {
    /// Compute the selected indicator over closed-candle history
    pub fn compute(
        &self,
        closes: &[f64],
        highs: &[f64],
        lows: &[f64],
        cfg: &IndicatorConfig,
    ) -> AnalysisResult<Vec<Option<f64>>> {
        match self {
            IndicatorSource::Rsi => rsi(closes, cfg.rsi_period),
            IndicatorSource::MacdHistogram => {
                macd_histogram(closes, cfg.macd_fast, cfg.macd_slow, cfg.macd_signal)
            }
            IndicatorSource::Cci => cci(highs, lows, closes, cfg.cci_period),
            IndicatorSource::StochasticK => {
                stochastic(highs, lows, closes, cfg.stoch_k, cfg.stoch_d).map(|s| s.k)
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorSource::Rsi => "rsi",
            IndicatorSource::MacdHistogram => "macd_histogram",
            IndicatorSource::Cci => "cci",
            IndicatorSource::StochasticK => "stochastic_k",
        }
    }
}

impl FromStr for IndicatorSource {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rsi" => Ok(IndicatorSource::Rsi),
            "macd_histogram" | "macd" => Ok(IndicatorSource::MacdHistogram),
            "cci" => Ok(IndicatorSource::Cci),
            "stochastic_k" | "stoch_k" => Ok(IndicatorSource::StochasticK),
            other => Err(AnalysisError::invalid(format!("unknown indicator source '{}'", other))),
        }
    }
}

impl fmt::Display for IndicatorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest defined value of every indicator, for logging alongside signals
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    pub rsi: Option<f64>,
    pub ema: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub stochastic_k: Option<f64>,
    pub stochastic_d: Option<f64>,
    pub cci: Option<f64>,
    pub atr: Option<f64>,
}

impl IndicatorSnapshot {
    pub fn compute(closes: &[f64], highs: &[f64], lows: &[f64], cfg: &IndicatorConfig) -> AnalysisResult<Self> {
        let last = |series: Vec<Option<f64>>| series.last().copied().flatten();
        let stoch = stochastic(highs, lows, closes, cfg.stoch_k, cfg.stoch_d)?;

        Ok(Self {
            rsi: last(rsi(closes, cfg.rsi_period)?),
            ema: last(ema(closes, cfg.ema_period)?),
            macd_histogram: last(macd_histogram(closes, cfg.macd_fast, cfg.macd_slow, cfg.macd_signal)?),
            stochastic_k: last(stoch.k),
            stochastic_d: last(stoch.d),
            cci: last(cci(highs, lows, closes, cfg.cci_period)?),
            atr: last(atr(highs, lows, closes, cfg.atr_period)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_parsing() {
        assert_eq!("rsi".parse::<IndicatorSource>().unwrap(), IndicatorSource::Rsi);
        assert_eq!("MACD_HISTOGRAM".parse::<IndicatorSource>().unwrap(), IndicatorSource::MacdHistogram);
        assert_eq!("stochastic_k".parse::<IndicatorSource>().unwrap(), IndicatorSource::StochasticK);
        assert!("volume".parse::<IndicatorSource>().is_err());
        assert_eq!(IndicatorSource::default().to_string(), "rsi");
    }

    #[test]
    fn test_source_compute_lengths() {
        let closes: Vec<f64> = (0..50).map(|i| 100.0 + (i as f64 / 3.0).sin()).collect();
        let highs: Vec<f64> = closes.iter().map(|c| c + 0.5).collect();
        let lows: Vec<f64> = closes.iter().map(|c| c - 0.5).collect();
        let cfg = IndicatorConfig::default();

        for source in [
            IndicatorSource::Rsi,
            IndicatorSource::MacdHistogram,
            IndicatorSource::Cci,
            IndicatorSource::StochasticK,
        ] {
            let series = source.compute(&closes, &highs, &lows, &cfg).unwrap();
            assert_eq!(series.len(), closes.len(), "{}", source);
        }
    }

    #[test]
    fn test_snapshot_short_history() {
        let cfg = IndicatorConfig::default();
        let snap = IndicatorSnapshot::compute(&[1.0, 2.0], &[1.5, 2.5], &[0.5, 1.5], &cfg).unwrap();
        assert_eq!(snap, IndicatorSnapshot::default());
    }
}
