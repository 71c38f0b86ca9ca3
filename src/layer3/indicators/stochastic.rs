use crate::layer3::common::error::{ensure_positive, ensure_same_len, AnalysisResult};

/// %K and %D lines of the stochastic oscillator
#[derive(Debug, Clone, PartialEq)]
pub struct StochasticSeries {
    pub k: Vec<Option<f64>>,
    pub d: Vec<Option<f64>>,
}

/// Stochastic %K over `k_period` bars and its `d_period` simple average %D.
///
/// A flat window (highest high equal to lowest low) reads 50.
pub fn stochastic(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    k_period: usize,
    d_period: usize,
) -> AnalysisResult<StochasticSeries> {
    ensure_same_len(high, low, close)?;
    ensure_positive("k_period", k_period)?;
    ensure_positive("d_period", d_period)?;

    let n = close.len();
    let mut k = vec![None; n];
    for i in (k_period - 1)..n {
        let start = i + 1 - k_period;
        let window_low = low[start..=i].iter().copied().fold(f64::INFINITY, f64::min);
        let window_high = high[start..=i].iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let range = window_high - window_low;
        k[i] = Some(if range == 0.0 {
            50.0
        } else {
            100.0 * (close[i] - window_low) / range
        });
    }

    let mut d = vec![None; n];
    for i in (d_period - 1)..n {
        let window = &k[i + 1 - d_period..=i];
        let sum: Option<f64> = window.iter().copied().sum();
        d[i] = sum.map(|s| s / d_period as f64);
    }

    Ok(StochasticSeries { k, d })
}
