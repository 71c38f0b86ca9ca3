use crate::layer3::common::error::{ensure_positive, ensure_same_len, AnalysisResult};

const CCI_CONSTANT: f64 = 0.015;

/// Commodity Channel Index over the typical price (H+L+C)/3.
/// Zero when the mean absolute deviation is zero.
pub fn cci(high: &[f64], low: &[f64], close: &[f64], period: usize) -> AnalysisResult<Vec<Option<f64>>> {
    ensure_same_len(high, low, close)?;
    ensure_positive("period", period)?;

    let typical: Vec<f64> = high
        .iter()
        .zip(low.iter())
        .zip(close.iter())
        .map(|((h, l), c)| (h + l + c) / 3.0)
        .collect();

    let p = period as f64;
    let mut out = vec![None; typical.len()];
    for (offset, window) in typical.windows(period).enumerate() {
        let i = offset + period - 1;
        let sma = window.iter().sum::<f64>() / p;
        let mean_dev = window.iter().map(|x| (x - sma).abs()).sum::<f64>() / p;
        let denom = CCI_CONSTANT * mean_dev;
        out[i] = Some(if denom == 0.0 { 0.0 } else { (typical[i] - sma) / denom });
    }
    Ok(out)
}
