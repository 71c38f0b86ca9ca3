use super::ema::ema;
use crate::layer3::common::error::{ensure_positive, AnalysisError, AnalysisResult};

/// MACD histogram: (EMA(fast) - EMA(slow)) minus its signal line.
///
/// The signal EMA runs over the defined MACD values only, so its warm-up starts
/// where the slow EMA becomes available.
pub fn macd_histogram(
    series: &[f64],
    fast: usize,
    slow: usize,
    signal: usize,
) -> AnalysisResult<Vec<Option<f64>>> {
    ensure_positive("fast", fast)?;
    ensure_positive("slow", slow)?;
    ensure_positive("signal", signal)?;
    if fast >= slow {
        return Err(AnalysisError::invalid(format!(
            "fast period ({}) must be less than slow period ({})",
            fast, slow
        )));
    }

    let n = series.len();
    let mut hist = vec![None; n];
    if n == 0 {
        return Ok(hist);
    }

    let ema_fast = ema(series, fast)?;
    let ema_slow = ema(series, slow)?;

    let (positions, macd_line): (Vec<usize>, Vec<f64>) = ema_fast
        .iter()
        .zip(ema_slow.iter())
        .enumerate()
        .filter_map(|(i, pair)| match pair {
            (Some(f), Some(s)) => Some((i, f - s)),
            _ => None,
        })
        .unzip();

    let signal_line = ema(&macd_line, signal)?;
    for ((pos, macd), sig) in positions.iter().zip(macd_line.iter()).zip(signal_line.iter()) {
        hist[*pos] = sig.map(|s| macd - s);
    }
    Ok(hist)
}
