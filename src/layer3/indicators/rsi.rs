use crate::layer3::common::error::{ensure_positive, AnalysisResult};

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        100.0
    } else if avg_gain == 0.0 {
        0.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// Relative Strength Index with Wilder smoothing.
///
/// The first value sits at index `period`, built from the simple mean of the
/// deltas `1..=period`.
pub fn rsi(series: &[f64], period: usize) -> AnalysisResult<Vec<Option<f64>>> {
    ensure_positive("period", period)?;

    let n = series.len();
    let mut out = vec![None; n];
    if n <= period {
        return Ok(out);
    }

    let deltas = series.windows(2).map(|w| w[1] - w[0]);
    let (gains, losses): (Vec<f64>, Vec<f64>) = deltas.map(|d| (d.max(0.0), (-d).max(0.0))).unzip();

    let p = period as f64;
    let mut avg_gain = gains[..period].iter().sum::<f64>() / p;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / p;
    out[period] = Some(rsi_value(avg_gain, avg_loss));

    // gains[i - 1] is the delta ending at index i
    for i in (period + 1)..n {
        avg_gain = (avg_gain * (p - 1.0) + gains[i - 1]) / p;
        avg_loss = (avg_loss * (p - 1.0) + losses[i - 1]) / p;
        out[i] = Some(rsi_value(avg_gain, avg_loss));
    }
    Ok(out)
}
