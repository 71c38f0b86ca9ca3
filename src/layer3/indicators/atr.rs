use crate::layer3::common::error::{ensure_positive, ensure_same_len, AnalysisResult};

/// Average True Range, seeded with the mean of the first `period` true ranges
/// and Wilder-smoothed afterwards.
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> AnalysisResult<Vec<Option<f64>>> {
    ensure_same_len(high, low, close)?;
    ensure_positive("period", period)?;

    let n = close.len();
    let mut out = vec![None; n];
    if n < period {
        return Ok(out);
    }

    let true_range: Vec<f64> = (0..n)
        .map(|i| {
            let range = high[i] - low[i];
            if i == 0 {
                range
            } else {
                range
                    .max((high[i] - close[i - 1]).abs())
                    .max((low[i] - close[i - 1]).abs())
            }
        })
        .collect();

    let p = period as f64;
    let mut avg = true_range[..period].iter().sum::<f64>() / p;
    out[period - 1] = Some(avg);
    for i in period..n {
        avg = (avg * (p - 1.0) + true_range[i]) / p;
        out[i] = Some(avg);
    }
    Ok(out)
}
