use crate::layer3::common::error::{ensure_positive, AnalysisResult};

/// Exponential moving average over a whole series.
///
/// Seeded with the first element, which is never reported. Values appear from
/// index `period - 1` onward.
pub fn ema(series: &[f64], period: usize) -> AnalysisResult<Vec<Option<f64>>> {
    ensure_positive("period", period)?;

    let mut out = vec![None; series.len()];
    let mut iter = series.iter();
    let mut value = match iter.next() {
        Some(first) => *first,
        None => return Ok(out),
    };

    let k = 2.0 / (period as f64 + 1.0);
    for (i, price) in iter.enumerate().map(|(i, p)| (i + 1, *p)) {
        value = (price - value) * k + value;
        if i + 1 >= period {
            out[i] = Some(value);
        }
    }
    Ok(out)
}
