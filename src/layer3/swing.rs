// Swing Detector - strict local extrema under a symmetric lookback window

use serde::Serialize;
use std::fmt;

use crate::layer3::common::error::{AnalysisError, AnalysisResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SwingKind {
    High,
    Low,
}

impl fmt::Display for SwingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwingKind::High => write!(f, "high"),
            SwingKind::Low => write!(f, "low"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Swing {
    pub index: usize,
    pub value: f64,
    pub kind: SwingKind,
}

impl fmt::Display for Swing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Swing({} @ {} = {:.5})", self.kind, self.index, self.value)
    }
}

/// Find swing highs and lows in index order.
///
/// Index `i` qualifies when its value is strictly above (high) or strictly below
/// (low) every one of the `lookback` neighbours on each side. Equal neighbours
/// disqualify, so plateaus never produce swings.
pub fn detect_swings(values: &[f64], lookback: usize) -> AnalysisResult<Vec<Swing>> {
    if lookback < 1 {
        return Err(AnalysisError::invalid("lookback must be >= 1"));
    }

    let n = values.len();
    let mut swings = Vec::new();
    if n <= 2 * lookback {
        return Ok(swings);
    }

    for i in lookback..(n - lookback) {
        let value = values[i];
        let neighbours = values[i - lookback..i].iter().chain(values[i + 1..=i + lookback].iter());

        let (mut is_high, mut is_low) = (true, true);
        for other in neighbours {
            is_high &= value > *other;
            is_low &= value < *other;
            if !is_high && !is_low {
                break;
            }
        }

        if is_high {
            swings.push(Swing { index: i, value, kind: SwingKind::High });
        } else if is_low {
            swings.push(Swing { index: i, value, kind: SwingKind::Low });
        }
    }
    Ok(swings)
}

/// The last two swings of the given kind, oldest first
pub fn last_two(swings: &[Swing], kind: SwingKind) -> Option<(Swing, Swing)> {
    let mut matching = swings.iter().rev().filter(|s| s.kind == kind);
    let latest = *matching.next()?;
    let previous = *matching.next()?;
    Some((previous, latest))
}
