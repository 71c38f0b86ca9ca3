// Divergence Detector - price vs indicator swing comparison with scoring
// Stage 1 compares swing pairs; two fallbacks align the indicator to price swings

use serde::Serialize;
use std::cmp::Reverse;
use std::fmt;

use crate::core::types::DivergenceKind;
use crate::layer3::common::error::{AnalysisError, AnalysisResult};
use crate::layer3::swing::{detect_swings, last_two, Swing, SwingKind};

pub const MAX_SCORE: u8 = 5;
const LONG_SEPARATION: usize = 10;
const AMPLITUDE_STEPS: [(f64, u8); 4] = [(0.01, 2), (0.02, 3), (0.04, 4), (0.08, 5)];

/// Result of one detection pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DivergenceOutcome {
    pub kind: DivergenceKind,
    pub score: u8,
    pub signal_bit: u8,
}

impl DivergenceOutcome {
    pub fn none() -> Self {
        Self { kind: DivergenceKind::NoDivergence, score: 0, signal_bit: 0 }
    }

    fn from_kind(kind: DivergenceKind, score: u8) -> Self {
        Self { kind, score, signal_bit: kind.signal_bit() }
    }

    pub fn is_divergence(&self) -> bool {
        self.kind != DivergenceKind::NoDivergence
    }
}

impl fmt::Display for DivergenceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (score={}, bit={})", self.kind, self.score, self.signal_bit)
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    kind: DivergenceKind,
    score: u8,
}

// ============================================================================
// Scoring helpers
// ============================================================================

/// |a - b| / |b|, with the denominator taken as 1 when b is zero
pub fn relative_change(a: f64, b: f64) -> f64 {
    let denom = if b == 0.0 { 1.0 } else { b.abs() };
    (a - b).abs() / denom
}

/// Map combined amplitude and swing separation onto 1..=5
pub fn score(amplitude: f64, separation: usize) -> u8 {
    let mut score = 1;
    for (threshold, step) in AMPLITUDE_STEPS {
        if amplitude >= threshold {
            score = step;
        }
    }
    if separation >= LONG_SEPARATION {
        score += 1;
    }
    score.min(MAX_SCORE)
}

/// Replace missing indicator values with the last defined one (0.0 before any)
pub fn forward_fill(indicator: &[Option<f64>]) -> Vec<f64> {
    let mut last = 0.0;
    indicator
        .iter()
        .map(|v| {
            if let Some(x) = v {
                last = *x;
            }
            last
        })
        .collect()
}

/// Strict classification table for a pair of swings of one kind
fn classify(kind: SwingKind, p1: f64, p2: f64, i1: f64, i2: f64) -> Option<DivergenceKind> {
    match kind {
        SwingKind::High if p2 > p1 && i2 < i1 => Some(DivergenceKind::BearishRegular),
        SwingKind::High if p2 < p1 && i2 > i1 => Some(DivergenceKind::BearishHidden),
        SwingKind::Low if p2 < p1 && i2 > i1 => Some(DivergenceKind::BullishRegular),
        SwingKind::Low if p2 > p1 && i2 < i1 => Some(DivergenceKind::BullishHidden),
        _ => None,
    }
}

fn candidate(kind: DivergenceKind, p1: f64, p2: f64, i1: f64, i2: f64, separation: usize) -> Candidate {
    let amplitude = relative_change(p2, p1) + relative_change(i2, i1);
    Candidate { kind, score: score(amplitude, separation) }
}

// ============================================================================
// Divergence Detector
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct DivergenceDetector {
    lookback: usize,
}

impl DivergenceDetector {
    pub fn new(lookback: usize) -> AnalysisResult<Self> {
        if lookback < 1 {
            return Err(AnalysisError::invalid("lookback must be >= 1"));
        }
        Ok(Self { lookback })
    }

    pub fn lookback(&self) -> usize {
        self.lookback
    }

    /// Classify the most recent divergence between `prices` and `indicator`.
    ///
    /// When several patterns qualify, regular beats hidden, then the higher
    /// score wins, then the pattern generated first (highs before lows).
    pub fn detect(&self, prices: &[f64], indicator: &[Option<f64>]) -> AnalysisResult<DivergenceOutcome> {
        if prices.len() != indicator.len() {
            return Err(AnalysisError::invalid(format!(
                "prices and indicator must have same length (got {} and {})",
                prices.len(),
                indicator.len()
            )));
        }

        let filled = forward_fill(indicator);
        let price_swings = detect_swings(prices, self.lookback)?;
        let indicator_swings = detect_swings(&filled, self.lookback)?;

        let mut candidates = self.swing_pairs(&price_swings, &indicator_swings);
        if candidates.is_empty() {
            candidates = self.windowed(&price_swings, &filled);
        }
        if candidates.is_empty() {
            candidates = self.exact_index(&price_swings, &filled);
        }

        let winner = candidates
            .iter()
            .enumerate()
            .min_by_key(|(order, c)| (!c.kind.is_regular(), Reverse(c.score), *order))
            .map(|(_, c)| *c);

        Ok(match winner {
            Some(c) => DivergenceOutcome::from_kind(c.kind, c.score),
            None => DivergenceOutcome::none(),
        })
    }

    /// Last two swings of each kind on both series
    fn swing_pairs(&self, price_swings: &[Swing], indicator_swings: &[Swing]) -> Vec<Candidate> {
        let mut out = Vec::new();
        for kind in [SwingKind::High, SwingKind::Low] {
            let (Some((p1, p2)), Some((q1, q2))) = (last_two(price_swings, kind), last_two(indicator_swings, kind)) else {
                continue;
            };
            if let Some(div) = classify(kind, p1.value, p2.value, q1.value, q2.value) {
                let separation = (p2.index - p1.index).min(q2.index - q1.index);
                out.push(candidate(div, p1.value, p2.value, q1.value, q2.value, separation));
            }
        }
        out
    }

    /// Indicator extreme within +/- lookback of each price swing, lows first
    fn windowed(&self, price_swings: &[Swing], filled: &[f64]) -> Vec<Candidate> {
        let n = filled.len();
        for kind in [SwingKind::Low, SwingKind::High] {
            let Some((p1, p2)) = last_two(price_swings, kind) else {
                continue;
            };

            let window = |index: usize| {
                let start = index.saturating_sub(self.lookback);
                let end = (index + self.lookback + 1).min(n);
                let values = filled[start..end].iter().copied();
                let extreme = match kind {
                    SwingKind::Low => values.fold(f64::INFINITY, f64::min),
                    SwingKind::High => values.fold(f64::NEG_INFINITY, f64::max),
                };
                (extreme, end - start)
            };
            let (i1, _) = window(p1.index);
            let (i2, width) = window(p2.index);

            if let Some(div) = classify(kind, p1.value, p2.value, i1, i2) {
                let separation = (p2.index - p1.index).min(width);
                return vec![candidate(div, p1.value, p2.value, i1, i2, separation)];
            }
        }
        Vec::new()
    }

    /// Indicator at the exact price swing indices, non-strict comparisons
    fn exact_index(&self, price_swings: &[Swing], filled: &[f64]) -> Vec<Candidate> {
        if let Some((p1, p2)) = last_two(price_swings, SwingKind::Low) {
            let (i1, i2) = (filled[p1.index], filled[p2.index]);
            if p2.value <= p1.value && i2 >= i1 {
                let separation = (p2.index - p1.index).max(1);
                return vec![candidate(DivergenceKind::BullishRegular, p1.value, p2.value, i1, i2, separation)];
            }
        }
        if let Some((p1, p2)) = last_two(price_swings, SwingKind::High) {
            let (i1, i2) = (filled[p1.index], filled[p2.index]);
            if p2.value >= p1.value && i2 <= i1 {
                let separation = (p2.index - p1.index).max(1);
                return vec![candidate(DivergenceKind::BearishRegular, p1.value, p2.value, i1, i2, separation)];
            }
        }
        Vec::new()
    }
}

/// One-shot detection with an ad hoc lookback
pub fn detect_divergence(
    prices: &[f64],
    indicator: &[Option<f64>],
    lookback: usize,
) -> AnalysisResult<DivergenceOutcome> {
    DivergenceDetector::new(lookback)?.detect(prices, indicator)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().copied().map(Some).collect()
    }

    #[test]
    fn test_score_thresholds() {
        assert_eq!(score(0.0, 1), 1);
        assert_eq!(score(0.01, 1), 2);
        assert_eq!(score(0.03, 1), 3);
        assert_eq!(score(0.05, 1), 4);
        assert_eq!(score(0.5, 1), 5);
        assert_eq!(score(0.03, 10), 4);
        assert_eq!(score(0.5, 20), 5);
    }

    #[test]
    fn test_relative_change_zero_base() {
        assert_eq!(relative_change(0.5, 0.0), 0.5);
        assert_eq!(relative_change(90.0, 100.0), 0.1);
        assert_eq!(relative_change(-90.0, -100.0), 0.1);
    }

    #[test]
    fn test_forward_fill() {
        let filled = forward_fill(&[None, Some(2.0), None, Some(3.0), None]);
        assert_eq!(filled, vec![0.0, 2.0, 2.0, 3.0, 3.0]);
    }

    #[test]
    fn test_bearish_regular_from_swing_pairs() {
        // price highs 10 -> 12, indicator highs 80 -> 70
        let prices = [5.0, 10.0, 5.0, 12.0, 5.0];
        let indicator = some(&[50.0, 80.0, 50.0, 70.0, 50.0]);
        let out = detect_divergence(&prices, &indicator, 1).unwrap();
        // amplitude 0.2 + 0.125 -> 5
        assert_eq!(out, DivergenceOutcome { kind: DivergenceKind::BearishRegular, score: 5, signal_bit: 0 });
    }

    #[test]
    fn test_bullish_hidden_from_swing_pairs() {
        // price lows 100 -> 100.5, indicator lows 30 -> 29.9
        let prices = [101.0, 100.0, 101.0, 100.5, 101.0];
        let indicator = some(&[40.0, 30.0, 40.0, 29.9, 40.0]);
        let out = detect_divergence(&prices, &indicator, 1).unwrap();
        assert_eq!(out.kind, DivergenceKind::BullishHidden);
        assert_eq!(out.signal_bit, 1);
        // 0.005 + 0.00333 -> below 0.01
        assert_eq!(out.score, 1);
    }

    #[test]
    fn test_regular_beats_hidden() {
        // highs: price 10 -> 12, indicator 80 -> 70 (bearish regular)
        // lows: price 2 -> 3, indicator 20 -> 10 (bullish hidden, larger amplitude)
        let prices = [5.0, 10.0, 2.0, 12.0, 3.0, 6.0];
        let indicator = some(&[50.0, 80.0, 20.0, 70.0, 10.0, 40.0]);
        let out = detect_divergence(&prices, &indicator, 1).unwrap();
        assert_eq!(out.kind, DivergenceKind::BearishRegular);
    }

    #[test]
    fn test_windowed_fallback() {
        // price lows at 1 and 3 (10 -> 9); indicator has no swing lows of its own
        // but its minimum near each price low rises (1 -> 2)
        let prices = [11.0, 10.0, 11.0, 9.0, 11.0];
        let indicator = some(&[1.0, 1.0, 2.0, 2.0, 2.0]);
        let out = detect_divergence(&prices, &indicator, 1).unwrap();
        assert_eq!(out.kind, DivergenceKind::BullishRegular);
        assert_eq!(out.signal_bit, 1);
        // amplitude 0.1 + 1.0 -> 5
        assert_eq!(out.score, 5);
    }

    #[test]
    fn test_exact_index_fallback() {
        // equal price lows and a flat indicator only pass the non-strict comparison
        let prices = [11.0, 10.0, 11.0, 10.0, 11.0];
        let indicator = some(&[5.0; 5]);
        let out = detect_divergence(&prices, &indicator, 1).unwrap();
        assert_eq!(out, DivergenceOutcome { kind: DivergenceKind::BullishRegular, score: 1, signal_bit: 1 });
    }

    #[test]
    fn test_no_divergence() {
        let prices = [1.0, 2.0, 3.0, 4.0, 5.0];
        let out = detect_divergence(&prices, &some(&prices), 1).unwrap();
        assert_eq!(out, DivergenceOutcome::none());
        assert!(!out.is_divergence());
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(detect_divergence(&[1.0, 2.0], &[Some(1.0)], 1).is_err());
        assert!(detect_divergence(&[1.0], &[Some(1.0)], 0).is_err());
        assert!(DivergenceDetector::new(0).is_err());
    }

    #[test]
    fn test_deterministic() {
        let prices: Vec<f64> = (0..200).map(|i| 100.0 + (i as f64 / 7.0).sin() * (1.0 + i as f64 / 100.0)).collect();
        let indicator: Vec<Option<f64>> = (0..200).map(|i| if i < 10 { None } else { Some((i as f64 / 6.0).cos()) }).collect();
        let detector = DivergenceDetector::new(3).unwrap();
        let first = detector.detect(&prices, &indicator).unwrap();
        for _ in 0..5 {
            assert_eq!(detector.detect(&prices, &indicator).unwrap(), first);
        }
    }
}
