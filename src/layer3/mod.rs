// Layer 3 - Analytics
// Indicators, swing and divergence detection, signal dispatch

// Common utilities
pub mod common;

pub mod indicators;
pub mod swing;
pub mod divergence;
pub mod signal_engine;

pub use common::{AnalysisError, AnalysisResult};
pub use indicators::{IndicatorSnapshot, IndicatorSource};
pub use swing::{detect_swings, Swing, SwingKind};
pub use divergence::{detect_divergence, DivergenceDetector, DivergenceOutcome};
pub use signal_engine::{
    MemorySignalStore, SignalEngine, SignalEngineStats, SignalRow, SignalSink, SinkError, SqliteSignalStore,
};
