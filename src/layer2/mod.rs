// Layer 2 - Feed Processing
// Frame parsing, tick-to-candle aggregation, feed selection and the pipeline driver

pub mod parser;
pub mod candle_builder;
pub mod feed_aggregator;
pub mod pipeline;
pub mod metrics;

// Re-export commonly used items
pub use parser::{FeedMessage, FeedMessageParser, ParseError, ParserStats};
pub use candle_builder::{bucket_ms_for, CandleBuilder, CandleBuilderStats, DEFAULT_BUCKET_MS};
pub use feed_aggregator::{FeedAggregator, FeedError, FeedStats};
pub use pipeline::{CandleProcessor, PipelineDriver, PipelineError, PipelineState, PipelineStats};
pub use metrics::UnifiedMetrics;
