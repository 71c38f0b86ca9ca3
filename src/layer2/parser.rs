// Feed Message Parser - decodes live feed frames into typed messages
// Malformed frames are rejected and counted; unrelated events are ignored

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::types::{now_ms, Candle};

// ============================================================================
// Parsed Message Types
// ============================================================================

/// Every frame shape the live feed produces
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// Price tick, stamped on receipt
    Price { price: f64, received_ms: i64 },
    /// Complete bar from the source
    Bar(Candle),
    /// Remote error; the connection should be recycled
    Error(String),
    /// Status, heartbeat or any other event without market data
    Ignored(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("Missing or non-numeric field: {0}")]
    MissingField(String),
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

/// Parser statistics
#[derive(Debug, Clone, Default)]
pub struct ParserStats {
    pub messages_parsed: u64,
    pub parse_errors: u64,
    pub validation_failures: u64,
    pub price_count: u64,
    pub bar_count: u64,
    pub error_events: u64,
    pub ignored_count: u64,
}

impl ParserStats {
    pub fn error_rate(&self) -> f64 {
        let total = self.messages_parsed + self.parse_errors;
        if total > 0 {
            self.parse_errors as f64 / total as f64
        } else {
            0.0
        }
    }
}

/// Read a numeric field that may arrive as a JSON number or a numeric string
fn number_field(data: &Value, name: &str) -> Result<f64, ParseError> {
    let value = match data.get(name) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    value
        .filter(|v| v.is_finite())
        .ok_or_else(|| ParseError::MissingField(name.to_string()))
}

// ============================================================================
// FeedMessageParser - stateful parser with validation & stats
// ============================================================================

pub struct FeedMessageParser {
    symbol: String,
    pub stats: ParserStats,
}

impl FeedMessageParser {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            stats: ParserStats::default(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Parse one frame, updating stats
    pub fn parse(&mut self, raw_json: &str) -> Result<FeedMessage, ParseError> {
        match self.decode(raw_json) {
            Ok(message) => {
                self.stats.messages_parsed += 1;
                match &message {
                    FeedMessage::Price { .. } => self.stats.price_count += 1,
                    FeedMessage::Bar(_) => self.stats.bar_count += 1,
                    FeedMessage::Error(_) => self.stats.error_events += 1,
                    FeedMessage::Ignored(_) => self.stats.ignored_count += 1,
                }
                Ok(message)
            }
            Err(e) => {
                match e {
                    ParseError::ValidationFailed(_) => self.stats.validation_failures += 1,
                    _ => self.stats.parse_errors += 1,
                }
                debug!(error = %e, "Dropping feed frame");
                Err(e)
            }
        }
    }

    fn decode(&self, raw_json: &str) -> Result<FeedMessage, ParseError> {
        let data: Value = serde_json::from_str(raw_json).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

        let Some(event) = data.get("event").and_then(|v| v.as_str()) else {
            return Ok(FeedMessage::Ignored(String::new()));
        };

        match event {
            "price" => {
                self.check_symbol(&data)?;
                let price = number_field(&data, "price")?;
                Ok(FeedMessage::Price { price, received_ms: now_ms() })
            }
            "bar" => {
                self.check_symbol(&data)?;
                let bar = data.get("bar").ok_or_else(|| ParseError::MissingField("bar".to_string()))?;
                let volume = match bar.get("volume") {
                    Some(_) => number_field(bar, "volume")?,
                    None => 0.0,
                };
                Ok(FeedMessage::Bar(Candle {
                    timestamp_ms: number_field(bar, "timestamp")? as i64,
                    open: number_field(bar, "open")?,
                    high: number_field(bar, "high")?,
                    low: number_field(bar, "low")?,
                    close: number_field(bar, "close")?,
                    volume,
                }))
            }
            "error" => {
                let message = data
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unspecified feed error")
                    .to_string();
                warn!(message = %message, "Feed reported an error");
                Ok(FeedMessage::Error(message))
            }
            other => Ok(FeedMessage::Ignored(other.to_string())),
        }
    }

    /// Frames naming a different instrument are rejected
    fn check_symbol(&self, data: &Value) -> Result<(), ParseError> {
        if let Some(sym) = data.get("symbol").and_then(|v| v.as_str()) {
            if !sym.eq_ignore_ascii_case(&self.symbol) {
                return Err(ParseError::ValidationFailed(format!(
                    "Symbol mismatch: expected {}, got {}",
                    self.symbol, sym
                )));
            }
        }
        Ok(())
    }
}
