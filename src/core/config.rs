// Configuration Management for Divergence Bot
// Sectioned settings loaded from JSON with environment overrides

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{info, warn};

use crate::core::types::FeedMode;

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

// ============================================================================
// Configuration Structures
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub symbol: String,
    pub timeframe: String,
    pub ws_url: String,
    /// Name looked up in the secret store for the live feed credential
    pub api_key_secret: String,
    /// Run the simulator even when a credential is available
    pub force_simulation: bool,
    pub ws_ping_interval_secs: u64,

    // Reconnect backoff
    pub backoff_initial_secs: u64,
    pub backoff_max_secs: u64,
    pub backoff_multiplier: u32,

    // Simulator settings
    pub sim_base_price: f64,
    pub sim_amplitude: f64,
    pub sim_step_ms: i64,
    pub sim_step_delay_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            symbol: "EUR/USD".to_string(),
            timeframe: "1min".to_string(),
            ws_url: "wss://ws.twelvedata.com/v1/stream".to_string(),
            api_key_secret: "twelve_data_api_key".to_string(),
            force_simulation: false,
            ws_ping_interval_secs: 30,
            backoff_initial_secs: 1,
            backoff_max_secs: 30,
            backoff_multiplier: 2,
            sim_base_price: 100.0,
            sim_amplitude: 5.0,
            sim_step_ms: 1000,
            sim_step_delay_ms: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub rsi_period: usize,
    pub ema_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub stoch_k: usize,
    pub stoch_d: usize,
    pub cci_period: usize,
    pub atr_period: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            ema_period: 20,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            stoch_k: 14,
            stoch_d: 3,
            cci_period: 20,
            atr_period: 14,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DivergenceConfig {
    pub lookback: usize,
    /// Indicator compared against price: rsi, macd_histogram, cci or stochastic_k
    pub source: String,
    /// Closed candles required before analysis runs
    pub min_candles: usize,
    /// Closed candles kept for analysis; 0 keeps everything
    pub max_history: usize,
}

impl Default for DivergenceConfig {
    fn default() -> Self {
        Self {
            lookback: 5,
            source: "rsi".to_string(),
            min_candles: 2,
            max_history: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub subscriber_capacity: usize,
    pub keepalive_secs: u64,
    /// Address of the websocket stream server; no server when unset
    pub stream_bind_addr: Option<String>,
    /// Upgrade path accepted by the stream server
    pub stream_path: String,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: 1024,
            keepalive_secs: 30,
            stream_bind_addr: Some("127.0.0.1:8000".to_string()),
            stream_path: "/ws/stream".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database holding the `signals` table; in-memory store when unset
    pub signal_db_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub metrics_collection_interval_seconds: u64,
    pub log_level: String,
    pub log_file: Option<String>,
    pub json_logs: bool,
    /// Keep logging to stdout when a log file is configured
    pub console_logs: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_collection_interval_seconds: 60,
            log_level: "INFO".to_string(),
            log_file: None,
            json_logs: false,
            console_logs: true,
        }
    }
}

// ============================================================================
// Configuration Summary
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub symbol: String,
    pub timeframe: String,
    pub requested_mode: FeedMode,
    pub divergence_source: String,
    pub lookback: usize,
    pub log_level: String,
}

// ============================================================================
// Configuration Manager
// ============================================================================

pub struct ConfigManager {
    feed: Arc<RwLock<FeedConfig>>,
    indicators: Arc<RwLock<IndicatorConfig>>,
    divergence: Arc<RwLock<DivergenceConfig>>,
    broadcast: Arc<RwLock<BroadcastConfig>>,
    storage: Arc<RwLock<StorageConfig>>,
    monitoring: Arc<RwLock<MonitoringConfig>>,
}

impl ConfigManager {
    pub fn new(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut manager = Self::with_defaults();

        if let Some(path) = config_path {
            manager.load_from_file(path)?;
        }

        manager.load_from_env();

        info!("Configuration initialized");
        Ok(manager)
    }

    /// Defaults only, no file or environment lookups
    pub fn with_defaults() -> Self {
        Self {
            feed: Arc::new(RwLock::new(FeedConfig::default())),
            indicators: Arc::new(RwLock::new(IndicatorConfig::default())),
            divergence: Arc::new(RwLock::new(DivergenceConfig::default())),
            broadcast: Arc::new(RwLock::new(BroadcastConfig::default())),
            storage: Arc::new(RwLock::new(StorageConfig::default())),
            monitoring: Arc::new(RwLock::new(MonitoringConfig::default())),
        }
    }

    /// Load configuration from JSON file
    pub fn load_from_file(&mut self, config_path: &str) -> Result<(), ConfigError> {
        let path = Path::new(config_path);
        if !path.exists() {
            warn!(path = config_path, "Config file not found");
            return Ok(());
        }

        let content = fs::read_to_string(path)?;
        let config_data: HashMap<String, serde_json::Value> = serde_json::from_str(&content)?;

        if let Some(value) = config_data.get("feed") {
            *self.feed.write() = serde_json::from_value(value.clone())?;
        }
        if let Some(value) = config_data.get("indicators") {
            *self.indicators.write() = serde_json::from_value(value.clone())?;
        }
        if let Some(value) = config_data.get("divergence") {
            *self.divergence.write() = serde_json::from_value(value.clone())?;
        }
        if let Some(value) = config_data.get("broadcast") {
            *self.broadcast.write() = serde_json::from_value(value.clone())?;
        }
        if let Some(value) = config_data.get("storage") {
            *self.storage.write() = serde_json::from_value(value.clone())?;
        }
        if let Some(value) = config_data.get("monitoring") {
            *self.monitoring.write() = serde_json::from_value(value.clone())?;
        }

        info!(path = config_path, "Configuration loaded");
        Ok(())
    }

    /// Apply overrides from environment variables
    pub fn load_from_env(&mut self) {
        if let Ok(symbol) = std::env::var("DIVERGENCEBOT_SYMBOL") {
            self.feed.write().symbol = symbol;
        }
        if let Ok(timeframe) = std::env::var("DIVERGENCEBOT_TIMEFRAME") {
            self.feed.write().timeframe = timeframe;
        }
        if let Ok(simulate) = std::env::var("DIVERGENCEBOT_SIMULATE") {
            self.feed.write().force_simulation = matches!(simulate.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(level) = std::env::var("DIVERGENCEBOT_LOG_LEVEL") {
            self.monitoring.write().log_level = level;
        }
        if let Ok(path) = std::env::var("DIVERGENCEBOT_SIGNAL_DB") {
            self.storage.write().signal_db_path = Some(path);
        }
        if let Ok(addr) = std::env::var("DIVERGENCEBOT_STREAM_ADDR") {
            self.broadcast.write().stream_bind_addr = Some(addr);
        }
    }

    /// Save configuration to JSON file
    pub fn save_to_file(&self, config_path: &str) -> Result<(), ConfigError> {
        let mut config_map = HashMap::new();
        config_map.insert("feed", serde_json::to_value(&*self.feed.read())?);
        config_map.insert("indicators", serde_json::to_value(&*self.indicators.read())?);
        config_map.insert("divergence", serde_json::to_value(&*self.divergence.read())?);
        config_map.insert("broadcast", serde_json::to_value(&*self.broadcast.read())?);
        config_map.insert("storage", serde_json::to_value(&*self.storage.read())?);
        config_map.insert("monitoring", serde_json::to_value(&*self.monitoring.read())?);

        if let Some(parent) = Path::new(config_path).parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(&config_map)?;
        fs::write(config_path, json)?;

        info!(path = config_path, "Configuration saved");
        Ok(())
    }

    /// Validate configuration, returning every problem found in one error
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        let feed = self.feed.read();
        let indicators = self.indicators.read();
        let divergence = self.divergence.read();
        let broadcast = self.broadcast.read();

        if feed.symbol.trim().is_empty() {
            errors.push("feed.symbol must not be empty".to_string());
        }
        if feed.backoff_initial_secs == 0 || feed.backoff_initial_secs > feed.backoff_max_secs {
            errors.push("feed.backoff_initial_secs must be in 1..=backoff_max_secs".to_string());
        }
        if feed.backoff_multiplier < 1 {
            errors.push("feed.backoff_multiplier must be at least 1".to_string());
        }
        if feed.ws_ping_interval_secs == 0 {
            errors.push("feed.ws_ping_interval_secs must be positive".to_string());
        }
        if feed.sim_step_ms <= 0 {
            errors.push("feed.sim_step_ms must be positive".to_string());
        }

        let periods = [
            ("rsi_period", indicators.rsi_period),
            ("ema_period", indicators.ema_period),
            ("macd_fast", indicators.macd_fast),
            ("macd_slow", indicators.macd_slow),
            ("macd_signal", indicators.macd_signal),
            ("stoch_k", indicators.stoch_k),
            ("stoch_d", indicators.stoch_d),
            ("cci_period", indicators.cci_period),
            ("atr_period", indicators.atr_period),
        ];
        for (name, period) in periods {
            if period == 0 {
                errors.push(format!("indicators.{} must be positive", name));
            }
        }
        if indicators.macd_fast >= indicators.macd_slow {
            errors.push("indicators.macd_fast must be less than macd_slow".to_string());
        }

        if divergence.lookback == 0 {
            errors.push("divergence.lookback must be positive".to_string());
        }
        if !matches!(divergence.source.as_str(), "rsi" | "macd" | "macd_histogram" | "cci" | "stoch_k" | "stochastic_k") {
            errors.push(format!("divergence.source '{}' is not supported", divergence.source));
        }
        if divergence.min_candles < 2 {
            errors.push("divergence.min_candles must be at least 2".to_string());
        }
        if divergence.max_history != 0 && divergence.max_history < divergence.min_candles {
            errors.push("divergence.max_history must be 0 or at least min_candles".to_string());
        }

        if broadcast.subscriber_capacity == 0 {
            errors.push("broadcast.subscriber_capacity must be positive".to_string());
        }
        if broadcast.keepalive_secs == 0 {
            errors.push("broadcast.keepalive_secs must be positive".to_string());
        }
        if !broadcast.stream_path.starts_with('/') {
            errors.push("broadcast.stream_path must start with '/'".to_string());
        }
        if let Some(addr) = &broadcast.stream_bind_addr {
            if addr.parse::<std::net::SocketAddr>().is_err() {
                errors.push(format!("broadcast.stream_bind_addr '{}' is not a socket address", addr));
            }
        }

        if !errors.is_empty() {
            for error in &errors {
                warn!(error = %error, "Config validation error");
            }
            return Err(ConfigError::Validation(errors.join("; ")));
        }

        info!("Configuration validated successfully");
        Ok(())
    }

    /// Get configuration summary
    pub fn get_summary(&self) -> ConfigSummary {
        let feed = self.feed.read();
        let divergence = self.divergence.read();
        let monitoring = self.monitoring.read();

        ConfigSummary {
            symbol: feed.symbol.clone(),
            timeframe: feed.timeframe.clone(),
            requested_mode: if feed.force_simulation { FeedMode::Simulated } else { FeedMode::Live },
            divergence_source: divergence.source.clone(),
            lookback: divergence.lookback,
            log_level: monitoring.log_level.clone(),
        }
    }

    // Getters for each config section
    pub fn feed(&self) -> FeedConfig {
        self.feed.read().clone()
    }

    pub fn indicators(&self) -> IndicatorConfig {
        self.indicators.read().clone()
    }

    pub fn divergence(&self) -> DivergenceConfig {
        self.divergence.read().clone()
    }

    pub fn broadcast(&self) -> BroadcastConfig {
        self.broadcast.read().clone()
    }

    pub fn storage(&self) -> StorageConfig {
        self.storage.read().clone()
    }

    pub fn monitoring(&self) -> MonitoringConfig {
        self.monitoring.read().clone()
    }

    /// Switch the streamed instrument, used when the pipeline is reconfigured
    pub fn set_stream(&self, symbol: &str, timeframe: &str) {
        let mut feed = self.feed.write();
        feed.symbol = symbol.to_string();
        feed.timeframe = timeframe.to_string();
    }
}
