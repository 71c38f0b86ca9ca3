// Core Module - Foundational types, config, logging, broadcast hub

pub mod types;
pub mod config;
pub mod logger;
pub mod events;

// Re-export commonly used items for convenience
pub use types::*;
pub use config::{
    FeedConfig, IndicatorConfig, DivergenceConfig, BroadcastConfig, StorageConfig, MonitoringConfig,
    ConfigManager, ConfigSummary, ConfigError,
};
pub use logger::setup_logging;
pub use events::{
    BroadcastHub, BroadcastMessage, CandleMessage, HubStatsSnapshot, KeepaliveMessage, SignalPacket,
    SubscriberId, Subscription,
};
