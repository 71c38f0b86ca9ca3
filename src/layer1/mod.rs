// Layer 1 - Feed Connectors
// Live websocket transport, sine-wave simulator, credential lookup and the
// websocket stream server for subscribers

pub mod websocket;
pub mod simulator;
pub mod secrets;
pub mod stream_server;

// Re-export commonly used items for convenience
pub use websocket::{
    FrameAction, LiveFeedClient, LiveFeedStats, ReconnectBackoff, TransportError,
    authenticate_message, subscribe_message,
};
pub use simulator::SineWaveSimulator;
pub use secrets::{EnvSecretStore, SecretStore, StaticSecretStore};
pub use stream_server::{StreamServer, StreamServerError, StreamServerStats};
