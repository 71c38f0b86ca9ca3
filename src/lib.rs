// Divergence Bot - streaming candle aggregation and divergence signalling
//
// core:   shared types, configuration, logging, broadcast hub
// layer1: feed connectors (websocket transport, simulator, secret retrieval)
// layer2: feed processing (parser, candle builder, feed aggregator, pipeline driver)
// layer3: analytics (indicators, swing/divergence detection, signal engine)

pub mod core;
pub mod layer1;
pub mod layer2;
pub mod layer3;
