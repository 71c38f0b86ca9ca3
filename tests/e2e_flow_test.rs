// End-to-End Flow Tests for Divergence Bot
//
// These tests exercise the full data pipeline without external network connections:
//   Feed frames → Layer 2 (Parser → CandleBuilder) → Layer 3 (Indicators → Divergence)
//   → SignalEngine (SQLite) → BroadcastHub subscribers → StreamServer clients
//
// The live path and the stream server run against local sockets on 127.0.0.1.
//
// Run with: cargo test --test e2e_flow_test

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;

use divergence_bot::core::{
    BroadcastHub, BroadcastMessage, Candle, CandleMessage, CandleUpdate, ConfigManager, DivergenceConfig,
    DivergenceKind, FeedConfig, FeedMode, IndicatorConfig, SignalPacket, Tick,
};
use divergence_bot::layer1::{StaticSecretStore, StreamServer};
use divergence_bot::layer2::{
    CandleBuilder, CandleProcessor, FeedAggregator, FeedMessage, FeedMessageParser, PipelineDriver, PipelineState,
};
use divergence_bot::layer3::{DivergenceOutcome, MemorySignalStore, SignalEngine, SignalSink, SqliteSignalStore};

// ============================================================================
// Helpers
// ============================================================================

const T0: i64 = 1_700_000_040_000;

fn bar_json(symbol: &str, ts: i64, close: f64) -> String {
    format!(
        r#"{{"event":"bar","symbol":"{symbol}","bar":{{"timestamp":{ts},"open":{open},"high":{high},"low":{low},"close":{close},"volume":10}}}}"#,
        symbol = symbol,
        ts = ts,
        open = close - 0.1,
        high = close + 0.2,
        low = close - 0.2,
        close = close,
    )
}

/// Sine closes with dips at 920 and 960, high/low bracket the previous close
fn fixture_candles() -> Vec<Candle> {
    let mut prev = 100.0_f64;
    (0..1000usize)
        .map(|i| {
            let mut close = 100.0 + 5.0 * ((i % 360) as f64).to_radians().sin();
            if i == 920 {
                close -= 2.0;
            }
            if i == 960 {
                close -= 2.5;
            }
            let candle = Candle::new(
                T0 + i as i64 * 60_000,
                prev,
                prev.max(close) + 0.2,
                prev.min(close) - 0.2,
                close,
                1.0,
            );
            prev = close;
            candle
        })
        .collect()
}

fn write_config(dir: &tempfile::TempDir, feed: serde_json::Value) -> ConfigManager {
    let path = dir.path().join("config.json");
    let body = serde_json::json!({ "feed": feed });
    std::fs::write(&path, body.to_string()).unwrap();
    ConfigManager::new(path.to_str()).unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}

// ============================================================================
// TEST 1 – Core: BroadcastHub fan-out
// ============================================================================

#[tokio::test]
async fn test_hub_delivers_to_every_subscriber_once() {
    let hub = BroadcastHub::new();
    let mut subs: Vec<_> = (0..4).map(|_| hub.subscribe()).collect();

    let candle = Candle::new(T0, 1.0, 2.0, 0.5, 1.5, 3.0);
    let msg = CandleMessage::new("EUR/USD", "1min", &candle);
    assert_eq!(hub.broadcast(msg.into()), 4);

    for sub in subs.iter_mut() {
        match sub.recv().await {
            Some(BroadcastMessage::Candle(c)) => {
                assert_eq!(c.event, "candle");
                assert_eq!(c.ts, T0);
            }
            other => panic!("Expected candle, got {:?}", other),
        }
        assert!(sub.try_recv().is_none(), "Exactly one delivery per subscriber");
    }
}

#[tokio::test]
async fn test_hub_unsubscribed_receives_nothing() {
    let hub = BroadcastHub::new();
    let mut kept = hub.subscribe();
    let mut gone = hub.subscribe();
    assert!(hub.unsubscribe(gone.id()));

    let candle = Candle::new(T0, 1.0, 1.0, 1.0, 1.0, 0.0);
    let delivered = hub.broadcast(CandleMessage::new("EUR/USD", "1min", &candle).into());
    assert_eq!(delivered, 1);
    assert!(kept.try_recv().is_some());
    assert!(gone.try_recv().is_none());
    assert_eq!(hub.subscriber_count(), 1);
}

#[test]
fn test_wire_shapes() {
    let candle = Candle::new(T0, 1.0, 2.0, 0.5, 1.5, 3.0);
    let json = BroadcastMessage::from(CandleMessage::new("EUR/USD", "1min", &candle))
        .to_json()
        .unwrap();
    let v: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(v["event"], "candle");
    assert_eq!(v["tf"], "1min");
    assert_eq!(v["ts"], T0);
    assert_eq!(v["close"], 1.5);
}

// ============================================================================
// TEST 2 – Layer 2: raw price frames → parser → candle builder
// ============================================================================

#[test]
fn test_price_frames_build_candles() {
    let mut parser = FeedMessageParser::new("EUR/USD");
    let mut builder = CandleBuilder::from_timeframe("1min");

    let frames = [
        (T0, r#"{"event":"price","symbol":"EUR/USD","price":100}"#),
        (T0 + 500, r#"{"event":"price","symbol":"EUR/USD","price":"101"}"#),
        (T0 + 700, r#"{"event":"heartbeat"}"#),
        (T0 + 800, r#"{"event":"price","symbol":"EUR/USD"}"#),
        (T0 + 60_000, r#"{"event":"price","symbol":"EUR/USD","price":102}"#),
    ];

    let mut updates = Vec::new();
    for (ts, raw) in frames {
        // stamp with the frame's scripted time instead of the receive clock
        if let Ok(FeedMessage::Price { price, .. }) = parser.parse(raw) {
            updates.extend(builder.on_tick(Tick::new(price, ts, 0.0)));
        }
    }

    let closed: Vec<&CandleUpdate> = updates.iter().filter(|u| u.closed).collect();
    assert_eq!(updates.len(), 3);
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].candle, Candle::new(T0 + 59_999, 100.0, 101.0, 100.0, 101.0, 0.0));

    assert_eq!(parser.stats.price_count, 3);
    assert_eq!(parser.stats.ignored_count, 1);
    assert_eq!(parser.stats.parse_errors, 1);
}

// ============================================================================
// TEST 3 – Layer 3: fixture series through the processor into the signal database
// ============================================================================

#[tokio::test]
async fn test_fixture_series_emits_persisted_signals() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("signals.db");

    let hub = Arc::new(BroadcastHub::with_settings(8192, Duration::from_secs(30)));
    let mut sub = hub.subscribe();
    let sink = Arc::new(SqliteSignalStore::open(&db_path).unwrap());
    let engine = Arc::new(SignalEngine::new("EUR/USD", "1min", sink.clone(), Arc::clone(&hub)));
    let processor = CandleProcessor::new(
        &FeedConfig::default(),
        &IndicatorConfig::default(),
        &DivergenceConfig::default(),
        Arc::clone(&hub),
        Arc::clone(&engine),
    )
    .unwrap();

    let mut state = PipelineState::new(0);
    let mut last_signal = None;
    for candle in fixture_candles() {
        if let Some(packet) = processor.process(&mut state, CandleUpdate::closed(candle)).await {
            last_signal = Some(packet);
        }
    }

    let stats = processor.get_stats();
    assert_eq!(stats.closed_candles, 1000);
    assert_eq!(stats.analyses_run, 999);
    assert_eq!(stats.analysis_errors, 0);

    // final bar: full-history classification
    let last: DivergenceOutcome = stats.last_outcome.unwrap();
    assert_eq!(last.kind, DivergenceKind::BearishRegular);
    assert_eq!(last.score, 2);
    let packet = last_signal.unwrap();
    assert_eq!(packet.divergence_type, DivergenceKind::BearishRegular);
    assert_eq!(packet.signal_bit, 0);

    assert_eq!(sink.name(), "sqlite");
    assert_eq!(sink.count().unwrap(), stats.divergences_found);

    // committed rows are visible to a fresh connection
    let rows = SqliteSignalStore::open(&db_path).unwrap().read_rows().unwrap();
    assert_eq!(rows.len() as u64, stats.divergences_found);
    assert_eq!(rows.first().map(|r| r.id), Some(1));
    assert_eq!(rows.last().map(|r| r.divergence_type.as_str()), Some("BearishRegular"));
    assert_eq!(rows.last().map(|r| r.signal_bit), Some(0));

    let mut candles = 0u64;
    let mut signals = 0u64;
    while let Some(msg) = sub.try_recv() {
        match msg {
            BroadcastMessage::Candle(_) => candles += 1,
            BroadcastMessage::Signal(_) => signals += 1,
            BroadcastMessage::Keepalive(_) => {}
        }
    }
    assert_eq!(candles, 1000);
    assert_eq!(signals, stats.divergences_found);
    assert_eq!(engine.get_stats().persisted, stats.divergences_found);
}

// ============================================================================
// TEST 4 – Full flow: live feed from a local websocket server
// ============================================================================

#[tokio::test]
async fn test_live_feed_drives_pipeline() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        let mut handshake = Vec::new();
        for _ in 0..2 {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                handshake.push(text);
            }
        }

        ws.send(Message::Text(r#"{"event":"subscribe-status","status":"ok"}"#.to_string())).await.unwrap();
        for i in 0..3 {
            let frame = bar_json("EUR/USD", T0 + i * 60_000, 100.0 + i as f64);
            ws.send(Message::Text(frame)).await.unwrap();
        }
        ws.send(Message::Text("{not json".to_string())).await.unwrap();

        // hold the connection until the client leaves
        while let Some(Ok(msg)) = ws.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
        handshake
    });

    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir, serde_json::json!({ "ws_url": format!("ws://{}", addr) }));
    let secrets = Arc::new(StaticSecretStore::with_secret("twelve_data_api_key", "test-key"));
    let hub = Arc::new(BroadcastHub::new());
    let engine = Arc::new(SignalEngine::new("EUR/USD", "1min", Arc::new(MemorySignalStore::new()), Arc::clone(&hub)));

    let mut sub = hub.subscribe();
    let mut driver = PipelineDriver::new(&config, secrets, Arc::clone(&hub), engine);
    driver.start().unwrap();

    let mut seen = Vec::new();
    while seen.len() < 3 {
        let next = tokio::time::timeout(Duration::from_secs(5), sub.recv()).await.unwrap();
        if let Some(BroadcastMessage::Candle(c)) = next {
            seen.push(c);
        }
    }
    assert_eq!(seen.iter().map(|c| c.ts).collect::<Vec<_>>(), vec![T0, T0 + 60_000, T0 + 120_000]);
    assert!(seen.iter().all(|c| c.symbol == "EUR/USD" && c.tf == "1min"));

    let metrics = driver.collect_metrics();
    let feed = metrics.feed.clone().unwrap();
    assert_eq!(feed.mode, Some(FeedMode::Live));
    assert_eq!(feed.closed_emitted, 3);
    let parser = feed.parser.unwrap();
    assert_eq!(parser.bar_count, 3);

    driver.stop().await;
    assert_eq!(driver.get_stats().closed_candles, 3);
    let handshake = server.await.unwrap();
    assert!(handshake[0].contains("authenticate"));
    assert!(handshake[0].contains("test-key"));
    assert!(handshake[1].contains("EUR/USD"));
}

// ============================================================================
// TEST 5 – Feed aggregator fallback and restart
// ============================================================================

#[tokio::test]
async fn test_simulator_fallback_and_restart() {
    let cfg = FeedConfig {
        sim_step_delay_ms: 1,
        ..FeedConfig::default()
    };
    let mut feed = FeedAggregator::new(cfg, Arc::new(StaticSecretStore::new()));
    let mut stream = feed.take_stream().unwrap();
    feed.start();
    assert_eq!(feed.mode(), Some(FeedMode::Simulated));

    let mut last = i64::MIN;
    for _ in 0..50 {
        let update = stream.recv().await.unwrap();
        assert!(update.closed);
        assert!(update.candle.timestamp_ms > last);
        last = update.candle.timestamp_ms;
    }
    feed.stop().await;
    assert!(!feed.is_running());

    // everything the first run produced before stopping
    while let Ok(update) = stream.try_recv() {
        assert!(update.candle.timestamp_ms > last);
        last = update.candle.timestamp_ms;
    }

    feed.start();
    assert!(feed.is_running());
    let after_restart = stream.recv().await.unwrap();
    assert!(after_restart.closed);
    assert!(
        after_restart.candle.timestamp_ms > last,
        "timestamps regressed across restart: {} after {}",
        after_restart.candle.timestamp_ms,
        last
    );

    let stats = feed.get_stats();
    assert_eq!(stats.starts, 2);
    assert_eq!(stats.stale_dropped, 0);
    feed.stop().await;
}

// ============================================================================
// TEST 6 – Stream server: hub messages reach websocket clients
// ============================================================================

#[tokio::test]
async fn test_stream_server_relays_hub_messages() {
    let hub = Arc::new(BroadcastHub::with_settings(64, Duration::from_millis(300)));
    let server = Arc::new(StreamServer::bind("127.0.0.1:0", "/ws/stream", Arc::clone(&hub)).await.unwrap());
    let addr = server.local_addr();
    let cancel = CancellationToken::new();
    let serving = tokio::spawn(Arc::clone(&server).serve(cancel.clone()));

    let (mut client, _) = connect_async(format!("ws://{}/ws/stream", addr)).await.unwrap();
    wait_until(|| hub.subscriber_count() == 1).await;

    // next text frame as JSON, skipping keepalives unless asked for one
    async fn next_event<S>(client: &mut S, want_keepalive: bool) -> serde_json::Value
    where
        S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await
                .expect("no frame within 5s")
                .expect("stream ended")
                .expect("websocket error");
            if let Message::Text(text) = frame {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                if (value["event"] == "keepalive") == want_keepalive {
                    return value;
                }
            }
        }
    }

    let candle = Candle::new(T0, 1.0, 2.0, 0.5, 1.5, 3.0);
    assert_eq!(hub.broadcast(CandleMessage::new("EUR/USD", "1min", &candle).into()), 1);
    let v = next_event(&mut client, false).await;
    assert_eq!(v["event"], "candle");
    assert_eq!(v["ts"], T0);
    assert_eq!(v["tf"], "1min");

    let packet = SignalPacket {
        signal_bit: 1,
        timestamp_ms: T0 + 1,
        symbol: "EUR/USD".to_string(),
        timeframe: "1min".to_string(),
        divergence_type: DivergenceKind::BullishRegular,
        score: 3,
    };
    hub.broadcast(BroadcastMessage::Signal(packet));
    let v = next_event(&mut client, false).await;
    assert_eq!(v["divergence_type"], "BullishRegular");
    assert_eq!(v["ts_unix_ms"], T0 + 1);
    assert_eq!(v["signal_bit"], 1);

    // idle connection gets a keepalive
    let v = next_event(&mut client, true).await;
    assert!(v["ts"].as_i64().unwrap() > 0);

    // closing the socket releases the subscription
    client.close(None).await.unwrap();
    wait_until(|| hub.subscriber_count() == 0).await;
    wait_until(|| server.get_stats().active_connections == 0).await;

    let stats = server.get_stats();
    assert_eq!(stats.connections_accepted, 1);
    assert!(stats.messages_sent >= 3);
    assert!(stats.keepalives_sent >= 1);

    cancel.cancel();
    serving.await.unwrap();
}
