// Signal Engine - turns divergence outcomes into persisted, broadcast signal packets
// Persistence failures are logged and counted; the broadcast still goes out

use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::core::events::{BroadcastHub, BroadcastMessage, SignalPacket};
use crate::core::types::{now_ms, DivergenceKind};
use crate::layer3::divergence::DivergenceOutcome;

// ============================================================================
// Persistence Sink
// ============================================================================

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("persist task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("signal rejected: {0}")]
    Rejected(String),
}

/// One stored signal
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalRow {
    pub id: i64,
    pub ts_unix_ms: i64,
    pub symbol: String,
    pub timeframe: String,
    pub divergence_type: String,
    pub score: u8,
    pub signal_bit: u8,
    /// Compact JSON of the packet as broadcast
    pub payload: String,
}

impl SignalRow {
    fn from_packet(id: i64, packet: &SignalPacket) -> Result<Self, SinkError> {
        Ok(Self {
            id,
            ts_unix_ms: packet.timestamp_ms,
            symbol: packet.symbol.clone(),
            timeframe: packet.timeframe.clone(),
            divergence_type: packet.divergence_type.to_string(),
            score: packet.score,
            signal_bit: packet.signal_bit,
            payload: serde_json::to_string(packet)?,
        })
    }
}

/// Durable destination for emitted signals. `persist` may block; the engine
/// calls it from the blocking pool.
pub trait SignalSink: Send + Sync {
    /// Store a packet, returning its row id. Ids increase in insertion order.
    fn persist(&self, packet: &SignalPacket) -> Result<i64, SinkError>;

    fn name(&self) -> &'static str;
}

/// In-process store, mainly for tests and runs without a signal log
#[derive(Debug, Default)]
pub struct MemorySignalStore {
    rows: Mutex<Vec<SignalRow>>,
}

impl MemorySignalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<SignalRow> {
        self.rows.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

impl SignalSink for MemorySignalStore {
    fn persist(&self, packet: &SignalPacket) -> Result<i64, SinkError> {
        let mut rows = self.rows.lock();
        let id = rows.len() as i64 + 1;
        rows.push(SignalRow::from_packet(id, packet)?);
        Ok(id)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

const SIGNALS_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS signals (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ts_unix_ms INTEGER NOT NULL,
        symbol TEXT NOT NULL,
        timeframe TEXT NOT NULL,
        divergence_type TEXT NOT NULL,
        score INTEGER NOT NULL,
        signal_bit INTEGER NOT NULL,
        payload TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_signals_symbol_ts
    ON signals(symbol, timeframe, ts_unix_ms);
"#;

/// `signals` table in a SQLite database
pub struct SqliteSignalStore {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl SqliteSignalStore {
    /// Open or create the database; ids continue after any rows already present
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)?;
        if let Err(e) = conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;") {
            debug!(error = %e, "SQLite pragmas not applied");
        }
        conn.execute_batch(SIGNALS_SCHEMA)?;
        info!(path = %path.display(), "Signal database opened");

        Ok(Self {
            path: Some(path),
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, SinkError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SIGNALS_SCHEMA)?;
        Ok(Self {
            path: None,
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Every stored row, oldest first
    pub fn read_rows(&self) -> Result<Vec<SignalRow>, SinkError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, ts_unix_ms, symbol, timeframe, divergence_type, score, signal_bit, payload
             FROM signals ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SignalRow {
                    id: row.get(0)?,
                    ts_unix_ms: row.get(1)?,
                    symbol: row.get(2)?,
                    timeframe: row.get(3)?,
                    divergence_type: row.get(4)?,
                    score: row.get(5)?,
                    signal_bit: row.get(6)?,
                    payload: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count(&self) -> Result<u64, SinkError> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM signals", [], |row| row.get(0))?;
        Ok(n as u64)
    }
}

impl SignalSink for SqliteSignalStore {
    fn persist(&self, packet: &SignalPacket) -> Result<i64, SinkError> {
        let payload = serde_json::to_string(packet)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO signals (ts_unix_ms, symbol, timeframe, divergence_type, score, signal_bit, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                packet.timestamp_ms,
                packet.symbol,
                packet.timeframe,
                packet.divergence_type.as_str(),
                packet.score,
                packet.signal_bit,
                payload,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

// ============================================================================
// Signal Engine
// ============================================================================

pub struct SignalEngine {
    stream: RwLock<(String, String)>,
    sink: Arc<dyn SignalSink>,
    hub: Arc<BroadcastHub>,
    stats: Arc<RwLock<SignalEngineStats>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SignalEngineStats {
    pub signals_emitted: u64,
    pub persisted: u64,
    pub persist_failures: u64,
    pub broadcast_deliveries: u64,
    pub by_kind: HashMap<String, u64>,
    pub last_signal: Option<SignalPacket>,
}

impl SignalEngine {
    pub fn new(symbol: &str, timeframe: &str, sink: Arc<dyn SignalSink>, hub: Arc<BroadcastHub>) -> Self {
        Self {
            stream: RwLock::new((symbol.to_string(), timeframe.to_string())),
            sink,
            hub,
            stats: Arc::new(RwLock::new(SignalEngineStats::default())),
        }
    }

    /// Point subsequent packets at a different instrument
    pub fn set_stream(&self, symbol: &str, timeframe: &str) {
        *self.stream.write() = (symbol.to_string(), timeframe.to_string());
    }

    pub fn symbol(&self) -> String {
        self.stream.read().0.clone()
    }

    pub fn timeframe(&self) -> String {
        self.stream.read().1.clone()
    }

    /// Persist and broadcast a packet for `outcome`; nothing happens for NoDivergence.
    /// The sink runs on the blocking pool and finishes before the broadcast.
    pub async fn handle_divergence(&self, outcome: &DivergenceOutcome) -> Option<SignalPacket> {
        if outcome.kind == DivergenceKind::NoDivergence {
            return None;
        }

        let packet = {
            let (symbol, timeframe) = &*self.stream.read();
            SignalPacket {
                signal_bit: outcome.signal_bit,
                timestamp_ms: now_ms(),
                symbol: symbol.clone(),
                timeframe: timeframe.clone(),
                divergence_type: outcome.kind,
                score: outcome.score,
            }
        };

        let sink = Arc::clone(&self.sink);
        let row = packet.clone();
        let result = match tokio::task::spawn_blocking(move || sink.persist(&row)).await {
            Ok(result) => result,
            Err(e) => Err(SinkError::from(e)),
        };

        let persisted = match result {
            Ok(id) => {
                info!(
                    id,
                    sink = self.sink.name(),
                    symbol = %packet.symbol,
                    divergence = %packet.divergence_type,
                    score = packet.score,
                    signal_bit = packet.signal_bit,
                    "Signal persisted"
                );
                true
            }
            Err(e) => {
                error!(sink = self.sink.name(), error = %e, "Failed to persist signal, broadcasting anyway");
                false
            }
        };

        let delivered = self.hub.broadcast(BroadcastMessage::Signal(packet.clone()));

        let mut stats = self.stats.write();
        stats.signals_emitted += 1;
        if persisted {
            stats.persisted += 1;
        } else {
            stats.persist_failures += 1;
        }
        stats.broadcast_deliveries += delivered as u64;
        *stats.by_kind.entry(packet.divergence_type.to_string()).or_insert(0) += 1;
        stats.last_signal = Some(packet.clone());

        Some(packet)
    }

    pub fn get_stats(&self) -> SignalEngineStats {
        self.stats.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    impl SignalSink for FailingSink {
        fn persist(&self, _packet: &SignalPacket) -> Result<i64, SinkError> {
            Err(SinkError::Rejected("read-only".to_string()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn bullish(score: u8) -> DivergenceOutcome {
        DivergenceOutcome { kind: DivergenceKind::BullishRegular, score, signal_bit: 1 }
    }

    #[tokio::test]
    async fn test_persist_then_broadcast() {
        let hub = Arc::new(BroadcastHub::new());
        let store = Arc::new(MemorySignalStore::new());
        let engine = SignalEngine::new("EUR/USD", "1min", store.clone(), hub.clone());
        let mut sub = hub.subscribe();

        let packet = engine.handle_divergence(&bullish(3)).await.unwrap();
        assert_eq!(packet.symbol, "EUR/USD");
        assert_eq!(packet.timeframe, "1min");
        assert_eq!(packet.signal_bit, 1);

        let rows = store.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 1);
        assert_eq!(rows[0].divergence_type, "BullishRegular");
        assert!(rows[0].payload.contains("\"ts_unix_ms\""));

        assert_eq!(sub.try_recv(), Some(BroadcastMessage::Signal(packet)));

        let stats = engine.get_stats();
        assert_eq!(stats.signals_emitted, 1);
        assert_eq!(stats.persisted, 1);
        assert_eq!(stats.broadcast_deliveries, 1);
        assert_eq!(stats.by_kind.get("BullishRegular"), Some(&1));
    }

    #[tokio::test]
    async fn test_no_divergence_is_ignored() {
        let hub = Arc::new(BroadcastHub::new());
        let store = Arc::new(MemorySignalStore::new());
        let engine = SignalEngine::new("EUR/USD", "1min", store.clone(), hub.clone());
        let mut sub = hub.subscribe();

        assert!(engine.handle_divergence(&DivergenceOutcome::none()).await.is_none());
        assert!(store.is_empty());
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_persist_failure_still_broadcasts() {
        let hub = Arc::new(BroadcastHub::new());
        let engine = SignalEngine::new("EUR/USD", "1min", Arc::new(FailingSink), hub.clone());
        let mut sub = hub.subscribe();

        assert!(engine.handle_divergence(&bullish(2)).await.is_some());
        assert!(matches!(sub.try_recv(), Some(BroadcastMessage::Signal(_))));

        let stats = engine.get_stats();
        assert_eq!(stats.persist_failures, 1);
        assert_eq!(stats.persisted, 0);
    }

    #[tokio::test]
    async fn test_set_stream() {
        let engine = SignalEngine::new(
            "EUR/USD",
            "1min",
            Arc::new(MemorySignalStore::new()),
            Arc::new(BroadcastHub::new()),
        );
        engine.set_stream("BTC/USD", "5min");
        let packet = engine.handle_divergence(&bullish(1)).await.unwrap();
        assert_eq!((packet.symbol.as_str(), packet.timeframe.as_str()), ("BTC/USD", "5min"));
    }

    fn packet(kind: DivergenceKind, score: u8) -> SignalPacket {
        SignalPacket {
            signal_bit: kind.signal_bit(),
            timestamp_ms: 1_700_000_000_000,
            symbol: "EUR/USD".to_string(),
            timeframe: "1min".to_string(),
            divergence_type: kind,
            score,
        }
    }

    #[test]
    fn test_sqlite_store_persists_rows() {
        let store = SqliteSignalStore::open_in_memory().unwrap();
        assert_eq!(store.persist(&packet(DivergenceKind::BearishHidden, 4)).unwrap(), 1);
        assert_eq!(store.persist(&packet(DivergenceKind::BullishRegular, 2)).unwrap(), 2);

        let rows = store.read_rows().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].divergence_type, "BearishHidden");
        assert_eq!(rows[0].score, 4);
        assert_eq!(rows[1].signal_bit, 1);
        let payload: serde_json::Value = serde_json::from_str(&rows[1].payload).unwrap();
        assert_eq!(payload["divergence_type"], "BullishRegular");
        assert_eq!(payload["tf"], "1min");
        assert_eq!(store.count().unwrap(), 2);
        assert!(store.path().is_none());
    }

    #[test]
    fn test_sqlite_store_resumes_ids_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("signals.db");

        {
            let store = SqliteSignalStore::open(&path).unwrap();
            store.persist(&packet(DivergenceKind::BearishRegular, 2)).unwrap();
            store.persist(&packet(DivergenceKind::BearishRegular, 3)).unwrap();
        }

        let reopened = SqliteSignalStore::open(&path).unwrap();
        assert_eq!(reopened.persist(&packet(DivergenceKind::BullishHidden, 1)).unwrap(), 3);
        let ids: Vec<i64> = reopened.read_rows().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_engine_persists_through_sqlite() {
        let hub = Arc::new(BroadcastHub::new());
        let store = Arc::new(SqliteSignalStore::open_in_memory().unwrap());
        let engine = SignalEngine::new("EUR/USD", "1min", store.clone(), hub.clone());
        let mut sub = hub.subscribe();

        let sent = engine.handle_divergence(&bullish(3)).await.unwrap();
        let rows = store.read_rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ts_unix_ms, sent.timestamp_ms);
        assert_eq!(sub.try_recv(), Some(BroadcastMessage::Signal(sent)));
        assert_eq!(engine.get_stats().persisted, 1);
    }
}
