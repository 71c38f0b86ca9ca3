// Divergence Bot - process entry point
// Usage: divergence-bot [config.json]

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use divergence_bot::core::config::ConfigManager;
use divergence_bot::core::events::{BroadcastHub, BroadcastMessage};
use divergence_bot::core::logger::setup_logging;
use divergence_bot::layer1::secrets::EnvSecretStore;
use divergence_bot::layer1::stream_server::StreamServer;
use divergence_bot::layer2::pipeline::PipelineDriver;
use divergence_bot::layer3::signal_engine::{MemorySignalStore, SignalEngine, SignalSink, SqliteSignalStore};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1);
    let config = ConfigManager::new(config_path.as_deref()).context("loading configuration")?;

    let monitoring = config.monitoring();
    setup_logging(
        Some(&monitoring.log_level),
        monitoring.log_file.as_deref(),
        Some(monitoring.json_logs),
        Some(monitoring.console_logs),
    );

    config.validate().context("invalid configuration")?;
    let summary = config.get_summary();
    info!(
        symbol = %summary.symbol,
        timeframe = %summary.timeframe,
        source = %summary.divergence_source,
        lookback = summary.lookback,
        "Starting divergence bot"
    );

    let sink: Arc<dyn SignalSink> = match config.storage().signal_db_path {
        Some(path) => Arc::new(
            SqliteSignalStore::open(&path).with_context(|| format!("opening signal database {}", path))?,
        ),
        None => {
            warn!("No signal database configured, signals are kept in memory only");
            Arc::new(MemorySignalStore::new())
        }
    };

    let broadcast = config.broadcast();
    let hub = Arc::new(BroadcastHub::with_settings(
        broadcast.subscriber_capacity,
        Duration::from_secs(broadcast.keepalive_secs),
    ));

    let feed = config.feed();
    let engine = Arc::new(SignalEngine::new(&feed.symbol, &feed.timeframe, sink, Arc::clone(&hub)));
    let mut driver = PipelineDriver::new(&config, Arc::new(EnvSecretStore::new()), Arc::clone(&hub), engine);

    let shutdown = CancellationToken::new();

    let stream_server = StreamServer::from_config(&broadcast, Arc::clone(&hub))
        .await
        .context("binding stream server")?
        .map(Arc::new);
    let server_task = stream_server
        .as_ref()
        .map(|server| tokio::spawn(Arc::clone(server).serve(shutdown.child_token())));

    // Console subscriber: logs every signal packet the hub delivers
    let signal_logger = {
        let mut subscription = hub.subscribe();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    message = subscription.next_or_keepalive() => match message {
                        Some(BroadcastMessage::Signal(packet)) => info!(signal = %packet, "Signal"),
                        Some(_) => {}
                        None => {
                            warn!("Signal logger disconnected from hub");
                            break;
                        }
                    },
                }
            }
        })
    };

    driver.start().context("starting pipeline")?;

    let mut metrics_tick = tokio::time::interval(Duration::from_secs(
        monitoring.metrics_collection_interval_seconds.max(1),
    ));
    metrics_tick.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
            _ = metrics_tick.tick() => {
                let metrics = driver.collect_metrics();
                metrics.print_compact(driver.uptime_secs());
                metrics.print_report();
                if let Some(server) = &stream_server {
                    info!(stream = %server.get_stats(), "Stream server");
                }
            }
        }
    }

    driver.stop().await;
    shutdown.cancel();
    if let Err(e) = signal_logger.await {
        error!(error = %e, "Signal logger ended abnormally");
    }
    if let Some(task) = server_task {
        if let Err(e) = task.await {
            error!(error = %e, "Stream server ended abnormally");
        }
    }

    let metrics = driver.collect_metrics();
    metrics.print_report();
    info!(metrics = %metrics, "Divergence bot stopped");
    Ok(())
}
