// Structured Logging for Divergence Bot
// tracing subscriber setup, installed once per process

use std::fs::{File, OpenOptions};
use std::io;
use std::sync::{Mutex, Once};
use tracing::Level;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::Registry;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

const QUIET_TARGETS: &[&str] = &["tokio_tungstenite=warn", "tungstenite=warn", "rustls=warn"];

/// Map a textual level onto a tracing level, INFO when unrecognised
pub fn parse_level(log_level: &str) -> Level {
    match log_level.to_uppercase().as_str() {
        "TRACE" => Level::TRACE,
        "DEBUG" => Level::DEBUG,
        "INFO" => Level::INFO,
        "WARN" | "WARNING" => Level::WARN,
        "ERROR" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn build_filter(level: Level) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for target in QUIET_TARGETS {
        if let Ok(directive) = target.parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Where log records go once the file, if any, has been opened
#[derive(Debug)]
pub struct LogOutputs {
    pub console: bool,
    pub file: Option<File>,
    /// Path and error of a log file that could not be opened
    pub file_error: Option<(String, io::Error)>,
}

/// Open the log file and settle the outputs. Console output is forced on
/// when nothing else would receive records.
pub fn resolve_outputs(console_output: bool, log_file: Option<&str>) -> LogOutputs {
    let (file, file_error) = match log_file {
        Some(path) => match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => (Some(file), None),
            Err(e) => (None, Some((path.to_string(), e))),
        },
        None => (None, None),
    };

    LogOutputs {
        console: console_output || file.is_none(),
        file,
        file_error,
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Setup structured logging for the entire application.
///
/// Records go to stdout, to `log_file`, or to both when a file is given and
/// console output stays enabled. A log file that cannot be opened is
/// reported as a warning once the subscriber is installed.
pub fn setup_logging(
    log_level: Option<&str>,
    log_file: Option<&str>,
    json_format: Option<bool>,
    console_output: Option<bool>,
) {
    let log_level_str = log_level.unwrap_or("INFO");
    let json_format = json_format.unwrap_or(true);
    let console_output = console_output.unwrap_or(true);
    let level = parse_level(log_level_str);

    INIT.call_once(|| {
        let outputs = resolve_outputs(console_output, log_file);
        let mut layers: Vec<BoxedLayer> = Vec::new();

        if outputs.console {
            let layer: BoxedLayer = if json_format {
                tracing_subscriber::fmt::layer().json().with_target(true).with_thread_ids(true).boxed()
            } else {
                tracing_subscriber::fmt::layer().with_target(true).boxed()
            };
            layers.push(layer);
        }
        if let Some(file) = outputs.file {
            let layer: BoxedLayer = if json_format {
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(Mutex::new(file))
                    .boxed()
            } else {
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(Mutex::new(file))
                    .boxed()
            };
            layers.push(layer);
        }

        // try_init: a test harness or embedding app may already own the global subscriber
        let installed = tracing_subscriber::registry()
            .with(layers)
            .with(build_filter(level))
            .try_init();

        if installed.is_ok() {
            tracing::info!(
                log_level = %log_level_str,
                log_file = ?log_file,
                console = outputs.console,
                "Logging initialized"
            );
        }
        if let Some((path, error)) = &outputs.file_error {
            tracing::warn!(path = %path, error = %error, "Could not open log file, logging to console");
        }
    });
}
