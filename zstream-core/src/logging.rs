use std::{fs::File, sync::Arc};

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;

/// Install the global tracing subscriber.
///
/// `format = "json"` emits one JSON object per event with span context,
/// anything else uses the human-readable formatter. With `file_path` set,
/// events are appended to that file instead of stdout. `RUST_LOG` wins
/// over `level`.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = parse_log_level(&config.level)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let subscriber = tracing_subscriber::registry().with(filter);
    let sink = config.file_path.as_deref().map(open_log_file).transpose()?;

    if config.format == "json" {
        let layer = fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_line_number(true)
            .with_file(true);
        match sink {
            Some(file) => subscriber.with(layer.with_writer(file)).init(),
            None => subscriber.with(layer).init(),
        }
    } else {
        let layer = fmt::layer()
            .pretty()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_line_number(true)
            .with_file(false);
        match sink {
            // no colour codes in files
            Some(file) => subscriber.with(layer.with_ansi(false).with_writer(file)).init(),
            None => subscriber.with(layer).init(),
        }
    }

    Ok(())
}

fn open_log_file(path: &str) -> anyhow::Result<Arc<File>> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| anyhow::anyhow!("Cannot open log file {path}: {e}"))?;
    Ok(Arc::new(file))
}

/// Level names accepted in config; `silent` (or `off`) mutes everything.
pub fn parse_log_level(level: &str) -> anyhow::Result<LevelFilter> {
    let filter = match level.to_ascii_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        "silent" | "off" => LevelFilter::OFF,
        other => anyhow::bail!("Unknown log level {other:?}, expected trace|debug|info|warn|error|silent"),
    };
    Ok(filter)
}
