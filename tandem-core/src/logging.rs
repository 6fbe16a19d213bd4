use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level. `json` output is meant for log
/// collectors, anything else gets the human-readable pretty format.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = parse_log_level(&config.level)?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let registry = tracing_subscriber::registry().with(env_filter);
    let file = match &config.file_path {
        Some(path) => Some(Arc::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?,
        )),
        None => None,
    };

    if config.format.eq_ignore_ascii_case("json") {
        let layer = fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .with_line_number(true);
        match file {
            Some(file) => registry.with(layer.with_writer(file)).try_init()?,
            None => registry.with(layer).try_init()?,
        }
    } else {
        let layer = fmt::layer()
            .pretty()
            .with_target(true)
            .with_line_number(true)
            .with_file(false);
        match file {
            Some(file) => registry.with(layer.with_writer(file)).try_init()?,
            None => registry.with(layer).try_init()?,
        }
    }

    Ok(())
}

fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        // Directive strings such as "tandem_core=debug,info" are validated by EnvFilter
        other if other.contains('=') || other.contains(',') => Ok(Level::INFO),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}
