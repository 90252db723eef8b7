use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,kikx_client=debug,hyper=warn,reqwest=warn,tungstenite=warn";
const LOG_FILE: &str = "client.log";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Write to `<dir>/client.log` instead of stderr
    pub dir: Option<PathBuf>,
    pub filter: Option<String>,
    pub format: LogFormat,
}

pub struct LoggingHandle {
    pub run_id: String,
    /// Dropping it flushes and stops the background writer
    pub guard: WorkerGuard,
}

fn resolve_filter(config: &LoggingConfig) -> (EnvFilter, String) {
    let candidates = [
        std::env::var("KIKX_LOG_FILTER").ok(),
        config.filter.clone(),
        std::env::var("RUST_LOG").ok(),
    ];
    for value in candidates.into_iter().flatten() {
        if let Ok(filter) = EnvFilter::try_new(&value) {
            return (filter, value);
        }
    }
    (EnvFilter::new(DEFAULT_FILTER), DEFAULT_FILTER.to_string())
}

fn resolve_format(config: &LoggingConfig) -> LogFormat {
    match std::env::var("KIKX_LOG_FORMAT") {
        Ok(value) if value.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
        Ok(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
        _ => config.format,
    }
}

pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<LoggingHandle> {
    let (filter, filter_source) = resolve_filter(config);
    let format = resolve_format(config);

    let (writer, guard) = match &config.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::never(dir, LOG_FILE);
            tracing_appender::non_blocking(file_appender)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .pretty()
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .json()
                    .flatten_event(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true)
                    .with_current_span(true),
            )
            .try_init()?,
    }

    let run_id = std::env::var("KIKX_CLIENT_RUN_ID").unwrap_or_else(|_| {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        format!("pid-{}-{}", std::process::id(), now)
    });

    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        run_id = %run_id,
        log_dir = ?config.dir,
        format = ?format,
        filter = %filter_source,
    );

    Ok(LoggingHandle { run_id, guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_logging_creates_dir_and_refuses_second_init() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let config = LoggingConfig {
            dir: Some(log_dir.clone()),
            filter: Some("debug".into()),
            format: LogFormat::Json,
        };

        let handle = init_logging(&config).unwrap();
        assert!(log_dir.is_dir());
        assert!(!handle.run_id.is_empty());

        // A global subscriber is already installed for this process
        assert!(init_logging(&config).is_err());
    }

    #[test]
    fn format_parses_from_config() {
        let config: LoggingConfig = toml::from_str("format = \"pretty\"").unwrap();
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.dir, None);
    }
}
