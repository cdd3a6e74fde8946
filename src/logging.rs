//! Tracing setup driven by the `[logging]` config section.
//!
//! `METALENS_LOG` overrides the configured level for one run. HTTP client
//! chatter is capped at `warn` unless a directive names it explicitly.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_ENV: &str = "METALENS_LOG";
const LOG_FILE_PREFIX: &str = "metalens.log";
const QUIET_TARGETS: [&str; 2] = ["ureq", "rustls"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogBackend {
    /// journald when reachable, the log file otherwise.
    #[default]
    Auto,
    Journald,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub backend: LogBackend,

    /// Directory for the rolling log file. Defaults to the data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            backend: LogBackend::default(),
            directory: None,
        }
    }
}

impl LoggingConfig {
    pub fn log_directory(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("metalens")
                .join("logs")
        })
    }
}

/// Filter directives: the override (or configured level) plus caps on noisy
/// dependencies that the directives do not already mention.
pub fn filter_directives(level: &str, env_override: Option<&str>) -> String {
    let base = env_override
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(level)
        .trim();
    let base = if base.is_empty() { "info" } else { base };

    let mut directives = vec![base.to_string()];
    for target in QUIET_TARGETS {
        if !base.contains(target) {
            directives.push(format!("{}=warn", target));
        }
    }
    directives.join(",")
}

/// Initialize logging. Call once at startup.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let env_override = std::env::var(LOG_ENV).ok();
    let directives = filter_directives(&config.level, env_override.as_deref());
    let env_filter = EnvFilter::try_new(&directives)
        .with_context(|| format!("Invalid log filter '{}'", directives))?;

    #[cfg(target_os = "linux")]
    {
        if config.backend != LogBackend::File {
            match tracing_journald::layer() {
                Ok(layer) => {
                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(layer.with_syslog_identifier("metalens".to_string()))
                        .init();
                    tracing::info!(filter = %directives, "Logging to journald");
                    return Ok(());
                }
                Err(e) if config.backend == LogBackend::Journald => {
                    eprintln!("journald unavailable ({}), logging to file", e);
                }
                Err(_) => {}
            }
        }
    }

    let log_dir = config.log_directory();
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    tracing::info!(dir = %log_dir.display(), filter = %directives, "Logging to file");
    Ok(())
}
