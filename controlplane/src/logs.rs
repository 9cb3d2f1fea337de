//! Tracing setup

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::errors::PlatformError;
use crate::storage::settings::LogSettings;

const LOG_FILE_PREFIX: &str = "berth.log";

/// Line format on stdout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Directives from `RUST_LOG` win over the configured ones.
fn filter(directives: &str) -> Result<EnvFilter, PlatformError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(directives)
        .map_err(|e| PlatformError::Config(format!("Invalid log level '{}': {}", directives, e)))
}

/// Install the global subscriber.
///
/// Files are always written as plain text without ANSI colours. Hold the
/// returned guard until exit or buffered file lines are lost.
pub fn init_logging(settings: &LogSettings) -> Result<Option<WorkerGuard>, PlatformError> {
    let filter = filter(&settings.level)?;

    let (file_layer, guard) = match &settings.dir {
        Some(dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX));
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    let installed = match settings.format {
        LogFormat::Json => registry.with(fmt::layer().json().flatten_event(true)).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).try_init(),
    };
    installed.map_err(|e| PlatformError::Config(e.to_string()))?;

    Ok(guard)
}
