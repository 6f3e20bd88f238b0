use std::path::Path;
use std::str::FromStr;

use anyhow::Result;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

const LOG_FILE: &str = "reportor.log";

/// Output formats for logging messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// Standard, human readable format.
    Raw,
    /// JSON, machine readable format.
    Json,
}

/// Initialize tracing and enable logging messages according to these options.
///
/// When `log_dir` is given, every message passing the filter is also
/// appended to `reportor.log` in that directory, always as JSON with
/// timestamps.
pub fn init(
    level_filter: LevelFilter,
    format: Format,
    timestamp: bool,
    log_dir: Option<&Path>,
) -> Result<()> {
    let file_layer = match log_dir {
        Some(dir) => {
            let file_appender: RollingFileAppender = tracing_appender::rolling::never(dir, LOG_FILE);

            Some(
                fmt::layer()
                    .with_writer(file_appender)
                    .with_ansi(false)
                    .with_timer(UtcTime::rfc_3339())
                    .with_target(false)
                    .json()
                    .with_filter(env_filter(level_filter)?),
            )
        }
        None => None,
    };

    let is_terminal = atty::is(atty::Stream::Stderr);
    let terminal_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(is_terminal)
        .with_target(false);

    let env_filtered = env_filter(level_filter)?;

    let terminal_layer = match (format, timestamp) {
        (Format::Json, true) => terminal_layer
            .json()
            .with_timer(UtcTime::rfc_3339())
            .with_filter(env_filtered)
            .boxed(),
        (Format::Json, false) => terminal_layer
            .json()
            .without_time()
            .with_filter(env_filtered)
            .boxed(),
        (Format::Raw, true) => terminal_layer
            .with_timer(UtcTime::rfc_3339())
            .with_filter(env_filtered)
            .boxed(),
        (Format::Raw, false) => terminal_layer
            .without_time()
            .with_filter(env_filtered)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(terminal_layer)
        .try_init()?;

    match log_dir {
        Some(dir) => tracing::info!(%level_filter, logs_dir = %dir.display(), "Initialized tracing"),
        None => tracing::info!(%level_filter, "Initialized tracing"),
    }

    Ok(())
}

/// Controls which crates get logged and from which level.
fn env_filter(level_filter: LevelFilter) -> Result<EnvFilter> {
    Ok(EnvFilter::from_default_env()
        .add_directive(Directive::from_str(&format!("reportor={}", &level_filter))?)
        .add_directive(Directive::from_str(&format!(
            "reportor_env={}",
            &level_filter
        ))?))
}
