//! Process-wide log output.
//!
//! Two output styles:
//!
//! - Local development: coloured output on stderr with local timestamps.
//! - Managed runtime (`KUBERNETES_SERVICE_HOST` set): plain output on
//!   stdout with RFC 3339 UTC timestamps, ready for log collectors.
//!
//! Both include the event target, source file and line number.
//!
//! `RUST_LOG` directives, when present, refine the configured level.

use tracing::Subscriber;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::time::{ChronoLocal, ChronoUtc};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::{ConfigError, LoggingSettings};

const LOCAL_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Installs the global `tracing` subscriber.
///
/// An unrecognised level falls back to `info`; the fallback is logged at
/// `error` once the subscriber is live.
///
/// # Errors
///
/// [`ConfigError::Logging`] if a global subscriber is already installed.
pub fn init_logging(settings: &LoggingSettings) -> Result<(), ConfigError> {
    let (level, valid) = resolve_level(&settings.level);
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let output = if settings.managed_runtime {
        output_layer(true, std::io::stdout)
    } else {
        output_layer(false, std::io::stderr)
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(output)
        .try_init()
        .map_err(|e| ConfigError::Logging(e.to_string()))?;

    if !valid {
        tracing::error!(level = %settings.level, "invalid log level, defaulting to info");
    }
    Ok(())
}

fn output_layer<S, W>(managed_runtime: bool, writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(writer);
    if managed_runtime {
        layer
            .with_ansi(false)
            .with_timer(ChronoUtc::rfc_3339())
            .boxed()
    } else {
        layer
            .with_ansi(true)
            .with_timer(ChronoLocal::new(LOCAL_TIMESTAMP_FORMAT.to_string()))
            .boxed()
    }
}

/// Parses a level name, falling back to `info`. The flag is `false` when
/// the fallback was used.
fn resolve_level(level: &str) -> (LevelFilter, bool) {
    match level.trim().parse::<LevelFilter>() {
        Ok(level) => (level, true),
        Err(_) => (LevelFilter::INFO, false),
    }
}
