//! ---
//! skylink_section: "01-core-functionality"
//! skylink_subsection: "module"
//! skylink_type: "source"
//! skylink_scope: "code"
//! skylink_description: "Shared primitives and utilities for the bridge runtime."
//! skylink_version: "v0.1.0"
//! skylink_owner: "tbd"
//! ---
use anyhow::{anyhow, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "SKYLINK_LOG";

/// Workspace crates log at `info`; dependencies (hyper, axum, tower-http) only at `warn`.
pub const DEFAULT_DIRECTIVE: &str = "warn,skylinkd=info,skylink_simgen=info,\
skylink_common=info,skylink_proto=info,skylink_bridge=info,skylink_net=info,\
skylink_metrics=info,skylink_sim=info";

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
static STDOUT_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Available log formats for the daemon and tools.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    StructuredJson,
    #[default]
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" | "structured-json" => Ok(LogFormat::StructuredJson),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

/// Where the active filter directive came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterSource {
    SkylinkLog,
    RustLog,
    Config,
    Default,
}

/// Pick the first usable directive: `SKYLINK_LOG`, `RUST_LOG`, `logging.filter`, then
/// [`DEFAULT_DIRECTIVE`]. Unparseable candidates are reported on stderr and skipped.
pub fn resolve_filter(
    skylink_log: Option<&str>,
    rust_log: Option<&str>,
    configured: Option<&str>,
) -> (EnvFilter, FilterSource) {
    let candidates = [
        (skylink_log, FilterSource::SkylinkLog),
        (rust_log, FilterSource::RustLog),
        (configured, FilterSource::Config),
    ];
    for (directive, source) in candidates {
        let Some(directive) = directive else {
            continue;
        };
        match EnvFilter::try_new(directive) {
            Ok(filter) => return (filter, source),
            Err(err) => eprintln!("ignoring invalid {source:?} log directive {directive:?}: {err}"),
        }
    }
    (EnvFilter::new(DEFAULT_DIRECTIVE), FilterSource::Default)
}

/// Daily file name for one binary, e.g. `skylinkd.log` or `field-skylinkd.log`.
pub fn log_file_name(service_name: &str, config: &LoggingConfig) -> String {
    match config.file_prefix.as_deref() {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}-{service_name}.log"),
        _ => format!("{service_name}.log"),
    }
}

/// Reject a `logging.filter` that would be skipped at startup.
pub fn validate_directive(directive: &str) -> Result<()> {
    EnvFilter::try_new(directive)
        .map(|_| ())
        .map_err(|err| anyhow!("logging filter {directive:?} is invalid: {err}"))
}

/// Install the process-wide subscriber for `service_name`.
///
/// Stdout gets pretty or JSON output; `<directory>/<file>` rolls daily and is always
/// JSON. Calling this more than once is harmless; only the first subscriber is installed.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)?;
    let file_name = log_file_name(service_name, config);

    let file_appender = daily(&config.directory, &file_name);
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);

    let skylink_log = std::env::var(LOG_ENV).ok();
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let (filter, filter_source) = resolve_filter(
        skylink_log.as_deref(),
        rust_log.as_deref(),
        config.filter.as_deref(),
    );

    let fmt_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };

    let file_layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .json()
        .with_writer(file_writer)
        .boxed();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(
        service = %service_name,
        log_file = %config.directory.join(&file_name).display(),
        format = ?config.format,
        filter = ?filter_source,
        "tracing initialised"
    );
    Ok(())
}
