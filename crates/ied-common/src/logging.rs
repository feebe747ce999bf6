//! ---
//! ied_section: "01-core-functionality"
//! ied_subsection: "module"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "Shared primitives and utilities for the proxy runtime."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

pub const LOG_ENV: &str = "IED_PROXY_LOG";

static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();
static STDOUT_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Available log formats for the daemon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

fn env_filter() -> EnvFilter {
    match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(&directive).unwrap_or_else(|err| {
            eprintln!("invalid {LOG_ENV} directive ({err}); defaulting to info logging");
            EnvFilter::new("info")
        }),
        Err(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

/// Initialize the tracing subscriber based on configuration and environment variables.
///
/// * `IED_PROXY_LOG` overrides the log filter (e.g. `info`, `debug,ied_core=trace`).
///   When unset the standard `RUST_LOG` variable is honoured, finally defaulting to
///   `info`.
/// * stdout receives structured JSON or pretty output, and a daily rolling JSON
///   file is written under the configured directory.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory).with_context(|| {
        format!(
            "unable to create log directory {}",
            config.directory.display()
        )
    })?;
    let prefix = config.file_prefix.as_deref().unwrap_or(service_name);

    let file_appender = daily(&config.directory, format!("{prefix}-{service_name}.log"));
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);

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
        .with(env_filter())
        .with(fmt_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(
        service = %service_name,
        log_dir = %config.directory.display(),
        format = ?config.format,
        "tracing initialised"
    );
    Ok(())
}
