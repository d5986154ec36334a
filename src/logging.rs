//! Run-scoped log output: every event goes to stdout and to a timestamped
//! file created for the run.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Subscriber;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt};

pub const DEFAULT_FILTER: &str = "info";

/// `19-Oct-2026 14_03_59.log`
pub fn log_file_name(now: DateTime<Local>) -> String {
    format!("{}.log", now.format("%d-%b-%Y %H_%M_%S"))
}

pub fn build_subscriber(log_file: File, filter: EnvFilter) -> impl Subscriber + Send + Sync {
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Arc::new(log_file)),
        )
}

/// Creates the run's log file under `log_dir` and installs the global
/// subscriber. `RUST_LOG` overrides the default `info` filter.
pub fn init(log_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(log_dir).with_context(|| format!("creating {}", log_dir.display()))?;
    let path = log_dir.join(log_file_name(Local::now()));
    let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing::subscriber::set_global_default(build_subscriber(file, filter))
        .context("installing log subscriber")?;
    Ok(path)
}
