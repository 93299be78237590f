// src/telemetry.rs
//! Logging and metrics setup for the binaries.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::env_flag;

/// Install the global subscriber. Filter from `RUST_LOG`, else `LOG_LEVEL`, else `info`.
/// JSON lines by default; compact text when `LOG_PLAIN` is set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        EnvFilter::try_new(level.trim()).unwrap_or_else(|_| EnvFilter::new("info"))
    });

    let registry = tracing_subscriber::registry().with(filter);
    let res = if env_flag("LOG_PLAIN") {
        registry
            .with(fmt::layer().compact().with_target(false))
            .try_init()
    } else {
        registry
            .with(fmt::layer().json().flatten_event(true).with_target(false))
            .try_init()
    };
    if let Err(e) = res {
        eprintln!("tracing already initialized: {e}");
    }
}

/// Prometheus recorder whose exposition is written to a file at the end of a run
/// (node-exporter textfile collector style).
pub struct TextfileMetrics {
    handle: PrometheusHandle,
    path: PathBuf,
}

impl TextfileMetrics {
    /// Install the recorder when `METRICS_TEXTFILE` is set; `Ok(None)` otherwise.
    pub fn from_env() -> Result<Option<Self>> {
        let Some(path) = std::env::var("METRICS_TEXTFILE")
            .ok()
            .filter(|p| !p.trim().is_empty())
        else {
            return Ok(None);
        };
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        Ok(Some(Self {
            handle,
            path: PathBuf::from(path),
        }))
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }

    pub fn flush(&self) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let tmp = self.path.with_extension("prom.tmp");
        std::fs::write(&tmp, self.render())
            .with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("renaming into {}", self.path.display()))?;
        Ok(())
    }
}
