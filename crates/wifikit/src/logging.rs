//! Opt-in `tracing` bootstrap for applications embedding wifikit.
//!
//! The library itself never installs a subscriber; managers log through their own
//! span and whatever subscriber the host process set up.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

pub const LOG_ENV: &str = "WIFIKIT_LOG";

static INITIALIZED: OnceCell<()> = OnceCell::new();

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading logging config {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("parsing logging config {}", path.display()))
    }
}

pub(crate) fn build_filter(cfg: &LoggingConfig) -> EnvFilter {
    if !cfg.enabled {
        return EnvFilter::new("off");
    }
    if let Ok(directives) = std::env::var(LOG_ENV) {
        if let Ok(filter) = EnvFilter::try_new(directives) {
            return filter;
        }
    }
    EnvFilter::try_new(cfg.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install a compact fmt subscriber. Later calls are no-ops.
pub fn init(cfg: &LoggingConfig) -> Result<()> {
    if INITIALIZED.get().is_some() {
        return Ok(());
    }
    let layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_line_number(true)
        .compact();
    tracing_subscriber::registry()
        .with(build_filter(cfg))
        .with(layer)
        .try_init()
        .context("installing tracing subscriber")?;
    let _ = INITIALIZED.set(());
    Ok(())
}
