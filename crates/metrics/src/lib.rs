use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use tracing::info;

/// Counters for a single monitoring run, exported in the Prometheus text
/// format for a textfile collector.
#[derive(Clone)]
pub struct RunMetrics {
    registry: Registry,
    pub updates_processed: IntCounter,
    pub commands_applied: IntCounter,
    pub login_attempts: IntCounter,
    pub notifications_failed: IntCounter,
    pub catalog_items: IntGauge,
    pub alert_items: IntGauge,
    pub last_run_success: IntGauge,
}

impl RunMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let metrics = Self {
            updates_processed: IntCounter::new(
                "restock_updates_processed_total",
                "Inbound bot messages processed",
            )?,
            commands_applied: IntCounter::new(
                "restock_commands_applied_total",
                "Bot commands that changed the stored configuration",
            )?,
            login_attempts: IntCounter::new(
                "restock_login_attempts_total",
                "Storefront login attempts",
            )?,
            notifications_failed: IntCounter::new(
                "restock_notifications_failed_total",
                "Outbound messages that could not be delivered",
            )?,
            catalog_items: IntGauge::new(
                "restock_catalog_items",
                "Variants listed after removing banned ids",
            )?,
            alert_items: IntGauge::new(
                "restock_alert_items",
                "Variants priced below the alert threshold",
            )?,
            last_run_success: IntGauge::new(
                "restock_last_run_success",
                "1 if the last run reached the catalog check",
            )?,
            registry,
        };
        metrics.registry.register(Box::new(metrics.updates_processed.clone()))?;
        metrics.registry.register(Box::new(metrics.commands_applied.clone()))?;
        metrics.registry.register(Box::new(metrics.login_attempts.clone()))?;
        metrics.registry.register(Box::new(metrics.notifications_failed.clone()))?;
        metrics.registry.register(Box::new(metrics.catalog_items.clone()))?;
        metrics.registry.register(Box::new(metrics.alert_items.clone()))?;
        metrics.registry.register(Box::new(metrics.last_run_success.clone()))?;
        Ok(metrics)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Replaces `path` with the current values. The file is written next to
    /// the destination and renamed so collectors never read a partial file.
    pub fn write_textfile(&self, path: &Path) -> Result<()> {
        let rendered = self.render()?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut file = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("cannot create temp file in {}", dir.display()))?;
        file.write_all(rendered.as_bytes())?;
        file.persist(path)
            .with_context(|| format!("cannot replace {}", path.display()))?;
        info!(path = %path.display(), "metrics textfile written");
        Ok(())
    }
}
