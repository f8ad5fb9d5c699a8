use std::time::Duration;

use anyhow::{Context, Result};
use browser::BrowserContext;
use catalog::{below_threshold, format_alert, format_listing, parse_snapshot, prepare, split_message, CATALOG_SCRIPT};
use commands::{SyncOutcome, Synchronizer, UpdateFeed};
use metrics::RunMetrics;
use session::{SessionError, SessionState, SessionValidator};
use storage::Store;
use telegram::{Notifier, ParseMode, MESSAGE_LIMIT};
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub listing_url: String,
    /// Pause between a confirmed session and reading the catalog.
    pub catalog_settle: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { listed: usize, deals: usize },
    Unauthenticated,
    BrowserUnavailable,
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Completed { .. } => "completed",
            RunOutcome::Unauthenticated => "unauthenticated",
            RunOutcome::BrowserUnavailable => "browser_unavailable",
        }
    }
}

/// Loads the stored configuration, applies pending bot commands and writes
/// the result back before anything else happens in the run.
pub async fn sync_commands<F>(
    store: &Store,
    synchronizer: &Synchronizer,
    feed: &F,
    metrics: &RunMetrics,
) -> Result<SyncOutcome>
where
    F: UpdateFeed + ?Sized,
{
    let loaded = store.load_state().await.context("failed to load stored state")?;
    info!(
        marker = loaded.last_update_marker,
        threshold = loaded.price_threshold,
        banned = loaded.banned_ids.len(),
        "stored state loaded"
    );

    let outcome = synchronizer.synchronize(loaded, feed).await;
    metrics.updates_processed.inc_by(outcome.processed as u64);
    metrics.commands_applied.inc_by(outcome.applied as u64);

    store
        .save_state(&outcome.state)
        .await
        .context("failed to persist state")?;
    Ok(outcome)
}

/// Validates the session, reads the catalog and sends the listing and deal
/// alert. Network trouble with the browser degrades the run instead of
/// failing it; a changed page structure fails it.
pub async fn check_catalog(
    ctx: &dyn BrowserContext,
    validator: &mut SessionValidator,
    notifier: &dyn Notifier,
    synced: &SyncOutcome,
    config: &RunConfig,
    metrics: &RunMetrics,
) -> Result<RunOutcome> {
    let attempts_before = validator.login_attempts();
    let session = validator.ensure_authenticated(ctx).await;
    metrics
        .login_attempts
        .inc_by(u64::from(validator.login_attempts() - attempts_before));

    match session {
        Ok(SessionState::Authenticated) => {}
        Ok(state) => {
            warn!(?state, "no working session, skipping catalog check");
            return Ok(RunOutcome::Unauthenticated);
        }
        Err(SessionError::Browser(err)) => {
            warn!(error = %err, "browser unavailable during session check");
            return Ok(RunOutcome::BrowserUnavailable);
        }
        Err(err) => return Err(err).context("session validation failed"),
    }

    sleep(config.catalog_settle).await;
    info!("fetching product list");
    let meta = match ctx.execute_script(CATALOG_SCRIPT).await {
        Ok(meta) => meta,
        Err(err) => {
            warn!(error = %err, "could not read catalog from page");
            return Ok(RunOutcome::BrowserUnavailable);
        }
    };
    let snapshot = parse_snapshot(&meta).context("unexpected catalog structure")?;
    let items = prepare(snapshot.variants, &synced.state.banned_ids);
    metrics.catalog_items.set(items.len() as i64);
    info!(count = items.len(), "products found");

    if synced.list_requested {
        let listing = format_listing(&items, &synced.state.banned_ids);
        for part in split_message(&listing, MESSAGE_LIMIT) {
            deliver(notifier, &part, metrics).await;
        }
    }

    let deals = below_threshold(&items, synced.state.price_threshold);
    metrics.alert_items.set(deals.len() as i64);
    if let Some(alert) = format_alert(&deals, &config.listing_url) {
        info!(deals = deals.len(), threshold = synced.state.price_threshold, "found deals, sending alert");
        for part in split_message(&alert, MESSAGE_LIMIT) {
            deliver(notifier, &part, metrics).await;
        }
    }

    Ok(RunOutcome::Completed {
        listed: items.len(),
        deals: deals.len(),
    })
}

/// Fire-and-forget send: failures are logged and counted, never retried.
async fn deliver(notifier: &dyn Notifier, text: &str, metrics: &RunMetrics) {
    if let Err(err) = notifier.send(text, ParseMode::Markdown).await {
        metrics.notifications_failed.inc();
        warn!(error = %err, "failed to send notification");
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
