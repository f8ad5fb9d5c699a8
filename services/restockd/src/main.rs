use std::{fs, path::PathBuf, time::Duration};

use anyhow::bail;
use browser::{WebDriverConfig, WebDriverSession};
use clap::Parser;
use commands::Synchronizer;
use metrics::RunMetrics;
use session::{Credentials, LoginPage, SessionValidator};
use storage::{init_sqlite, Store};
use telegram::{TelegramClient, TelegramNotifier};
use tracing::{error, info, warn, Level};
use uuid::Uuid;

mod run;

use run::{check_catalog, sync_commands, RunConfig, RunOutcome};

const DEFAULT_BASE_URL: &str = "https://wisetekmarket-restuff.eu/";
const DEFAULT_LISTING_PATH: &str = "collections/macbooks?sort_by=price-ascending&filter.v.availability=1";
const CATALOG_SETTLE: Duration = Duration::from_secs(5);

/// Runs one storefront check: applies bot commands, signs in if needed and
/// reports in-stock deals to the bot chat.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, env = "SQLITE_PATH", default_value = "sqlite://restock.db")]
    sqlite_path: String,

    #[arg(long, env = "RESTOCK_TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    bot_token: String,

    /// Chat that receives reports; also the only sender whose commands are obeyed.
    #[arg(long, env = "RESTOCK_CHAT_ID")]
    chat_id: i64,

    #[arg(long, env = "TELEGRAM_API_URL", default_value = telegram::DEFAULT_API_URL)]
    telegram_api_url: String,

    #[arg(long, env = "RESTOCK_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "RESTOCK_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[arg(long, env = "WEBDRIVER_URL", default_value = "http://localhost:9515")]
    webdriver_url: String,

    #[arg(long, env = "RESTOCK_HEADLESS")]
    headless: bool,

    /// Chrome profile directory that keeps the storefront cookies between runs.
    #[arg(long, env = "RESTOCK_BROWSER_PROFILE")]
    browser_profile_dir: Option<PathBuf>,

    #[arg(long, env = "RESTOCK_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    #[arg(long, env = "RESTOCK_LISTING_PATH", default_value = DEFAULT_LISTING_PATH)]
    listing_path: String,

    /// Prometheus textfile-collector output.
    #[arg(long, env = "METRICS_TEXTFILE")]
    metrics_textfile: Option<PathBuf>,
}

impl Args {
    fn listing_url(&self) -> String {
        format!("{}{}", self.base_url, self.listing_path)
    }
}

fn log_startup(args: &Args, run_id: &str) {
    info!(path = %args.sqlite_path, "sqlite path configured");
    info!(chat_id = args.chat_id, api = %args.telegram_api_url, "telegram configured");
    info!(
        endpoint = %args.webdriver_url,
        headless = args.headless,
        profile = ?args.browser_profile_dir,
        "webdriver configured"
    );
    info!(url = %args.listing_url(), "listing page configured");
    info!(%run_id, "run initialized");
}

const MEMORY_PREFIX: &str = "sqlite::memory:";
const URL_PREFIX: &str = "sqlite://";

/// Filesystem part of a `sqlite://` URL, without query parameters.
fn sqlite_file_path(url: &str) -> Option<PathBuf> {
    let rest = url.strip_prefix(URL_PREFIX)?;
    let path_part = rest.split_once('?').map(|(path, _)| path).unwrap_or(rest);
    (!path_part.is_empty()).then(|| PathBuf::from(path_part))
}

fn validate_sqlite_path(path: &str) -> anyhow::Result<()> {
    if path.starts_with(MEMORY_PREFIX) {
        return Ok(());
    }
    if !path.starts_with(URL_PREFIX) {
        bail!("sqlite path must start with `sqlite://` or use `sqlite::memory:`");
    }
    if sqlite_file_path(path).is_none() {
        bail!("sqlite path is missing a filesystem component after `sqlite://`");
    }
    Ok(())
}

fn ensure_sqlite_parent_dir(path: &str) -> anyhow::Result<()> {
    let Some(file) = sqlite_file_path(path) else {
        return Ok(());
    };
    if let Some(parent) = file.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

async fn journal_incident(store: &Store, run_id: &str, severity: &str, kind: &str, message: &str) {
    if let Err(err) = store.log_incident(run_id, severity, kind, message).await {
        warn!(error = ?err, kind, "failed to record incident");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let credentials = Credentials::new(
        args.username.clone().unwrap_or_default(),
        args.password.clone().unwrap_or_default(),
    )?;
    validate_sqlite_path(&args.sqlite_path)?;
    ensure_sqlite_parent_dir(&args.sqlite_path)?;

    let run_id = Uuid::new_v4().to_string();
    let store = init_sqlite(&args.sqlite_path).await?;
    if let Err(err) = store.insert_run(&run_id).await {
        warn!(error = ?err, "failed to record run start");
    }
    log_startup(&args, &run_id);

    let missing_tables = store.validate_required_tables().await?;
    if !missing_tables.is_empty() {
        warn!(tables = ?missing_tables, "sqlite missing required tables");
        journal_incident(
            &store,
            &run_id,
            "warning",
            "db_schema_missing",
            &format!("sqlite missing required tables: {}", missing_tables.join(", ")),
        )
        .await;
    }

    let metrics = RunMetrics::new()?;
    let client = TelegramClient::new(args.bot_token.clone())?.with_base_url(&args.telegram_api_url);

    let synced = sync_commands(&store, &Synchronizer::new(args.chat_id), &client, &metrics).await?;
    if synced.feed_error {
        journal_incident(&store, &run_id, "warning", "feed_unavailable", "inbound messages could not be fetched").await;
    }

    let notifier = TelegramNotifier::new(client, args.chat_id);
    let listing_url = args.listing_url();
    let mut validator = SessionValidator::new(LoginPage::new(&listing_url), credentials);
    let config = RunConfig {
        listing_url,
        catalog_settle: CATALOG_SETTLE,
    };

    let mut webdriver = WebDriverConfig::new(&args.webdriver_url);
    webdriver.headless = args.headless;
    webdriver.profile_dir = args.browser_profile_dir.clone();

    let result = match WebDriverSession::start(&webdriver).await {
        Ok(browser) => {
            let result = check_catalog(&browser, &mut validator, &notifier, &synced, &config, &metrics).await;
            if let Err(err) = browser.close().await {
                warn!(error = %err, "failed to close browser session");
            }
            result
        }
        Err(err) => {
            warn!(error = %err, endpoint = %args.webdriver_url, "could not start browser session");
            Ok(RunOutcome::BrowserUnavailable)
        }
    };

    let outcome_label = match &result {
        Ok(outcome) => {
            match outcome {
                RunOutcome::Completed { listed, deals } => {
                    metrics.last_run_success.set(1);
                    info!(%run_id, listed, deals, "run completed");
                }
                RunOutcome::Unauthenticated => {
                    info!("no working cookies found, quitting");
                    journal_incident(&store, &run_id, "warning", "login_failed", "session never became authenticated").await;
                }
                RunOutcome::BrowserUnavailable => {
                    journal_incident(&store, &run_id, "warning", "browser_unavailable", "browser could not be driven").await;
                }
            }
            outcome.label()
        }
        Err(err) => {
            error!(error = ?err, %run_id, "run failed");
            journal_incident(&store, &run_id, "error", "run_failed", &format!("{err:#}")).await;
            "failed"
        }
    };

    if let Err(err) = store.finish_run(&run_id, outcome_label).await {
        warn!(error = ?err, "failed to record run outcome");
    }
    if let Some(path) = &args.metrics_textfile {
        if let Err(err) = metrics.write_textfile(path) {
            warn!(error = ?err, "failed to write metrics textfile");
        }
    }

    result.map(|_| ())
}
