use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use state::PersistedState;
use storage::Store;
use tracing::Level;

/// Inspects or edits the monitor's stored configuration. Do not run while
/// `restockd` is running.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "SQLITE_PATH", default_value = "sqlite://restock.db")]
    sqlite_path: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Status,
    /// Exclude a variant id from listings and alerts.
    Ban { id: u64 },
    Unban { id: u64 },
    /// Alert threshold in whole currency units.
    Threshold { value: u64 },
}

#[derive(Debug, Serialize)]
struct StatusReport {
    #[serde(flatten)]
    state: PersistedState,
    updated_at_ms: Option<i64>,
}

/// Returns whether the state changed.
fn apply(command: Command, state: &mut PersistedState) -> Result<bool> {
    Ok(match command {
        Command::Status => false,
        Command::Ban { id } => state.banned_ids.insert(id),
        Command::Unban { id } => state.banned_ids.remove(id),
        Command::Threshold { value: 0 } => bail!("threshold must be positive"),
        Command::Threshold { value } => {
            let changed = state.price_threshold != value;
            state.price_threshold = value;
            changed
        }
    })
}

async fn execute(store: &Store, command: Command) -> Result<StatusReport> {
    let mut state = store.load_state().await?;
    if apply(command, &mut state)? {
        store.save_state(&state).await?;
    }
    Ok(StatusReport {
        state,
        updated_at_ms: store.state_updated_at().await?,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::WARN)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = Store::connect(&cli.sqlite_path).await?;
    let report = execute(&store, cli.command).await?;
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}
